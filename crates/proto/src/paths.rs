//! Channel socket path resolution.

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Environment variable overriding the channel directory.
pub const CHANNEL_DIR_ENV: &str = "MEXEC_CHANNEL_DIR";

/// Returns the directory that holds channel sockets.
///
/// # Resolution Order
///
/// 1. `MEXEC_CHANNEL_DIR` environment variable.
/// 2. `configured`, when the caller has one.
/// 3. System runtime directory (e.g., `$XDG_RUNTIME_DIR`), if it can be created.
/// 4. System temp directory.
#[must_use]
pub fn channel_dir(configured: Option<&Path>) -> PathBuf {
	if let Some(dir) = std::env::var_os(CHANNEL_DIR_ENV).filter(|v| !v.is_empty()) {
		return PathBuf::from(dir);
	}
	if let Some(dir) = configured {
		return dir.to_path_buf();
	}

	dirs::runtime_dir()
		.filter(|p| std::fs::create_dir_all(p).is_ok())
		.unwrap_or_else(std::env::temp_dir)
}

/// Returns the socket path for the channel keyed by `correlation` inside `dir`.
#[must_use]
pub fn channel_path(dir: &Path, correlation: Uuid) -> PathBuf {
	dir.join(format!("mexec-{}.sock", correlation.as_hyphenated()))
}
