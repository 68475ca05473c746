//! Worker configuration.
//!
//! Configuration is optional. The file is looked up at the path given on the
//! command line, then at `MEXEC_CONFIG`, then at `<config dir>/mexec/worker.toml`.
//! Only the last location may be absent; every field has a default.

use std::path::{Path, PathBuf};

use mexec_proto::paths;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::resolver::DEFAULT_DEPENDENCY_DIR;
use crate::script::DEFAULT_MAX_SCRIPT_BYTES;

/// Environment variable naming a configuration file.
pub const CONFIG_ENV: &str = "MEXEC_CONFIG";

const DEFAULT_RECURSION_LIMIT: i64 = 64;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading a configuration file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML.
	#[error("TOML parse error: {0}")]
	Parse(#[from] toml::de::Error),

	/// A value is out of range.
	#[error("invalid value for '{key}': {reason}")]
	Invalid {
		/// Offending key.
		key: &'static str,
		/// What is wrong with it.
		reason: &'static str,
	},
}

/// Settings read from `worker.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
	/// Sub-directory of the host install that holds dependencies.
	pub dependency_dir: PathBuf,
	/// Dependencies loaded when the session starts. `{version}` expands to
	/// the host version.
	pub dependencies: Vec<String>,
	/// Largest accepted macro source, in bytes.
	pub max_script_bytes: usize,
	/// Directory holding the channel socket.
	pub channel_dir: Option<PathBuf>,
	/// Maximum custom command recursion depth.
	pub recursion_limit: i64,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			dependency_dir: PathBuf::from(DEFAULT_DEPENDENCY_DIR),
			dependencies: Vec::new(),
			max_script_bytes: DEFAULT_MAX_SCRIPT_BYTES,
			channel_dir: None,
			recursion_limit: DEFAULT_RECURSION_LIMIT,
		}
	}
}

impl WorkerConfig {
	/// Parses and validates TOML text.
	///
	/// # Errors
	///
	/// Fails on syntax errors, unknown keys and out-of-range values.
	pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
		let config: Self = toml::from_str(text)?;
		config.validate()?;
		Ok(config)
	}

	/// Loads configuration from the first location that applies.
	///
	/// `explicit` and `MEXEC_CONFIG` must name a readable file. The per-user
	/// default file is optional.
	///
	/// # Errors
	///
	/// Fails when a required file cannot be read or any file is invalid.
	pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
		let env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
		let default = dirs::config_dir().map(|dir| dir.join("mexec").join("worker.toml"));
		Self::load_from(explicit, env.as_deref(), default.as_deref())
	}

	/// Socket path of the channel keyed by `correlation`.
	///
	/// The worker and any host driver must both resolve the path through this
	/// so a configured `channel_dir` applies to both ends.
	pub fn channel_path(&self, correlation: Uuid) -> PathBuf {
		paths::channel_path(&paths::channel_dir(self.channel_dir.as_deref()), correlation)
	}

	fn load_from(explicit: Option<&Path>, env: Option<&Path>, default: Option<&Path>) -> Result<Self, ConfigError> {
		if let Some(path) = explicit.or(env) {
			return Self::read(path);
		}
		match default {
			Some(path) if path.is_file() => Self::read(path),
			_ => {
				tracing::debug!("config.defaults");
				Ok(Self::default())
			}
		}
	}

	fn read(path: &Path) -> Result<Self, ConfigError> {
		let text = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		let config = Self::from_toml(&text)?;
		tracing::info!(path = %path.display(), "config.loaded");
		Ok(config)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.max_script_bytes == 0 {
			return Err(ConfigError::Invalid {
				key: "max_script_bytes",
				reason: "must be greater than zero",
			});
		}
		if self.recursion_limit <= 0 {
			return Err(ConfigError::Invalid {
				key: "recursion_limit",
				reason: "must be greater than zero",
			});
		}
		if self.dependency_dir.is_absolute() {
			return Err(ConfigError::Invalid {
				key: "dependency_dir",
				reason: "must be relative to the host install directory",
			});
		}
		Ok(())
	}
}
