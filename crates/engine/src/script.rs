//! Macro source extraction and entry point wrapping.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Name of the declaration every wrapped macro defines and the runner invokes.
pub const ENTRY_POINT: &str = "current-script";

/// Lines [`wrap`] inserts before the user's first line.
///
/// Engine-reported line numbers are shifted back by this amount. It must
/// change together with [`wrap`].
pub const WRAPPER_PROLOGUE_LINES: u32 = 1;

/// Default upper bound on macro source size.
pub const DEFAULT_MAX_SCRIPT_BYTES: usize = 512 * 1024;

/// Errors raised while turning a request into macro source.
#[derive(Debug, Error)]
pub enum ScriptInputError {
	/// The request carried no script text.
	#[error("script is empty")]
	Empty,
	/// The script exceeds the configured size limit.
	#[error("script is {len} bytes, limit is {limit}")]
	TooLarge {
		/// Actual size.
		len: u64,
		/// Configured limit.
		limit: usize,
	},
	/// The request named a script file that could not be read.
	#[error("failed to read script {path}: {error}")]
	Read {
		/// Script file path.
		path: PathBuf,
		/// The underlying I/O error.
		#[source]
		error: io::Error,
	},
}

/// Returns the macro body for a request.
///
/// Single-line text naming an existing file is read from disk; anything else
/// is the script itself.
///
/// # Errors
///
/// Fails on empty input, on sources larger than `max_bytes`, and when a named
/// file cannot be read.
pub fn extract(path_or_script: &str, max_bytes: usize) -> Result<String, ScriptInputError> {
	if path_or_script.trim().is_empty() {
		return Err(ScriptInputError::Empty);
	}

	let candidate = Path::new(path_or_script.trim());
	let body = if !path_or_script.contains('\n') && candidate.is_file() {
		read_script_file(candidate, max_bytes)?
	} else {
		path_or_script.to_string()
	};

	check_size(body.len() as u64, max_bytes)?;
	if body.trim().is_empty() {
		return Err(ScriptInputError::Empty);
	}
	Ok(body)
}

/// Wraps a macro body in the entry point declaration.
#[must_use]
pub fn wrap(body: &str) -> String {
	format!("def {ENTRY_POINT} [] {{\n{body}\n}}\n")
}

fn read_script_file(path: &Path, max_bytes: usize) -> Result<String, ScriptInputError> {
	let read_err = |error| ScriptInputError::Read {
		path: path.to_path_buf(),
		error,
	};
	let metadata = std::fs::metadata(path).map_err(read_err)?;
	check_size(metadata.len(), max_bytes)?;
	std::fs::read_to_string(path).map_err(read_err)
}

fn check_size(len: u64, limit: usize) -> Result<(), ScriptInputError> {
	if len > limit as u64 {
		return Err(ScriptInputError::TooLarge { len, limit });
	}
	Ok(())
}
