//! Tracing subscriber setup shared by the binaries.

use std::fs::OpenOptions;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

/// Directory for per-process log files.
pub const LOG_DIR_ENV: &str = "MEXEC_LOG_DIR";

/// Installs the global subscriber for `component`.
///
/// With `MEXEC_LOG_DIR` set, logs go to `<dir>/<component>.<pid>.log`.
/// Otherwise they go to stderr, which the host usually discards.
pub fn setup_tracing(component: &str, verbose: bool) {
	// Host-spawned workers have no visible stderr
	if let Some(log_dir) = std::env::var_os(LOG_DIR_ENV).map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let pid = std::process::id();
		let log_path = log_dir.join(format!("{component}.{pid}.log"));

		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
				if verbose {
					EnvFilter::new("mexec_engine=trace,mexec_nu=trace,debug")
				} else {
					EnvFilter::new("mexec_engine=debug,mexec_nu=debug,info")
				}
			});

			let file_layer = tracing_subscriber::fmt::layer()
				.with_writer(file)
				.with_ansi(false)
				.with_span_events(FmtSpan::CLOSE)
				.with_target(true);

			tracing_subscriber::registry().with(filter).with(file_layer).init();

			tracing::info!(path = ?log_path, component, "tracing.initialized");
			return;
		}
	}

	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_max_level(if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO })
		.init();
}
