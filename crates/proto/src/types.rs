//! Packet and reply types carried by the worker channel.

use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A packet sent by the host to the worker.
///
/// The set of variants is closed. New packet kinds are appended at the end so
/// existing discriminators keep their encoding; a worker that receives a
/// discriminator it does not know fails the frame as a protocol error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
	/// Run a script a number of times.
	ScriptRequest {
		/// A path to a script file, or the script source itself.
		path_or_script: String,
		/// Number of times the script entry point is invoked.
		///
		/// Negative counts behave like zero.
		iterations: i32,
	},
	/// Ask the worker to end the session.
	Shutdown,
}

impl Packet {
	/// Builds a [`Packet::ScriptRequest`].
	#[must_use]
	pub fn script(path_or_script: impl Into<String>, iterations: i32) -> Self {
		Self::ScriptRequest {
			path_or_script: path_or_script.into(),
			iterations,
		}
	}

	/// Short name used in logs.
	#[must_use]
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::ScriptRequest { .. } => "script_request",
			Self::Shutdown => "shutdown",
		}
	}
}

/// A message sent by the worker to the host.
///
/// `Success`, `ScriptError` and `HostFault` are terminal: exactly one of them
/// answers each [`Packet::ScriptRequest`]. `Shutdown` is the worker's half of
/// the closing handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerMessage {
	/// Every iteration of the request completed.
	Success,
	/// The script failed at runtime.
	ScriptError(ScriptErrorReport),
	/// The worker or the engine failed for reasons unrelated to script content.
	HostFault(HostFaultReport),
	/// The worker is about to close the channel.
	Shutdown,
}

impl WorkerMessage {
	/// Returns true for the messages that answer a script request.
	#[must_use]
	pub const fn is_terminal(&self) -> bool {
		!matches!(self, Self::Shutdown)
	}

	/// Short name used in logs.
	#[must_use]
	pub const fn kind(&self) -> &'static str {
		match self {
			Self::Success => "success",
			Self::ScriptError(_) => "script_error",
			Self::HostFault(_) => "host_fault",
			Self::Shutdown => "shutdown",
		}
	}
}

/// Location and text of a script runtime error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptErrorReport {
	/// 1-based line in the user's script.
	pub line: u32,
	/// 1-based character column on that line.
	pub column: u32,
	/// Component that raised the error, usually a diagnostic code.
	pub source: String,
	/// Human-readable description.
	pub description: String,
}

/// Diagnostic detail for a host or internal fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFaultReport {
	/// Error message.
	pub message: String,
	/// Originating component.
	pub source: String,
	/// Call-stack description at the point the fault was captured.
	pub stack_trace: String,
	/// The operation or member that failed.
	pub target_site: String,
}

impl HostFaultReport {
	/// Builds a report from any error.
	///
	/// `source` lists the error's cause chain, outermost first, or `origin`
	/// when the error has no cause. The stack trace is always captured
	/// here, whether or not `RUST_BACKTRACE` is set.
	pub fn from_error(error: &(dyn Error + 'static), origin: &str, target_site: impl Into<String>) -> Self {
		let mut causes = Vec::new();
		let mut cause = error.source();
		while let Some(inner) = cause {
			causes.push(inner.to_string());
			cause = inner.source();
		}
		let source = if causes.is_empty() { origin.to_string() } else { causes.join(": ") };

		Self {
			message: error.to_string(),
			source,
			stack_trace: Backtrace::force_capture().to_string(),
			target_site: target_site.into(),
		}
	}

	/// Builds a report from a caught panic payload.
	pub fn from_panic(payload: &(dyn std::any::Any + Send), origin: &str, target_site: impl Into<String>) -> Self {
		let message = if let Some(s) = payload.downcast_ref::<&str>() {
			(*s).to_string()
		} else if let Some(s) = payload.downcast_ref::<String>() {
			s.clone()
		} else {
			"panic with non-string payload".to_string()
		};

		Self {
			message: format!("panicked: {message}"),
			source: origin.to_string(),
			stack_trace: Backtrace::force_capture().to_string(),
			target_site: target_site.into(),
		}
	}
}

impl fmt::Display for HostFaultReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} (source: {}, at: {})", self.message, self.source, self.target_site)
	}
}

impl fmt::Display for ScriptErrorReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}: {} ({})", self.line, self.column, self.description, self.source)
	}
}
