//! Macro runner: parse once, invoke the entry point up to N times.

use std::error::Error;

use mexec_nu::{EngineError, NuEngine, Outcome};
use mexec_proto::WorkerMessage;
use thiserror::Error;

use crate::script::{ENTRY_POINT, WRAPPER_PROLOGUE_LINES};

/// The scripting engine as seen by the runner.
///
/// Implementations are driven from a single thread and keep whatever error
/// state they need until [`ScriptEngine::reset_error`] is called.
pub trait ScriptEngine {
	/// Error returned when a script fails to parse.
	type Error: Error + Send + Sync + 'static;

	/// Parses `script`, making its entry point callable.
	fn parse(&mut self, script: &str) -> Result<(), Self::Error>;

	/// Invokes `entry_point` once and classifies the result.
	fn invoke(&mut self, entry_point: &str) -> Outcome;

	/// Clears any error state left by a failed invocation.
	fn reset_error(&mut self);
}

impl ScriptEngine for NuEngine {
	type Error = EngineError;

	fn parse(&mut self, script: &str) -> Result<(), EngineError> {
		NuEngine::parse(self, script)
	}

	fn invoke(&mut self, entry_point: &str) -> Outcome {
		NuEngine::invoke(self, entry_point)
	}

	fn reset_error(&mut self) {
		NuEngine::reset_error(self);
	}
}

/// Failures that abort a request instead of answering it.
#[derive(Debug, Error)]
pub enum RunError {
	/// The engine rejected the script.
	#[error("failed to parse script: {0}")]
	Parse(#[source] Box<dyn Error + Send + Sync>),
}

/// Drives a [`ScriptEngine`] through the iterations of one request.
#[derive(Debug)]
pub struct MacroRunner<E> {
	engine: E,
}

impl<E: ScriptEngine> MacroRunner<E> {
	/// Creates a runner that owns `engine`.
	pub fn new(engine: E) -> Self {
		Self { engine }
	}

	/// Returns the wrapped engine.
	pub fn engine(&self) -> &E {
		&self.engine
	}

	/// Parses `script` and invokes the entry point `iterations` times.
	///
	/// Stops at the first failed invocation. Returns the single message that
	/// answers the request: success, a script error with its line shifted
	/// back past the wrapper prologue, or a host fault. Negative iteration
	/// counts run nothing and succeed.
	///
	/// # Errors
	///
	/// Returns [`RunError`] when the script does not parse; that aborts the
	/// session rather than the request.
	pub fn run(&mut self, script: &str, iterations: i32) -> Result<WorkerMessage, RunError> {
		self.engine.parse(script).map_err(|e| RunError::Parse(Box::new(e)))?;

		let iterations = u32::try_from(iterations).unwrap_or(0);
		for iteration in 0..iterations {
			match self.engine.invoke(ENTRY_POINT) {
				Outcome::Success => {}
				Outcome::ScriptFault(mut report) => {
					report.line = report.line.saturating_sub(WRAPPER_PROLOGUE_LINES);
					self.engine.reset_error();
					tracing::info!(iteration, line = report.line, column = report.column, "macro.script_error");
					return Ok(WorkerMessage::ScriptError(report));
				}
				Outcome::HostFault(report) => {
					self.engine.reset_error();
					tracing::warn!(iteration, message = %report.message, "macro.host_fault");
					return Ok(WorkerMessage::HostFault(report));
				}
			}
		}

		tracing::debug!(iterations, "macro.success");
		Ok(WorkerMessage::Success)
	}
}
