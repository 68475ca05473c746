//! The execution loop.
//!
//! A session owns the channel, the runner and any loaded dependencies, and
//! lives on one dedicated thread for its whole life. The engine is built on
//! that thread and never leaves it.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::thread::JoinHandle;

use mexec_nu::EngineError;
use mexec_proto::{HostFaultReport, Packet, WorkerMessage};
use thiserror::Error;

use crate::ORIGIN;
use crate::ipc::{Channel, ChannelError};
use crate::reporter::Reporter;
use crate::resolver::{LoadedDependency, ResolveError};
use crate::runner::{MacroRunner, RunError, ScriptEngine};
use crate::script::{self, DEFAULT_MAX_SCRIPT_BYTES, ScriptInputError};

/// Name of the session thread.
pub const THREAD_NAME: &str = "mexec-exec";

/// Per-session limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
	/// Largest accepted macro source, in bytes.
	pub max_script_bytes: usize,
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self {
			max_script_bytes: DEFAULT_MAX_SCRIPT_BYTES,
		}
	}
}

/// What a session needs besides its channel, built on the session thread.
#[derive(Debug)]
pub struct SessionParts<E> {
	/// Engine driven by the session's runner.
	pub engine: E,
	/// Libraries kept loaded until the session ends.
	pub dependencies: Vec<LoadedDependency>,
}

impl<E> SessionParts<E> {
	/// Parts with no preloaded dependencies.
	pub fn engine_only(engine: E) -> Self {
		Self {
			engine,
			dependencies: Vec::new(),
		}
	}
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
	/// The host closed the channel.
	Disconnected,
	/// The host sent [`Packet::Shutdown`].
	ShutdownRequested,
	/// An error or panic ended the session; it was reported as a host fault.
	Faulted,
}

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
	#[error("failed to read packet: {0}")]
	Read(#[source] ChannelError),
	#[error("invalid script input: {0}")]
	Script(#[from] ScriptInputError),
	#[error("macro run aborted: {0}")]
	Run(#[from] RunError),
	#[error("dependency resolution failed: {0}")]
	Resolve(#[from] ResolveError),
	#[error("engine setup failed: {0}")]
	Engine(#[from] EngineError),
}

impl SessionError {
	/// The operation that failed, as reported to the host.
	pub const fn target_site(&self) -> &'static str {
		match self {
			Self::Read(_) => "read_packet",
			Self::Script(_) => "extract_script",
			Self::Run(_) => "run_macro",
			Self::Resolve(_) => "resolve_dependency",
			Self::Engine(_) => "create_engine",
		}
	}

	fn to_report(&self) -> HostFaultReport {
		HostFaultReport::from_error(self, ORIGIN, self.target_site())
	}
}

/// One worker session over one channel.
pub struct Session<E> {
	channel: Channel,
	runner: MacroRunner<E>,
	options: SessionOptions,
	_dependencies: Vec<LoadedDependency>,
	requests: u64,
}

impl<E: ScriptEngine> Session<E> {
	/// Creates a session over a connected channel. Nothing is read until
	/// [`Session::run`].
	pub fn new(channel: Channel, parts: SessionParts<E>, options: SessionOptions) -> Self {
		Self {
			channel,
			runner: MacroRunner::new(parts.engine),
			options,
			_dependencies: parts.dependencies,
			requests: 0,
		}
	}

	/// Serves packets until shutdown, disconnect or failure, then tears the
	/// channel down.
	///
	/// Failures and panics are reported to the host as a host fault when the
	/// channel is still open. The closing handshake is always attempted.
	pub fn run(mut self) -> SessionEnd {
		let result = panic::catch_unwind(AssertUnwindSafe(|| self.serve()));

		let end = match result {
			Ok(Ok(end)) => end,
			Ok(Err(error)) => {
				tracing::error!(%error, target_site = error.target_site(), "session.failed");
				Reporter::new(&mut self.channel).host_fault(error.to_report());
				SessionEnd::Faulted
			}
			Err(payload) => {
				let report = HostFaultReport::from_panic(payload.as_ref(), ORIGIN, "serve");
				tracing::error!(message = %report.message, "session.panicked");
				Reporter::new(&mut self.channel).host_fault(report);
				SessionEnd::Faulted
			}
		};

		self.channel.shutdown();
		tracing::info!(?end, requests = self.requests, "session.ended");
		end
	}

	fn serve(&mut self) -> Result<SessionEnd, SessionError> {
		loop {
			let packet = match self.channel.read_packet() {
				Ok(packet) => packet,
				Err(ChannelError::Disconnected) => return Ok(SessionEnd::Disconnected),
				Err(error) => return Err(SessionError::Read(error)),
			};
			tracing::debug!(kind = packet.kind(), "session.packet");

			match packet {
				Packet::Shutdown => return Ok(SessionEnd::ShutdownRequested),
				Packet::ScriptRequest { path_or_script, iterations } => {
					self.requests += 1;
					let span = tracing::info_span!("request", seq = self.requests, iterations);
					let _guard = span.enter();

					let reply = self.handle_request(&path_or_script, iterations)?;
					tracing::info!(reply = reply.kind(), "request.done");
					let mut reporter = Reporter::new(&mut self.channel);
					match reply {
						WorkerMessage::Success => reporter.success(),
						WorkerMessage::ScriptError(report) => reporter.script_error(report),
						WorkerMessage::HostFault(report) => reporter.host_fault(report),
						other => reporter.send(&other),
					}
				}
			}
		}
	}

	fn handle_request(&mut self, path_or_script: &str, iterations: i32) -> Result<WorkerMessage, SessionError> {
		let body = script::extract(path_or_script, self.options.max_script_bytes)?;
		Ok(self.runner.run(&script::wrap(&body), iterations)?)
	}
}

/// Starts a session on a dedicated named thread.
///
/// `init` runs on that thread and builds the engine and dependencies. If it
/// fails or panics the host receives a host fault and the closing handshake.
///
/// # Errors
///
/// Returns an error if the thread cannot be spawned.
pub fn spawn<E, F>(channel: Channel, options: SessionOptions, init: F) -> io::Result<JoinHandle<SessionEnd>>
where
	E: ScriptEngine + 'static,
	F: FnOnce() -> Result<SessionParts<E>, SessionError> + Send + 'static,
{
	tracing::trace!(thread = THREAD_NAME, "session.spawn");
	std::thread::Builder::new().name(THREAD_NAME.to_string()).spawn(move || {
		let mut channel = channel;
		let report = match panic::catch_unwind(AssertUnwindSafe(init)) {
			Ok(Ok(parts)) => return Session::new(channel, parts, options).run(),
			Ok(Err(error)) => {
				tracing::error!(%error, "session.init_failed");
				error.to_report()
			}
			Err(payload) => HostFaultReport::from_panic(payload.as_ref(), ORIGIN, "init"),
		};

		Reporter::new(&mut channel).host_fault(report);
		channel.shutdown();
		SessionEnd::Faulted
	})
}
