//! Common utilities for worker integration tests.

use std::collections::VecDeque;
use std::os::unix::net::UnixStream;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use mexec_engine::host::HostConnection;
use mexec_engine::ipc::Channel;
use mexec_engine::runner::ScriptEngine;
use mexec_engine::session::{self, SessionEnd, SessionError, SessionOptions, SessionParts};
use mexec_nu::Outcome;
use mexec_proto::ScriptErrorReport;

/// Parse failure raised by [`ScriptedEngine`].
#[derive(Debug, thiserror::Error)]
#[error("unexpected token")]
pub struct ParseRejected;

/// What a [`ScriptedEngine`] observed, shared with the test thread.
#[derive(Debug, Default)]
pub struct EngineLog {
	pub parsed: Vec<String>,
	pub invocations: usize,
	pub resets: usize,
	pub error_pending: bool,
}

/// Engine that replays queued outcomes and then succeeds.
#[derive(Debug, Default)]
pub struct ScriptedEngine {
	outcomes: VecDeque<Outcome>,
	fail_parse: bool,
	panic_on_invoke: bool,
	log: Arc<Mutex<EngineLog>>,
}

impl ScriptedEngine {
	pub fn new(outcomes: impl IntoIterator<Item = Outcome>) -> (Self, Arc<Mutex<EngineLog>>) {
		let engine = Self {
			outcomes: outcomes.into_iter().collect(),
			..Self::default()
		};
		let log = engine.log.clone();
		(engine, log)
	}

	pub fn failing_parse(mut self) -> Self {
		self.fail_parse = true;
		self
	}

	pub fn panicking(mut self) -> Self {
		self.panic_on_invoke = true;
		self
	}
}

impl ScriptEngine for ScriptedEngine {
	type Error = ParseRejected;

	fn parse(&mut self, script: &str) -> Result<(), ParseRejected> {
		if self.fail_parse {
			return Err(ParseRejected);
		}
		self.log.lock().unwrap().parsed.push(script.to_string());
		Ok(())
	}

	fn invoke(&mut self, _entry_point: &str) -> Outcome {
		assert!(!self.panic_on_invoke, "engine state corrupted");
		let outcome = self.outcomes.pop_front().unwrap_or(Outcome::Success);
		let mut log = self.log.lock().unwrap();
		log.invocations += 1;
		log.error_pending = outcome != Outcome::Success;
		outcome
	}

	fn reset_error(&mut self) {
		let mut log = self.log.lock().unwrap();
		log.error_pending = false;
		log.resets += 1;
	}
}

pub fn script_fault(line: u32) -> Outcome {
	Outcome::ScriptFault(ScriptErrorReport {
		line,
		column: 3,
		source: "nu::shell::division_by_zero".into(),
		description: "Division by zero.".into(),
	})
}

/// Starts a session over a socket pair and returns the raw host end.
pub fn start_raw<E, F>(init: F) -> (UnixStream, JoinHandle<SessionEnd>)
where
	E: ScriptEngine + 'static,
	F: FnOnce() -> Result<SessionParts<E>, SessionError> + Send + 'static,
{
	let (worker, host) = UnixStream::pair().expect("socket pair");
	let handle = session::spawn(Channel::from_stream(worker), SessionOptions::default(), init).expect("spawn session");
	(host, handle)
}

/// Starts a session over a socket pair.
pub fn start<E, F>(init: F) -> (HostConnection, JoinHandle<SessionEnd>)
where
	E: ScriptEngine + 'static,
	F: FnOnce() -> Result<SessionParts<E>, SessionError> + Send + 'static,
{
	let (host, handle) = start_raw(init);
	(HostConnection::from_stream(host), handle)
}

/// Starts a session around `engine`.
pub fn start_with(engine: ScriptedEngine) -> (HostConnection, JoinHandle<SessionEnd>) {
	start(move || Ok(SessionParts::engine_only(engine)))
}
