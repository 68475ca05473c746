use std::io::Write;
use std::net::Shutdown;

use mexec_engine::resolver::ResolveError;
use mexec_engine::session::{SessionEnd, SessionError, SessionParts};
use mexec_nu::Outcome;
use mexec_proto::{CodecError, Packet, WorkerMessage, read_frame};
use pretty_assertions::assert_eq;

use crate::common::{ScriptedEngine, script_fault, start, start_raw, start_with};

fn expect_host_fault(msg: WorkerMessage) -> mexec_proto::HostFaultReport {
	match msg {
		WorkerMessage::HostFault(report) => report,
		other => panic!("expected host fault, got {other:?}"),
	}
}

#[test]
fn every_iteration_succeeds() {
	let (engine, log) = ScriptedEngine::new([]);
	let (mut host, handle) = start_with(engine);

	for k in [1, 3, 5] {
		assert_eq!(host.request(&Packet::script("let x = 1", k)).unwrap(), WorkerMessage::Success);
	}

	assert!(host.shutdown());
	assert_eq!(handle.join().unwrap(), SessionEnd::ShutdownRequested);
	let log = log.lock().unwrap();
	assert_eq!(log.invocations, 9);
	assert_eq!(log.parsed.len(), 3);
	assert!(log.parsed[0].starts_with("def current-script [] {\nlet x = 1\n"));
}

#[test]
fn first_script_error_ends_the_request() {
	let (engine, log) = ScriptedEngine::new([Outcome::Success, Outcome::Success, script_fault(10)]);
	let (mut host, handle) = start_with(engine);

	let reply = host.request(&Packet::script("validMacro", 5)).unwrap();
	match reply {
		WorkerMessage::ScriptError(report) => {
			assert_eq!(report.line, 9);
			assert_eq!(report.column, 3);
		}
		other => panic!("expected script error, got {other:?}"),
	}
	assert_eq!(log.lock().unwrap().invocations, 3);

	assert!(host.shutdown());
	assert_eq!(handle.join().unwrap(), SessionEnd::ShutdownRequested);
}

#[test]
fn error_state_is_cleared_before_next_request() {
	let (engine, log) = ScriptedEngine::new([script_fault(2)]);
	let (mut host, handle) = start_with(engine);

	assert!(matches!(host.request(&Packet::script("a", 2)).unwrap(), WorkerMessage::ScriptError(_)));
	assert!(!log.lock().unwrap().error_pending);

	assert_eq!(host.request(&Packet::script("b", 2)).unwrap(), WorkerMessage::Success);
	let snapshot = log.lock().unwrap();
	assert_eq!(snapshot.resets, 1);
	assert_eq!(snapshot.invocations, 3);
	drop(snapshot);

	assert!(host.shutdown());
	handle.join().unwrap();
}

#[test]
fn engine_host_fault_answers_request_and_session_continues() {
	let fault = mexec_proto::HostFaultReport {
		message: "entry point 'current-script' is not defined".into(),
		source: "mexec-nu".into(),
		stack_trace: String::new(),
		target_site: "current-script".into(),
	};
	let (engine, _log) = ScriptedEngine::new([Outcome::HostFault(fault.clone())]);
	let (mut host, handle) = start_with(engine);

	assert_eq!(host.request(&Packet::script("a", 3)).unwrap(), WorkerMessage::HostFault(fault));
	assert_eq!(host.request(&Packet::script("b", 1)).unwrap(), WorkerMessage::Success);

	assert!(host.shutdown());
	assert_eq!(handle.join().unwrap(), SessionEnd::ShutdownRequested);
}

#[test]
fn zero_iterations_succeed_without_invoking() {
	let (engine, log) = ScriptedEngine::new([script_fault(2)]);
	let (mut host, handle) = start_with(engine);

	assert_eq!(host.request(&Packet::script("a", 0)).unwrap(), WorkerMessage::Success);
	assert_eq!(host.request(&Packet::script("a", -4)).unwrap(), WorkerMessage::Success);
	assert_eq!(log.lock().unwrap().invocations, 0);

	assert!(host.shutdown());
	handle.join().unwrap();
}

#[test]
fn unknown_packet_is_a_fatal_protocol_error() {
	let (engine, log) = ScriptedEngine::new([]);
	let (mut host, handle) = start_raw(move || Ok(SessionParts::engine_only(engine)));

	host.write_all(&[1, 0, 0, 0, 0x7f]).unwrap();

	let report = expect_host_fault(read_frame(&mut host).unwrap());
	assert_eq!(report.target_site, "read_packet");
	assert!(report.message.contains("protocol error"), "{report:?}");
	assert_eq!(read_frame::<WorkerMessage>(&mut host).unwrap(), WorkerMessage::Shutdown);
	assert!(matches!(read_frame::<WorkerMessage>(&mut host), Err(CodecError::Closed)));

	assert_eq!(handle.join().unwrap(), SessionEnd::Faulted);
	assert_eq!(log.lock().unwrap().invocations, 0);
}

#[test]
fn disconnect_mid_frame_ends_quietly() {
	let (engine, _log) = ScriptedEngine::new([]);
	let (mut host, handle) = start_raw(move || Ok(SessionParts::engine_only(engine)));

	host.write_all(&[9, 0, 0, 0, 1, 2]).unwrap();
	host.shutdown(Shutdown::Write).unwrap();

	assert_eq!(handle.join().unwrap(), SessionEnd::Disconnected);
	assert!(matches!(read_frame::<WorkerMessage>(&mut host), Err(CodecError::Closed)));
}

#[test]
fn host_hangup_between_requests_ends_session() {
	let (engine, log) = ScriptedEngine::new([]);
	let (mut host, handle) = start_with(engine);

	assert_eq!(host.request(&Packet::script("a", 1)).unwrap(), WorkerMessage::Success);
	drop(host);

	assert_eq!(handle.join().unwrap(), SessionEnd::Disconnected);
	assert_eq!(log.lock().unwrap().invocations, 1);
}

#[test]
fn shutdown_packet_completes_handshake() {
	let (engine, _log) = ScriptedEngine::new([]);
	let (mut host, handle) = start_with(engine);

	host.send(&Packet::Shutdown).unwrap();
	assert_eq!(host.recv().unwrap(), WorkerMessage::Shutdown);
	assert!(matches!(host.recv(), Err(CodecError::Closed)));
	assert_eq!(handle.join().unwrap(), SessionEnd::ShutdownRequested);
}

#[test]
fn parse_failure_is_reported_then_session_closes() {
	let (engine, log) = ScriptedEngine::new([]);
	let (mut host, handle) = start_with(engine.failing_parse());

	host.send(&Packet::script("def", 3)).unwrap();
	let report = expect_host_fault(host.recv().unwrap());
	assert_eq!(report.target_site, "run_macro");
	assert!(report.source.contains("unexpected token"), "{report:?}");
	assert_eq!(host.recv().unwrap(), WorkerMessage::Shutdown);

	assert_eq!(handle.join().unwrap(), SessionEnd::Faulted);
	assert_eq!(log.lock().unwrap().invocations, 0);
}

#[test]
fn empty_script_is_a_host_fault() {
	let (engine, _log) = ScriptedEngine::new([]);
	let (mut host, handle) = start_with(engine);

	host.send(&Packet::script("   ", 1)).unwrap();
	let report = expect_host_fault(host.recv().unwrap());
	assert_eq!(report.target_site, "extract_script");
	assert_eq!(report.source, "script is empty");
	assert_eq!(report.message, "invalid script input: script is empty");
	assert_eq!(handle.join().unwrap(), SessionEnd::Faulted);
}

#[test]
fn script_path_is_read_from_disk() {
	let dir = tempfile::tempdir().unwrap();
	let path = dir.path().join("macro.nu");
	std::fs::write(&path, "let from_disk = 1").unwrap();

	let (engine, log) = ScriptedEngine::new([]);
	let (mut host, handle) = start_with(engine);

	let request = Packet::script(path.to_str().unwrap(), 1);
	assert_eq!(host.request(&request).unwrap(), WorkerMessage::Success);
	assert_eq!(log.lock().unwrap().parsed[0], "def current-script [] {\nlet from_disk = 1\n}\n");

	assert!(host.shutdown());
	handle.join().unwrap();
}

#[test]
fn engine_panic_is_caught_and_reported() {
	let (engine, _log) = ScriptedEngine::new([]);
	let (mut host, handle) = start_with(engine.panicking());

	host.send(&Packet::script("a", 1)).unwrap();
	let report = expect_host_fault(host.recv().unwrap());
	assert!(report.message.starts_with("panicked:"), "{report:?}");
	assert!(report.message.contains("engine state corrupted"));
	assert_eq!(host.recv().unwrap(), WorkerMessage::Shutdown);
	assert_eq!(handle.join().unwrap(), SessionEnd::Faulted);
}

#[test]
fn init_failure_is_reported_before_any_request() {
	let (mut host, handle) = start(|| -> Result<SessionParts<ScriptedEngine>, SessionError> {
		Err(SessionError::Resolve(ResolveError::HostUnavailable { pid: 4242 }))
	});

	let report = expect_host_fault(host.recv().unwrap());
	assert_eq!(report.target_site, "resolve_dependency");
	assert!(report.message.contains("4242"), "{report:?}");
	assert_eq!(host.recv().unwrap(), WorkerMessage::Shutdown);
	assert!(matches!(host.recv(), Err(CodecError::Closed)));
	assert_eq!(handle.join().unwrap(), SessionEnd::Faulted);
}

#[test]
fn init_panic_is_reported() {
	let (mut host, handle) = start(|| -> Result<SessionParts<ScriptedEngine>, SessionError> { panic!("no engine today") });

	let report = expect_host_fault(host.recv().unwrap());
	assert_eq!(report.message, "panicked: no engine today");
	assert_eq!(report.target_site, "init");
	assert_eq!(handle.join().unwrap(), SessionEnd::Faulted);
}
