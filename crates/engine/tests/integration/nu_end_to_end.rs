use mexec_engine::host::HostConnection;
use mexec_engine::session::{SessionEnd, SessionParts};
use mexec_nu::{EngineOptions, HostContext, NuEngine};
use mexec_proto::{Packet, WorkerMessage};
use pretty_assertions::assert_eq;

use crate::common::start;

fn start_nu() -> (HostConnection, std::thread::JoinHandle<SessionEnd>) {
	start(|| {
		let host = HostContext {
			pid: std::process::id(),
			version: "17.0".to_string(),
		};
		Ok(SessionParts::engine_only(NuEngine::new(host, &EngineOptions::default())?))
	})
}

#[test]
fn clean_macro_succeeds_every_iteration() {
	let (mut host, handle) = start_nu();

	let script = "mut total = 0\nfor i in [1 2 3] { $total += $i }\nif $total != 6 { error make {msg: \"bad sum\"} }";
	assert_eq!(host.request(&Packet::script(script, 4)).unwrap(), WorkerMessage::Success);

	assert!(host.shutdown());
	assert_eq!(handle.join().unwrap(), SessionEnd::ShutdownRequested);
}

#[test]
fn runtime_error_line_matches_user_source() {
	let (mut host, handle) = start_nu();

	let script = "let a = 1\nlet b = 0\nlet c = $a / $b";
	match host.request(&Packet::script(script, 3)).unwrap() {
		WorkerMessage::ScriptError(report) => {
			assert_eq!(report.line, 3, "{report:?}");
			assert!(report.column >= 1);
			assert!(report.description.to_lowercase().contains("division"), "{report:?}");
		}
		other => panic!("expected script error, got {other:?}"),
	}

	assert_eq!(host.request(&Packet::script("let ok = 1", 2)).unwrap(), WorkerMessage::Success);

	assert!(host.shutdown());
	handle.join().unwrap();
}

#[test]
fn error_on_first_line_is_line_one() {
	let (mut host, handle) = start_nu();

	match host.request(&Packet::script("let z = 0; let q = 1 / $z", 1)).unwrap() {
		WorkerMessage::ScriptError(report) => {
			assert_eq!(report.line, 1, "{report:?}");
			assert!(report.column > 1, "{report:?}");
		}
		other => panic!("expected script error, got {other:?}"),
	}

	assert!(host.shutdown());
	handle.join().unwrap();
}

#[test]
fn host_info_reports_launching_host() {
	let (mut host, handle) = start_nu();

	let script = format!(
		"let info = host info\nif $info.pid != {} or $info.version != \"17.0\" {{ error make {{msg: \"wrong host\"}} }}",
		std::process::id()
	);
	assert_eq!(host.request(&Packet::script(script, 1)).unwrap(), WorkerMessage::Success);

	assert!(host.shutdown());
	handle.join().unwrap();
}

#[test]
fn unparsable_macro_faults_the_session() {
	let (mut host, handle) = start_nu();

	host.send(&Packet::script("let = ", 1)).unwrap();
	match host.recv().unwrap() {
		WorkerMessage::HostFault(report) => assert_eq!(report.target_site, "run_macro"),
		other => panic!("expected host fault, got {other:?}"),
	}
	assert_eq!(host.recv().unwrap(), WorkerMessage::Shutdown);
	assert_eq!(handle.join().unwrap(), SessionEnd::Faulted);
}

#[test]
fn helper_error_is_a_script_error_in_later_requests() {
	let (mut host, handle) = start_nu();
	let script = "def helper [] {\n  let z = 0\n  1 / $z\n}\nhelper";

	assert_eq!(host.request(&Packet::script("let warmup = 1", 1)).unwrap(), WorkerMessage::Success);
	for _ in 0..2 {
		match host.request(&Packet::script(script, 1)).unwrap() {
			WorkerMessage::ScriptError(report) => assert_eq!(report.line, 3, "{report:?}"),
			other => panic!("expected script error, got {other:?}"),
		}
	}

	assert!(host.shutdown());
	handle.join().unwrap();
}
