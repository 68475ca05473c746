//! Outbound replies to the host.

use mexec_proto::{HostFaultReport, ScriptErrorReport, WorkerMessage};

use crate::ipc::Channel;

/// Sends request outcomes over a [`Channel`].
///
/// Sending never fails from the caller's point of view: a disconnected
/// channel makes every call a no-op and write failures are only logged.
#[derive(Debug)]
pub struct Reporter<'a> {
	channel: &'a mut Channel,
}

impl<'a> Reporter<'a> {
	pub fn new(channel: &'a mut Channel) -> Self {
		Self { channel }
	}

	/// Sends `msg` if the channel is still connected.
	pub fn send(&mut self, msg: &WorkerMessage) {
		if !self.channel.is_connected() {
			tracing::debug!(kind = msg.kind(), "report.skipped.disconnected");
			return;
		}
		match self.channel.send(msg) {
			Ok(()) => tracing::debug!(kind = msg.kind(), "report.sent"),
			Err(error) => tracing::warn!(kind = msg.kind(), %error, "report.failed"),
		}
	}

	pub fn success(&mut self) {
		self.send(&WorkerMessage::Success);
	}

	/// Reports a script runtime error.
	pub fn script_error(&mut self, report: ScriptErrorReport) {
		self.send(&WorkerMessage::ScriptError(report));
	}

	/// Reports a host or internal fault.
	pub fn host_fault(&mut self, report: HostFaultReport) {
		self.send(&WorkerMessage::HostFault(report));
	}
}
