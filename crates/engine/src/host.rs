//! Host half of the channel.
//!
//! Used by `mexec-run` and by tests to drive a worker the way the host does:
//! bind the correlation-keyed socket, wait for the worker to connect, then
//! exchange frames.

use std::io::{self, ErrorKind};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use mexec_proto::{CodecError, Packet, WorkerMessage, read_frame, write_frame};

const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// A bound host socket awaiting a worker.
///
/// The socket file is removed when the listener is dropped.
#[derive(Debug)]
pub struct HostListener {
	listener: UnixListener,
	path: PathBuf,
}

impl HostListener {
	/// Binds `path`, replacing a stale socket file left by an earlier run.
	///
	/// # Errors
	///
	/// Fails when the directory cannot be created or the socket cannot be
	/// bound.
	pub fn bind(path: &Path) -> io::Result<Self> {
		if let Some(parent) = path.parent()
			&& !parent.exists()
		{
			std::fs::create_dir_all(parent)?;
		}
		if path.exists() {
			std::fs::remove_file(path)?;
		}

		let listener = UnixListener::bind(path)?;
		tracing::info!(path = %path.display(), "host.listening");
		Ok(Self {
			listener,
			path: path.to_path_buf(),
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Waits up to `timeout` for the worker to connect.
	///
	/// # Errors
	///
	/// Returns [`ErrorKind::TimedOut`] if nobody connects in time.
	pub fn accept_timeout(&self, timeout: Duration) -> io::Result<HostConnection> {
		self.listener.set_nonblocking(true)?;
		let deadline = Instant::now() + timeout;
		loop {
			match self.listener.accept() {
				Ok((stream, _)) => {
					stream.set_nonblocking(false)?;
					tracing::debug!("host.accepted");
					return Ok(HostConnection::from_stream(stream));
				}
				Err(error) if error.kind() == ErrorKind::WouldBlock => {
					if Instant::now() >= deadline {
						return Err(io::Error::new(ErrorKind::TimedOut, "worker did not connect"));
					}
					std::thread::sleep(ACCEPT_POLL);
				}
				Err(error) => return Err(error),
			}
		}
	}
}

impl Drop for HostListener {
	fn drop(&mut self) {
		let _ = std::fs::remove_file(&self.path);
	}
}

/// An accepted worker connection.
#[derive(Debug)]
pub struct HostConnection {
	stream: UnixStream,
}

impl HostConnection {
	pub fn from_stream(stream: UnixStream) -> Self {
		Self { stream }
	}

	/// Sends one packet.
	///
	/// # Errors
	///
	/// Fails if the worker is gone or the packet cannot be encoded.
	pub fn send(&mut self, packet: &Packet) -> Result<(), CodecError> {
		write_frame(&mut self.stream, packet)
	}

	/// Reads the next worker message.
	///
	/// # Errors
	///
	/// Returns [`CodecError::Closed`] once the worker has closed the channel.
	pub fn recv(&mut self) -> Result<WorkerMessage, CodecError> {
		read_frame(&mut self.stream)
	}

	/// Sends `packet` and waits for the reply that answers it.
	///
	/// # Errors
	///
	/// Fails if the channel breaks, or if the worker answers with its closing
	/// handshake instead of a reply.
	pub fn request(&mut self, packet: &Packet) -> Result<WorkerMessage, CodecError> {
		self.send(packet)?;
		match self.recv()? {
			WorkerMessage::Shutdown => Err(CodecError::Closed),
			reply => Ok(reply),
		}
	}

	/// Requests shutdown and drains the worker's reply up to end of stream.
	///
	/// Returns true if the worker completed the handshake.
	pub fn shutdown(mut self) -> bool {
		if let Err(error) = self.send(&Packet::Shutdown) {
			tracing::debug!(%error, "host.shutdown.send_failed");
		}
		let mut acknowledged = false;
		while let Ok(msg) = self.recv() {
			acknowledged |= msg == WorkerMessage::Shutdown;
		}
		acknowledged
	}
}
