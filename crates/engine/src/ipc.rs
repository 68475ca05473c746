//! Worker side of the host channel.

use std::io;
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use mexec_proto::{CodecError, Packet, WorkerMessage, read_frame, write_frame};
use thiserror::Error;

/// Errors raised by [`Channel`] operations.
#[derive(Debug, Error)]
pub enum ChannelError {
	/// The host closed the channel or it was closed locally.
	#[error("channel disconnected")]
	Disconnected,
	/// The host socket could not be reached.
	#[error("failed to connect to host channel {path}: {error}")]
	Connect {
		/// Socket path.
		path: PathBuf,
		/// The underlying I/O error.
		#[source]
		error: io::Error,
	},
	/// A frame was malformed or could not be written.
	#[error("protocol error: {0}")]
	Protocol(#[source] CodecError),
}

/// A blocking, framed connection to the host.
///
/// Once a read or write observes the peer going away the channel reports
/// itself disconnected and refuses further traffic.
#[derive(Debug)]
pub struct Channel {
	stream: Option<UnixStream>,
	connected: bool,
}

impl Channel {
	/// Connects to the host's socket at `path`.
	///
	/// # Errors
	///
	/// Returns [`ChannelError::Connect`] if the socket cannot be reached.
	pub fn connect(path: &Path) -> Result<Self, ChannelError> {
		let stream = UnixStream::connect(path).map_err(|error| ChannelError::Connect {
			path: path.to_path_buf(),
			error,
		})?;
		tracing::info!(path = %path.display(), "channel.connected");
		Ok(Self::from_stream(stream))
	}

	/// Wraps an already connected stream.
	pub fn from_stream(stream: UnixStream) -> Self {
		Self {
			stream: Some(stream),
			connected: true,
		}
	}

	/// Returns true while the host end is believed to be open.
	pub fn is_connected(&self) -> bool {
		self.connected
	}

	/// Blocks until the next packet arrives.
	///
	/// # Errors
	///
	/// Returns [`ChannelError::Disconnected`] when the host went away,
	/// including mid-frame, and [`ChannelError::Protocol`] for frames that
	/// cannot be decoded.
	pub fn read_packet(&mut self) -> Result<Packet, ChannelError> {
		if !self.connected {
			return Err(ChannelError::Disconnected);
		}
		let stream = self.stream.as_mut().ok_or(ChannelError::Disconnected)?;
		match read_frame(stream) {
			Ok(packet) => Ok(packet),
			Err(error) => Err(self.fail(error)),
		}
	}

	/// Writes one message as a single frame.
	///
	/// # Errors
	///
	/// Returns [`ChannelError::Disconnected`] if the channel is closed or the
	/// write hits a closed peer.
	pub fn send(&mut self, msg: &WorkerMessage) -> Result<(), ChannelError> {
		if !self.connected {
			return Err(ChannelError::Disconnected);
		}
		let stream = self.stream.as_mut().ok_or(ChannelError::Disconnected)?;
		match write_frame(stream, msg) {
			Ok(()) => Ok(()),
			Err(error) => Err(self.fail(error)),
		}
	}

	/// Sends the closing handshake if still connected, then closes.
	pub fn shutdown(&mut self) {
		if self.connected {
			match self.send(&WorkerMessage::Shutdown) {
				Ok(()) => tracing::debug!("channel.shutdown.sent"),
				Err(error) => tracing::debug!(%error, "channel.shutdown.failed"),
			}
		}
		self.close();
	}

	/// Closes the channel. Safe to call any number of times.
	pub fn close(&mut self) {
		self.connected = false;
		if let Some(stream) = self.stream.take() {
			if let Err(error) = stream.shutdown(Shutdown::Both)
				&& error.kind() != io::ErrorKind::NotConnected
			{
				tracing::debug!(%error, "channel.close");
			}
			tracing::info!("channel.closed");
		}
	}

	fn fail(&mut self, error: CodecError) -> ChannelError {
		if error.is_disconnect() {
			self.connected = false;
			tracing::info!(%error, "channel.disconnected");
			ChannelError::Disconnected
		} else {
			ChannelError::Protocol(error)
		}
	}
}

impl Drop for Channel {
	fn drop(&mut self) {
		self.close();
	}
}
