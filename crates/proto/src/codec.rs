//! Length-prefixed postcard framing.
//!
//! A frame is a little-endian `u32` payload length followed by the payload.
//! Frames are assembled in memory and written with a single `write_all`, so a
//! reader never observes half a message from a healthy writer.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Upper bound on a single frame payload.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = size_of::<u32>();

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum CodecError {
	/// The stream ended cleanly before a new frame started.
	#[error("channel closed")]
	Closed,
	/// The stream ended inside a frame.
	#[error("channel closed mid-frame ({read} of {expected} bytes)")]
	Truncated {
		/// Bytes received before the stream ended.
		read: usize,
		/// Bytes the frame header announced.
		expected: usize,
	},
	/// The frame header announced more than [`MAX_FRAME_LEN`] bytes.
	#[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
	TooLarge(usize),
	/// The payload could not be decoded, including unknown discriminators.
	#[error("malformed frame payload: {0}")]
	Decode(#[source] postcard::Error),
	/// The message could not be encoded.
	#[error("failed to encode frame: {0}")]
	Encode(#[source] postcard::Error),
	/// Underlying I/O failure.
	#[error(transparent)]
	Io(#[from] io::Error),
}

impl CodecError {
	/// Returns true when the error means the peer went away.
	#[must_use]
	pub fn is_disconnect(&self) -> bool {
		match self {
			Self::Closed | Self::Truncated { .. } => true,
			Self::Io(e) => matches!(
				e.kind(),
				io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::UnexpectedEof
			),
			_ => false,
		}
	}
}

/// Encodes `msg` into a complete frame.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails and
/// [`CodecError::TooLarge`] if the payload does not fit a frame.
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>, CodecError> {
	let payload = postcard::to_allocvec(msg).map_err(CodecError::Encode)?;
	if payload.len() > MAX_FRAME_LEN {
		return Err(CodecError::TooLarge(payload.len()));
	}
	let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
	frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
	frame.extend_from_slice(&payload);
	Ok(frame)
}

/// Encodes `msg` and writes it as one unit.
///
/// # Errors
///
/// Propagates encoding errors and I/O failures.
pub fn write_frame<T: Serialize>(writer: &mut impl Write, msg: &T) -> Result<(), CodecError> {
	let frame = encode_frame(msg)?;
	writer.write_all(&frame)?;
	writer.flush()?;
	Ok(())
}

/// Blocks until one frame has been read and decodes it.
///
/// # Errors
///
/// Returns [`CodecError::Closed`] on a clean end of stream, and the other
/// variants for truncated, oversized or undecodable frames.
pub fn read_frame<T: DeserializeOwned>(reader: &mut impl Read) -> Result<T, CodecError> {
	let mut header = [0u8; LEN_PREFIX];
	let got = read_full(reader, &mut header)?;
	if got == 0 {
		return Err(CodecError::Closed);
	}
	if got < LEN_PREFIX {
		return Err(CodecError::Truncated {
			read: got,
			expected: LEN_PREFIX,
		});
	}

	let len = u32::from_le_bytes(header) as usize;
	if len > MAX_FRAME_LEN {
		return Err(CodecError::TooLarge(len));
	}

	let mut payload = vec![0u8; len];
	let got = read_full(reader, &mut payload)?;
	if got < len {
		return Err(CodecError::Truncated { read: got, expected: len });
	}

	postcard::from_bytes(&payload).map_err(CodecError::Decode)
}

/// Reads until `buf` is full or the stream ends, returning the bytes read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
	let mut filled = 0;
	while filled < buf.len() {
		match reader.read(&mut buf[filled..]) {
			Ok(0) => break,
			Ok(n) => filled += n,
			Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
			Err(e) => return Err(e),
		}
	}
	Ok(filled)
}
