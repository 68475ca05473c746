//! Shared wire types for the mexec worker channel.
//!
//! This crate defines the messages exchanged between a host process and the
//! `mexec-engine` worker over a Unix domain socket. Every message travels as a
//! self-contained frame: a little-endian `u32` payload length followed by a
//! postcard-encoded payload.

#![warn(missing_docs)]

pub mod codec;
pub mod paths;
pub mod types;

pub use codec::{CodecError, MAX_FRAME_LEN, encode_frame, read_frame, write_frame};
pub use types::*;
