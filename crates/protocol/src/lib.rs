//! Wire-level building blocks for the request/response protocol.
//!
//! This crate owns everything that crosses the wire:
//! - [`Payload`], the data + metadata unit exchanged between peers
//! - [`Frame`] and [`FrameType`], the envelope correlating a payload to a request
//! - [`FrameCodec`], a `tokio_util` codec reading and writing frames
//!
//! # Frame layout
//!
//! ```text
//! [request id: u32 BE][type: u8][data len: varint][data][md flag: u8][md len: varint][metadata]
//! ```
//!
//! The metadata length and bytes are only present when the flag is `1`. The
//! layout is self-delimiting, so frames can be concatenated on a byte stream.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod codec;
pub mod error;
pub mod frame;
pub mod payload;

pub use codec::{FrameCodec, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use frame::{Frame, FrameType, RequestId};
pub use payload::{Payload, PayloadBuilder};

// Re-export dependencies that are part of our public API
pub use bytes::Bytes;
