//! Protocol-level errors.

use thiserror::Error;

/// Errors raised while decoding or validating frames.
///
/// The frame stream is not self-resynchronizing, so every variant except
/// [`ProtocolError::UnknownRequestId`] is fatal for the connection that
/// produced it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame type byte outside the known range.
    #[error("Unknown frame type: {0:#04x}")]
    UnknownFrameType(u8),

    /// Metadata presence flag other than 0 or 1.
    #[error("Invalid metadata flag: {0:#04x}")]
    InvalidMetadataFlag(u8),

    /// Length varint did not terminate within 10 bytes.
    #[error("Malformed varint in {field} length")]
    MalformedVarint {
        /// Which length field was being read.
        field: &'static str,
    },

    /// Frame exceeds the configured maximum size.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Size of the frame.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Message-framed transport delivered less than one whole frame.
    #[error("Truncated frame: {0} bytes")]
    TruncatedFrame(usize),

    /// Message-framed transport delivered more than one frame.
    #[error("Trailing bytes after frame: {0}")]
    TrailingBytes(usize),

    /// Transport delivered a message kind that cannot carry a frame.
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    /// RESPONSE or ERROR frame for a request that is not pending.
    #[error("Unknown request id: {0}")]
    UnknownRequestId(u32),
}
