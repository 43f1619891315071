//! Frame envelope.

use crate::error::ProtocolError;
use crate::payload::Payload;
use bytes::Bytes;
use std::fmt;

/// Per-connection correlator between a request and its response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u32);

impl RequestId {
    /// Id carried by frames that are never correlated (fire-and-forget).
    pub const UNTRACKED: Self = Self(0);

    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Whether this id can belong to a pending request.
    #[must_use]
    pub const fn is_tracked(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for RequestId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Type of frame being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Request expecting exactly one RESPONSE or ERROR.
    RequestResponse = 0,
    /// Request with no reply.
    FireAndForget = 1,
    /// Successful reply to a request-response.
    Response = 2,
    /// Failed reply to a request-response.
    Error = 3,
}

impl FrameType {
    /// Whether this frame starts an interaction on the receiving side.
    #[must_use]
    pub const fn is_request(self) -> bool {
        matches!(self, Self::RequestResponse | Self::FireAndForget)
    }
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::RequestResponse),
            1 => Ok(Self::FireAndForget),
            2 => Ok(Self::Response),
            3 => Ok(Self::Error),
            _ => Err(ProtocolError::UnknownFrameType(value)),
        }
    }
}

/// A frame in the wire protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Request this frame belongs to.
    pub request_id: RequestId,
    /// Type of this frame.
    pub frame_type: FrameType,
    /// Frame payload.
    pub payload: Payload,
}

impl Frame {
    /// Create a new frame.
    #[must_use]
    pub const fn new(request_id: RequestId, frame_type: FrameType, payload: Payload) -> Self {
        Self {
            request_id,
            frame_type,
            payload,
        }
    }

    /// A request-response frame for a tracked id.
    #[must_use]
    pub const fn request_response(request_id: RequestId, payload: Payload) -> Self {
        Self::new(request_id, FrameType::RequestResponse, payload)
    }

    /// A fire-and-forget frame. These are never correlated.
    #[must_use]
    pub const fn fire_and_forget(payload: Payload) -> Self {
        Self::new(RequestId::UNTRACKED, FrameType::FireAndForget, payload)
    }

    /// A successful reply.
    #[must_use]
    pub const fn response(request_id: RequestId, payload: Payload) -> Self {
        Self::new(request_id, FrameType::Response, payload)
    }

    /// A failed reply carrying a UTF-8 message.
    #[must_use]
    pub fn error(request_id: RequestId, message: &str) -> Self {
        let payload = Payload::new(Bytes::copy_from_slice(message.as_bytes()), None);
        Self::new(request_id, FrameType::Error, payload)
    }

    /// The message carried by an ERROR frame.
    #[must_use]
    pub fn error_message(&self) -> String {
        String::from_utf8_lossy(self.payload.data()).into_owned()
    }

    /// Exact number of bytes this frame occupies on the wire.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        let data_len = self.payload.data().len();
        let metadata_len = self.payload.metadata().map_or(0, |m| {
            prost::encoding::encoded_len_varint(m.len() as u64) + m.len()
        });

        crate::codec::FIXED_HEADER_SIZE
            + prost::encoding::encoded_len_varint(data_len as u64)
            + data_len
            + 1
            + metadata_len
    }
}
