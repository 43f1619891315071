//! Frame codec for the wire protocol.

use crate::error::ProtocolError;
use crate::frame::{Frame, FrameType, RequestId};
use crate::payload::Payload;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io;
use std::ops::Range;
use tokio_util::codec::{Decoder, Encoder};

/// Maximum frame size (10MB by default).
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Request id (4 bytes) + frame type (1 byte).
pub(crate) const FIXED_HEADER_SIZE: usize = 5;

/// Longest LEB128 encoding of a u64.
const MAX_VARINT_LEN: usize = 10;

/// Codec for encoding/decoding frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

/// Byte ranges of one complete frame at the front of a buffer.
struct Layout {
    request_id: RequestId,
    frame_type: FrameType,
    data: Range<usize>,
    metadata: Option<Range<usize>>,
    total: usize,
}

enum Scan {
    Complete(Layout),
    Incomplete { at_least: usize },
}

impl FrameCodec {
    /// Create a new frame codec.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Create a codec with custom max frame size.
    #[must_use]
    pub const fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// The largest frame this codec accepts, in bytes.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Check that a frame fits before it is queued for sending.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::FrameTooLarge`] if the encoded frame exceeds
    /// the maximum size.
    pub fn check_size(&self, frame: &Frame) -> Result<(), ProtocolError> {
        let size = frame.encoded_len();
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        Ok(())
    }

    /// Encode a single frame into its own buffer.
    ///
    /// Used by message-framed transports where one message carries one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame exceeds the maximum size.
    pub fn encode_frame(&self, frame: &Frame) -> Result<Bytes, ProtocolError> {
        self.check_size(frame)?;
        let mut buf = BytesMut::with_capacity(frame.encoded_len());
        write_frame(frame, &mut buf);
        Ok(buf.freeze())
    }

    /// Decode a buffer that must hold exactly one frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer is malformed, holds less than one
    /// frame, or has bytes left over after the frame.
    pub fn decode_frame(&self, bytes: Bytes) -> Result<Frame, ProtocolError> {
        match self.scan(&bytes)? {
            Scan::Complete(layout) if layout.total == bytes.len() => Ok(build(&bytes, layout)),
            Scan::Complete(layout) => Err(ProtocolError::TrailingBytes(
                bytes.len() - layout.total,
            )),
            Scan::Incomplete { .. } => Err(ProtocolError::TruncatedFrame(bytes.len())),
        }
    }

    fn check_len(&self, len: u64, so_far: usize) -> Result<usize, ProtocolError> {
        let size = usize::try_from(len)
            .ok()
            .and_then(|len| len.checked_add(so_far))
            .unwrap_or(usize::MAX);
        if size > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_frame_size,
            });
        }
        // size - so_far cannot underflow: size >= so_far by construction
        Ok(size - so_far)
    }

    /// Locate the first frame in `buf` without consuming anything.
    fn scan(&self, buf: &[u8]) -> Result<Scan, ProtocolError> {
        if buf.len() < FIXED_HEADER_SIZE {
            return Ok(Scan::Incomplete {
                at_least: FIXED_HEADER_SIZE,
            });
        }

        let mut header = &buf[..FIXED_HEADER_SIZE];
        let request_id = RequestId::new(header.get_u32());
        let frame_type = FrameType::try_from(header.get_u8())?;
        let mut pos = FIXED_HEADER_SIZE;

        let Some((data_len, width)) = peek_varint(&buf[pos..], "data")? else {
            return Ok(Scan::Incomplete { at_least: pos + 1 });
        };
        pos += width;
        let data_len = self.check_len(data_len, pos + 1)?;
        let data = pos..pos + data_len;
        pos += data_len;

        // Metadata flag
        if buf.len() <= pos {
            return Ok(Scan::Incomplete { at_least: pos + 1 });
        }
        let flag = buf[pos];
        pos += 1;

        let metadata = match flag {
            0 => None,
            1 => {
                let Some((metadata_len, width)) = peek_varint(&buf[pos..], "metadata")? else {
                    return Ok(Scan::Incomplete { at_least: pos + 1 });
                };
                pos += width;
                let metadata_len = self.check_len(metadata_len, pos)?;
                let metadata = pos..pos + metadata_len;
                pos += metadata_len;
                Some(metadata)
            }
            other => return Err(ProtocolError::InvalidMetadataFlag(other)),
        };

        if buf.len() < pos {
            return Ok(Scan::Incomplete { at_least: pos });
        }

        Ok(Scan::Complete(Layout {
            request_id,
            frame_type,
            data,
            metadata,
            total: pos,
        }))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a LEB128 varint from the front of `buf`.
///
/// Returns `None` when the buffer ends before the varint terminates.
fn peek_varint(buf: &[u8], field: &'static str) -> Result<Option<(u64, usize)>, ProtocolError> {
    let window = &buf[..buf.len().min(MAX_VARINT_LEN)];
    match window.iter().position(|byte| byte & 0x80 == 0) {
        Some(last) => {
            let mut bytes = &window[..=last];
            let value = prost::encoding::decode_varint(&mut bytes)
                .map_err(|_| ProtocolError::MalformedVarint { field })?;
            Ok(Some((value, last + 1)))
        }
        None if window.len() == MAX_VARINT_LEN => Err(ProtocolError::MalformedVarint { field }),
        None => Ok(None),
    }
}

fn build(frame_bytes: &Bytes, layout: Layout) -> Frame {
    let data = frame_bytes.slice(layout.data);
    let metadata = layout.metadata.map(|range| frame_bytes.slice(range));
    Frame::new(
        layout.request_id,
        layout.frame_type,
        Payload::new(data, metadata),
    )
}

fn write_frame(frame: &Frame, buf: &mut BytesMut) {
    buf.reserve(frame.encoded_len());
    buf.put_u32(frame.request_id.get());
    buf.put_u8(frame.frame_type as u8);

    let data = frame.payload.data();
    prost::encoding::encode_varint(data.len() as u64, buf);
    buf.put_slice(data);

    match frame.payload.metadata() {
        Some(metadata) => {
            buf.put_u8(1);
            prost::encoding::encode_varint(metadata.len() as u64, buf);
            buf.put_slice(metadata);
        }
        None => buf.put_u8(0),
    }
}

fn invalid_data(err: ProtocolError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.scan(buf).map_err(invalid_data)? {
            Scan::Complete(layout) => {
                let frame_bytes = buf.split_to(layout.total).freeze();
                Ok(Some(build(&frame_bytes, layout)))
            }
            Scan::Incomplete { at_least } => {
                // Reserve space for what we know is still coming
                buf.reserve(at_least.saturating_sub(buf.len()));
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(buf)? {
            Some(frame) => Ok(Some(frame)),
            None if buf.is_empty() => Ok(None),
            None => Err(invalid_data(ProtocolError::TruncatedFrame(buf.len()))),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: Frame, buf: &mut BytesMut) -> Result<(), Self::Error> {
        self.check_size(&frame).map_err(invalid_data)?;
        write_frame(&frame, buf);
        Ok(())
    }
}
