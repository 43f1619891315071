//! Property tests for the frame codec

use bytes::BytesMut;
use proptest::prelude::*;
use rsocket_protocol::{Bytes, Frame, FrameCodec, FrameType, Payload, RequestId};
use tokio_util::codec::{Decoder, Encoder};

fn frame_type() -> impl Strategy<Value = FrameType> {
    prop_oneof![
        Just(FrameType::RequestResponse),
        Just(FrameType::FireAndForget),
        Just(FrameType::Response),
        Just(FrameType::Error),
    ]
}

fn payload() -> impl Strategy<Value = Payload> {
    (
        prop::collection::vec(any::<u8>(), 0..512),
        prop::option::of(prop::collection::vec(any::<u8>(), 0..256)),
    )
        .prop_map(|(data, metadata)| Payload::new(data, metadata.map(Bytes::from)))
}

fn frame() -> impl Strategy<Value = Frame> {
    (any::<u32>(), frame_type(), payload())
        .prop_map(|(id, frame_type, payload)| Frame::new(RequestId::new(id), frame_type, payload))
}

proptest! {
    #[test]
    fn decode_reproduces_encoded_frame(frame in frame()) {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(frame.clone(), &mut buf).unwrap();
        prop_assert_eq!(buf.len(), frame.encoded_len());

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        prop_assert_eq!(decoded.payload.data(), frame.payload.data());
        prop_assert_eq!(decoded.payload.metadata(), frame.payload.metadata());
        prop_assert_eq!(decoded, frame);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn stream_split_at_any_point_decodes_in_order(
        frames in prop::collection::vec(frame(), 1..8),
        split in any::<prop::sample::Index>(),
    ) {
        let mut codec = FrameCodec::new();
        let mut wire = BytesMut::new();
        for frame in &frames {
            codec.encode(frame.clone(), &mut wire).unwrap();
        }

        // Deliver the stream in two chunks cut at an arbitrary byte
        let cut = split.index(wire.len() + 1);
        let tail = wire.split_off(cut);
        let mut buf = wire;
        let mut decoded = Vec::new();
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            decoded.push(frame);
        }
        buf.extend_from_slice(&tail);
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            decoded.push(frame);
        }

        prop_assert_eq!(decoded, frames);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn single_message_decode_rejects_any_strict_prefix(frame in frame(), cut in any::<prop::sample::Index>()) {
        let codec = FrameCodec::new();
        let bytes = codec.encode_frame(&frame).unwrap();
        let cut = cut.index(bytes.len());
        prop_assert!(codec.decode_frame(bytes.slice(..cut)).is_err());
        prop_assert_eq!(codec.decode_frame(bytes).unwrap(), frame);
    }

    #[test]
    fn arbitrary_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..64)) {
        let mut codec = FrameCodec::new().with_max_frame_size(1024);
        let mut buf = BytesMut::from(&bytes[..]);
        // Either a frame, a request for more bytes, or an error; never a panic
        while let Ok(Some(_)) = codec.decode(&mut buf) {}
    }
}
