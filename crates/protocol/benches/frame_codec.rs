use bytes::BytesMut;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rsocket_protocol::{Bytes, Frame, FrameCodec, Payload, RequestId};
use std::hint::black_box;
use tokio_util::codec::{Decoder, Encoder};

fn frame_of(size: usize) -> Frame {
    Frame::request_response(
        RequestId::new(42),
        Payload::new(vec![0xab; size], Some(Bytes::from_static(b"route.echo"))),
    )
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for size in [16, 1024, 64 * 1024] {
        let frame = frame_of(size);
        group.throughput(Throughput::Bytes(frame.encoded_len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &frame, |b, frame| {
            let mut codec = FrameCodec::new();
            let mut buf = BytesMut::with_capacity(frame.encoded_len());
            b.iter(|| {
                buf.clear();
                codec.encode(black_box(frame.clone()), &mut buf).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for size in [16, 1024, 64 * 1024] {
        let encoded = FrameCodec::new().encode_frame(&frame_of(size)).unwrap();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &encoded, |b, encoded| {
            let mut codec = FrameCodec::new();
            b.iter(|| {
                let mut buf = BytesMut::from(encoded.as_ref());
                black_box(codec.decode(&mut buf).unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
