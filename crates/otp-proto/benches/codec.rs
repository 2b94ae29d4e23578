//! Benchmarks for frame and value encoding.

use bytes::{Bytes, BytesMut};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use otp_proto::bus::{BusFrame, DataMessage};
use otp_proto::frame::FrameCodec;
use otp_proto::value::Value;
use tokio_util::codec::{Decoder, Encoder};

fn benchmark_frame_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("Frame Codec");
    let payload = Bytes::from_static(&[0u8; 256]);

    group.bench_function("encode_256b", |b| {
        let mut codec = FrameCodec;
        b.iter(|| {
            let mut buf = BytesMut::new();
            codec.encode(black_box(payload.clone()), &mut buf).unwrap();
            black_box(buf)
        })
    });

    group.bench_function("decode_256b", |b| {
        let mut codec = FrameCodec;
        let mut framed = BytesMut::new();
        codec.encode(payload.clone(), &mut framed).unwrap();
        b.iter(|| {
            let mut buf = framed.clone();
            let decoded = codec.decode(black_box(&mut buf)).unwrap();
            black_box(decoded)
        })
    });

    group.finish();
}

fn benchmark_data_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("Bus Data Message");
    let msg = DataMessage {
        channels: vec![20_100_000, 4003, 4681],
        sender: 10_000_001,
        code: 2004,
        payload: Bytes::from_static(b"setTalk payload"),
    };

    group.bench_function("encode", |b| {
        b.iter(|| black_box(BusFrame::Data(black_box(msg.clone())).encode()))
    });

    let encoded = BusFrame::Data(msg).encode();
    group.bench_function("decode", |b| {
        b.iter(|| black_box(BusFrame::decode(black_box(encoded.clone())).unwrap()))
    });

    group.finish();
}

fn benchmark_value_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("Value Encoding");
    let value = Value::List(vec![
        Value::Str("Flippy".into()),
        Value::U64(10_000_001),
        Value::Bool(true),
    ]);

    group.bench_function("encode", |b| {
        b.iter(|| black_box(black_box(&value).to_bytes()))
    });

    let encoded = value.to_bytes();
    group.bench_function("decode", |b| {
        b.iter(|| {
            let mut buf = encoded.clone();
            black_box(Value::decode(&mut buf).unwrap())
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_frame_codec,
    benchmark_data_message,
    benchmark_value_round_trip,
);
criterion_main!(benches);
