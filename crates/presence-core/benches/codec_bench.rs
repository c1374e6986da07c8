//! Criterion benchmarks for the Presence wire codec.
//!
//! Run with:
//! ```bash
//! cargo bench --package presence-core --bench codec_bench
//! ```

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use presence_core::protocol::codec::{decode_message, encode_message, FrameBuffer};
use presence_core::protocol::messages::{ClientInfo, Message};

// ── Message fixtures ──────────────────────────────────────────────────────────

fn make_hello_response() -> Message {
    Message::HelloResponse(ClientInfo {
        id: "9f".repeat(32),
        name: "sensor1".to_string(),
        kind: "temp".to_string(),
        revision: "4f2c1e9".to_string(),
        branch: "main".to_string(),
        build_time: Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap(),
    })
}

fn make_error() -> Message {
    Message::Error("unable to unmarshal: unexpected EOF".to_string())
}

fn fixtures() -> Vec<(&'static str, Message)> {
    vec![
        ("Ping", Message::Ping),
        ("Pong", Message::Pong),
        ("HelloRequest", Message::HelloRequest),
        ("Approve", Message::Approve),
        ("HelloResponse", make_hello_response()),
        ("Error", make_error()),
    ]
}

// ── Benchmark groups ──────────────────────────────────────────────────────────

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_message");
    for (name, msg) in fixtures() {
        group.bench_with_input(BenchmarkId::new("msg", name), &msg, |b, msg| {
            b.iter(|| encode_message(black_box(msg)).expect("encode must succeed"))
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_message");
    for (name, msg) in fixtures() {
        let bytes = encode_message(&msg).expect("encode must succeed");
        group.bench_with_input(BenchmarkId::new("msg", name), &bytes, |b, bytes| {
            b.iter(|| decode_message(black_box(bytes)).expect("decode must succeed"))
        });
    }
    group.finish();
}

/// A steady heartbeat stream: 100 Ping frames pushed through a FrameBuffer.
fn bench_frame_buffer_heartbeats(c: &mut Criterion) {
    let ping = encode_message(&Message::Ping).expect("encode must succeed");
    let stream: Vec<u8> = ping.iter().copied().cycle().take(ping.len() * 100).collect();

    c.bench_function("frame_buffer/ping_x100", |b| {
        b.iter(|| {
            let mut frames = FrameBuffer::new();
            frames.extend(black_box(&stream));
            let mut count = 0;
            while let Ok(Some(_)) = frames.next_message() {
                count += 1;
            }
            assert_eq!(count, 100);
        })
    });
}

criterion_group!(
    benches,
    bench_encode,
    bench_decode,
    bench_frame_buffer_heartbeats
);
criterion_main!(benches);
