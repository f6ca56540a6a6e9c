// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Per-block handoff benchmarks.
//
// Run with:
//   cargo bench --bench handoff
//
// Measures one producer write + consumer read through the semaphore-paced
// channel, in-process, at typical audio block sizes. This is the steady
// state path after the handshake: wait free, copy L/R, post filled, and
// the reverse on the consumer side.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use audiolink::AudioChannel;

const SIZES: &[(&str, usize)] = &[
    ("frames_64", 64),
    ("frames_256", 256),
    ("frames_1024", 1024),
];

fn bench_block_handoff(c: &mut Criterion) {
    let pid = std::process::id();
    let chan = format!("bench_handoff_c_{pid}");
    let param = format!("bench_handoff_p_{pid}");
    let stem = format!("bench_handoff_b_{pid}");
    AudioChannel::clear_storage(&chan, &param, &stem);

    let producer = AudioChannel::create(&chan, &param, &stem).expect("create");
    let consumer = AudioChannel::open(&chan).expect("open");
    producer.open_writer();

    let mut group = c.benchmark_group("block_handoff");
    for &(label, frames) in SIZES {
        producer.negotiate_block_size(frames).expect("negotiate");

        // Stereo f32 frames per round trip.
        group.throughput(Throughput::Bytes((frames * 2 * 4) as u64));

        let left = vec![0.5f32; frames];
        let right = vec![-0.5f32; frames];
        let mut out_l = vec![0.0f32; frames];
        let mut out_r = vec![0.0f32; frames];

        group.bench_with_input(BenchmarkId::from_parameter(label), &frames, |b, _| {
            b.iter(|| {
                producer.write_block(&left, &right).expect("write");
                let n = consumer.read_block(&mut out_l, &mut out_r).expect("read");
                black_box(n)
            });
        });
    }
    group.finish();

    producer.close_writer();
    producer.unlink();
}

criterion_group!(benches, bench_block_handoff);
criterion_main!(benches);
