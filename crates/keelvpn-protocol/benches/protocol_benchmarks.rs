//! Protocol Performance Benchmarks
//!
//! Benchmarks for the reliability windows and ACK bookkeeping.

use std::time::{Duration, Instant};

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};

use bytes::Bytes;
use keelvpn_protocol::{AckTracker, Packet, RecvWindow, ReliableConfig, SendWindow};

// =============================================================================
// Send Window Benchmarks
// =============================================================================

fn bench_send_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("send_window");
    let config = ReliableConfig {
        window_size: 64,
        ..ReliableConfig::default()
    };
    let payload = Bytes::from(vec![0xAB; 1400]);

    group.throughput(Throughput::Elements(64));
    group.bench_function("send_and_ack_64", |b| {
        b.iter(|| {
            let now = Instant::now();
            let mut window = SendWindow::new(&config);
            for _ in 0..64u32 {
                let msg = window.send(now);
                msg.packet = Packet::from_bytes(payload.clone());
            }
            for id in 0..64u32 {
                window.ack(black_box(id), now + Duration::from_millis(40));
            }
        });
    });

    group.bench_function("until_retransmit_full_window", |b| {
        let now = Instant::now();
        let mut window = SendWindow::new(&config);
        for _ in 0..64u32 {
            window.send(now);
        }
        b.iter(|| black_box(window.until_retransmit(black_box(now))));
    });

    group.finish();
}

// =============================================================================
// Recv Window Benchmarks
// =============================================================================

fn bench_recv_window(c: &mut Criterion) {
    let mut group = c.benchmark_group("recv_window");
    let config = ReliableConfig {
        window_size: 64,
        ..ReliableConfig::default()
    };
    let payload = Bytes::from(vec![0xCD; 1400]);

    group.throughput(Throughput::Elements(64));
    group.bench_function("reorder_reverse_64", |b| {
        b.iter(|| {
            let mut window = RecvWindow::new(&config);
            // Worst case: everything arrives in reverse
            for id in (0..64u32).rev() {
                window.accept(id, Packet::from_bytes(payload.clone()));
            }
            while window.ready() {
                black_box(window.next_sequenced());
                window.advance();
            }
        });
    });

    group.finish();
}

// =============================================================================
// ACK Tracker Benchmarks
// =============================================================================

fn bench_ack_tracker(c: &mut Criterion) {
    let mut group = c.benchmark_group("ack_tracker");

    group.bench_function("push_take_8", |b| {
        b.iter(|| {
            let mut tracker = AckTracker::new(8);
            for id in 0..8u32 {
                tracker.push(black_box(id));
            }
            black_box(tracker.take(8))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_send_window, bench_recv_window, bench_ack_tracker);
criterion_main!(benches);
