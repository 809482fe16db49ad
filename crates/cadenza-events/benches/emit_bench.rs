//! Microbenchmarks for hot-path emission and relay forwarding.

use cadenza_events::{Emitter, EventHandler, EventSourceExt};
use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

fn bench_emit(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit");

    group.bench_function("one_listener", |b| {
        let handler: EventHandler<u64> = EventHandler::new();
        handler.on("tick", |v| {
            black_box(*v);
        });
        b.iter(|| handler.emit("tick", &1));
    });

    group.bench_function("eight_listeners", |b| {
        let handler: EventHandler<u64> = EventHandler::new();
        for _ in 0..8 {
            handler.on("tick", |v| {
                black_box(*v);
            });
        }
        b.iter(|| handler.emit("tick", &1));
    });

    group.bench_function("relay_depth_four", |b| {
        let source: EventHandler<u64> = EventHandler::new();
        let mut tail = source.clone();
        for _ in 0..4 {
            let next: EventHandler<u64> = EventHandler::new();
            next.subscribe(&tail);
            tail = next;
        }
        tail.on("tick", |v| {
            black_box(*v);
        });
        b.iter(|| source.emit("tick", &1));
    });

    group.finish();
}

criterion_group!(benches, bench_emit);
criterion_main!(benches);
