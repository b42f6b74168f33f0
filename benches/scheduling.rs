//! Benchmarks for the scheduling hot path
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mediagraph_rs::task::state::SchedulingCell;
use mediagraph_rs::task::{
    CollectorSink, MediaBuffer, NodeId, NodeOptions, RunHooks, StreamInfo, StreamKind, TaskNode,
};
use std::sync::Arc;

fn sink(id: u32, batch: usize) -> Arc<TaskNode> {
    let node = TaskNode::builder(NodeId(id), "sink", CollectorSink::new())
        .inputs(vec![StreamInfo::new(0, "video", StreamKind::Video)])
        .max_batch_size(batch)
        .build();
    node.prepare_for_run(NodeOptions::new(), RunHooks::new())
        .expect("prepare");
    node.open_node().expect("open");
    node
}

fn bench_scheduling_cell(c: &mut Criterion) {
    let mut group = c.benchmark_group("scheduling_cell");
    group.throughput(Throughput::Elements(1));

    group.bench_function("begin_end", |b| {
        let cell = SchedulingCell::new();
        b.iter(|| {
            black_box(cell.try_begin());
            black_box(cell.end());
        })
    });

    group.bench_function("coalesced_wakeups", |b| {
        let cell = SchedulingCell::new();
        b.iter(|| {
            cell.try_begin();
            for _ in 0..16 {
                black_box(cell.try_begin());
            }
            while cell.end() {}
        })
    });

    group.finish();
}

fn bench_inline_delivery(c: &mut Criterion) {
    let mut group = c.benchmark_group("inline_delivery");

    for batch in [1usize, 4, 16].iter() {
        group.throughput(Throughput::Elements(64));
        group.bench_with_input(BenchmarkId::from_parameter(batch), batch, |b, &batch| {
            let node = sink(1, batch);
            let input = node.input_handler().expect("input");
            b.iter(|| {
                for pts in 0..64 {
                    input
                        .push(0, MediaBuffer::with_pts(Vec::new(), pts))
                        .expect("push");
                }
                node.check_if_became_ready();
            })
        });
    }

    group.finish();
}

fn bench_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("output_fanout");

    for consumers in [1usize, 4, 8].iter() {
        group.throughput(Throughput::Elements(*consumers as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(consumers),
            consumers,
            |b, &consumers| {
                let producer = TaskNode::builder(NodeId(0), "src", CollectorSink::new())
                    .outputs(vec![StreamInfo::new(0, "video", StreamKind::Video)])
                    .build();
                let output = producer.output_stream(0).expect("output");
                let sinks: Vec<_> = (0..consumers).map(|i| sink(i as u32 + 1, 4)).collect();
                for node in &sinks {
                    node.add_stream_source(None, output).expect("connect");
                }
                let frame = MediaBuffer::new(vec![0u8; 4096]);
                b.iter(|| output.queue_buffer(black_box(frame.clone())).expect("queue"))
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_scheduling_cell,
    bench_inline_delivery,
    bench_fanout,
);

criterion_main!(benches);
