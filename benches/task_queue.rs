//! Throughput of the Task Queue's priority-heap insert (`submit`) and pop (`pop_ready`).

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tokio::runtime::Runtime;

use swarmbot::domain::models::task::TaskSpec;
use swarmbot::services::event_store::RingBufferEventStore;
use swarmbot::services::event_stream::{EventStream, EventStreamConfig};
use swarmbot::services::task_queue_service::{RetryPolicy, TaskQueueService};

fn bench_submit(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("task_queue_submit");

    for size in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| async move {
                let events = EventStream::shared(EventStreamConfig::default(), RingBufferEventStore::shared(size * 2));
                let queue = TaskQueueService::shared(size * 2, RetryPolicy::default(), events);
                for i in 0..size {
                    queue.submit(TaskSpec::new("bench").with_priority(i as i64 % 10)).await.unwrap();
                }
            });
        });
    }
    group.finish();
}

fn bench_pop_ready(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("task_queue_pop_ready");

    for size in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter_batched(
                || {
                    rt.block_on(async {
                        let events = EventStream::shared(EventStreamConfig::default(), RingBufferEventStore::shared(size * 2));
                        let queue = TaskQueueService::shared(size * 2, RetryPolicy::default(), events);
                        for i in 0..size {
                            queue.submit(TaskSpec::new("bench").with_priority(i as i64 % 10)).await.unwrap();
                        }
                        queue
                    })
                },
                |queue| async move {
                    for _ in 0..size {
                        queue.pop_ready().await;
                    }
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_submit, bench_pop_ready);
criterion_main!(benches);
