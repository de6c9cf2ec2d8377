#![allow(missing_docs, clippy::similar_names, clippy::cast_possible_truncation)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{runtime::Runtime, task};

use paquet::{
    QueueError,
    queue::queue,
    traits::{QueueConsumer, QueueProducer},
};

#[cfg(feature = "dev-profiling")]
mod profiling {
    use criterion::profiler::Profiler;
    use pprof::ProfilerGuard;
    use std::{fs::File, path::Path};

    pub struct FlamegraphProfiler<'a> {
        frequency: i32,
        active_profiler: Option<ProfilerGuard<'a>>,
    }

    impl FlamegraphProfiler<'_> {
        #[allow(dead_code)]
        pub const fn new(frequency: i32) -> Self {
            FlamegraphProfiler {
                frequency,
                active_profiler: None,
            }
        }
    }

    impl Profiler for FlamegraphProfiler<'_> {
        fn start_profiling(&mut self, _benchmark_id: &str, _benchmark_dir: &Path) {
            self.active_profiler = Some(ProfilerGuard::new(self.frequency).unwrap());
        }

        fn stop_profiling(&mut self, _benchmark_id: &str, benchmark_dir: &Path) {
            std::fs::create_dir_all(benchmark_dir).unwrap();
            let flamegraph_path = benchmark_dir.join("flamegraph.svg");
            let flamegraph_file = File::create(&flamegraph_path)
                .expect("File system error while creating flamegraph.svg");

            if let Some(profiler) = self.active_profiler.take() {
                profiler
                    .report()
                    .build()
                    .unwrap()
                    .flamegraph(flamegraph_file)
                    .expect("Error writing flamegraph");
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SmallData {
    value: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct LargeData {
    id: u64,
    data: Vec<u8>,
}

impl LargeData {
    fn new(id: u64, size: usize) -> Self {
        Self {
            id,
            data: vec![0u8; size],
        }
    }
}

/// Single-threaded latency benchmark - measures ns per operation
fn bench_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("latency_ns_per_op");
    group.measurement_time(Duration::from_secs(10));
    group.warm_up_time(Duration::from_secs(3));

    group.bench_function("small_round_trip", |b| {
        let (producer, consumer) = queue::<SmallData>().channels().unwrap();
        b.iter(|| {
            let data = SmallData { value: 42 };
            producer.push(black_box(data));
            black_box(consumer.try_pop().unwrap());
        });
    });

    group.bench_function("heap_record_1kb", |b| {
        let (producer, consumer) = queue::<LargeData>().channels().unwrap();
        let data = LargeData::new(1, 1024);
        b.iter(|| {
            producer.push(black_box(data.clone()));
            black_box(consumer.try_pop().unwrap());
        });
    });

    // 256-byte inline values get one slot per page: every round trip is a
    // full page lifecycle.
    group.bench_function("inline_256_per_page", |b| {
        let (producer, consumer) = queue::<[u8; 256]>().channels().unwrap();
        b.iter(|| {
            producer.push(black_box([7u8; 256]));
            black_box(consumer.try_pop().unwrap());
        });
    });

    group.finish();
}

/// Multi-threaded throughput benchmark
fn bench_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("throughput_ops_per_sec");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(15));
    group.warm_up_time(Duration::from_secs(5));

    // Test configurations: (producers, consumers, ops_per_producer)
    let configs = vec![
        (1, 1, 100_000), // Single producer/consumer baseline
        (2, 2, 50_000),  // Low contention
        (4, 4, 25_000),  // Medium contention
        (8, 8, 12_500),  // High contention
    ];

    for (producers, consumers, ops_per_producer) in configs {
        let total_ops = producers * ops_per_producer;
        let config_name = format!("{producers}p_{consumers}c");

        group.throughput(Throughput::Elements(total_ops as u64));

        group.bench_with_input(
            BenchmarkId::new("sharded_default", &config_name),
            &(producers, consumers, ops_per_producer),
            |b, &(producers, consumers, ops_per_producer)| {
                b.to_async(&rt).iter(|| async {
                    bench_sharded_default(producers, consumers, ops_per_producer).await;
                });
            },
        );

        // Single shard as the contention baseline
        group.bench_with_input(
            BenchmarkId::new("single_shard", &config_name),
            &(producers, consumers, ops_per_producer),
            |b, &(producers, consumers, ops_per_producer)| {
                b.to_async(&rt).iter(|| async {
                    bench_single_shard(producers, consumers, ops_per_producer).await;
                });
            },
        );

        // Tiny pages stress the page-transition gates
        if producers >= 4 {
            group.bench_with_input(
                BenchmarkId::new("sharded_tiny_pages", &config_name),
                &(producers, consumers, ops_per_producer),
                |b, &(producers, consumers, ops_per_producer)| {
                    b.to_async(&rt).iter(|| async {
                        bench_tiny_pages(producers, consumers, ops_per_producer).await;
                    });
                },
            );
        }
    }

    group.finish();
}

async fn run_mpmc<P, C>(producer: P, consumer: C, producers: usize, consumers: usize, ops: usize)
where
    P: QueueProducer<u64> + Clone + Send + 'static,
    C: QueueConsumer<u64> + Clone + Send + 'static,
{
    let total_ops = producers * ops;
    let consumed = Arc::new(AtomicUsize::new(0));

    // Spawn consumers
    let consumer_handles: Vec<_> = (0..consumers)
        .map(|_| {
            let consumer = consumer.clone();
            let consumed = consumed.clone();
            task::spawn(async move {
                loop {
                    if consumed.load(Ordering::Relaxed) >= total_ops {
                        break;
                    }

                    match consumer.try_pop() {
                        Ok(_) => {
                            consumed.fetch_add(1, Ordering::Relaxed);
                        },
                        Err(QueueError::Empty) => task::yield_now().await,
                        Err(e) => panic!("Unexpected queue error: {e:?}"),
                    }
                }
            })
        })
        .collect();

    // Spawn producers
    let producer_handles: Vec<_> = (0..producers)
        .map(|pid| {
            let producer = producer.clone();
            task::spawn(async move {
                for i in 0..ops {
                    let val = ((pid as u64) << 32) | (i as u64);
                    producer.push(val);
                }
            })
        })
        .collect();

    // Wait for completion
    for handle in producer_handles {
        handle.await.unwrap();
    }

    while consumed.load(Ordering::Relaxed) < total_ops {
        task::yield_now().await;
    }

    for handle in consumer_handles {
        handle.await.unwrap();
    }
}

async fn bench_sharded_default(producers: usize, consumers: usize, ops_per_producer: usize) {
    let (producer, consumer) = queue::<u64>().channels().unwrap();
    run_mpmc(producer, consumer, producers, consumers, ops_per_producer).await;
}

async fn bench_single_shard(producers: usize, consumers: usize, ops_per_producer: usize) {
    let (producer, consumer) = queue::<u64>().shards(1).channels().unwrap();
    run_mpmc(producer, consumer, producers, consumers, ops_per_producer).await;
}

async fn bench_tiny_pages(producers: usize, consumers: usize, ops_per_producer: usize) {
    let (producer, consumer) = queue::<u64>().page_capacity(4).channels().unwrap();
    run_mpmc(producer, consumer, producers, consumers, ops_per_producer).await;
}

/// Page-capacity sweep: same workload, varying page transition frequency
fn bench_page_capacity(c: &mut Criterion) {
    let mut group = c.benchmark_group("page_capacity_sweep");
    group.measurement_time(Duration::from_secs(10));

    let items = 10_000usize;
    group.throughput(Throughput::Elements(items as u64));

    for capacity in [1usize, 8, 64, 512] {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                let q = queue::<u64>().page_capacity(capacity).build().unwrap();
                b.iter(|| {
                    for i in 0..items {
                        q.push(i as u64);
                    }
                    for _ in 0..items {
                        black_box(q.try_pop().unwrap());
                    }
                });
            },
        );
    }

    group.finish();
}

#[cfg(feature = "dev-profiling")]
criterion_group! {
    name = benches;
    config = Criterion::default().with_profiler(profiling::FlamegraphProfiler::new(1000));
    targets = bench_latency, bench_throughput, bench_page_capacity
}

#[cfg(not(feature = "dev-profiling"))]
criterion_group!(
    benches,
    bench_latency,
    bench_throughput,
    bench_page_capacity
);

criterion_main!(benches);
