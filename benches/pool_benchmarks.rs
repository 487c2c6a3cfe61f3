use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use async_workers::{
    errors::BoxError,
    pool::{Config as PoolConfig, WorkerPoolInner},
    source::IterSource,
    task::{BoxedTask, TaskFn},
};
use tokio::time::Duration;
use std::hint::black_box;

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .unwrap()
}

fn instant_tasks(n: usize) -> IterSource<impl Iterator<Item = BoxedTask<usize>>> {
    IterSource::new((0..n).map(|i| {
        TaskFn::boxed("instant", move |_ctx| async move { Ok::<_, BoxError>(black_box(i)) })
    }))
}

fn yielding_tasks(n: usize) -> IterSource<impl Iterator<Item = BoxedTask<usize>>> {
    IterSource::new((0..n).map(|i| {
        TaskFn::boxed("yield", move |_ctx| async move {
            tokio::task::yield_now().await;
            Ok::<_, BoxError>(black_box(i * 2))
        })
    }))
}

// Benchmark 1: стоимость диспетчеризации одной задачи
fn bench_dispatch_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_overhead");

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("run", size), &size, |b, &size| {
            let rt = create_runtime();
            let pool = rt.block_on(async { WorkerPoolInner::with_config(PoolConfig::io_bound()).unwrap() });

            b.to_async(&rt).iter(|| {
                let pool = &pool;
                async move {
                    let result = pool.run(instant_tasks(size)).await.unwrap();
                    black_box(result.winners.len());
                }
            });
        });

        // tokio baseline
        group.bench_with_input(BenchmarkId::new("tokio_spawn", size), &size, |b, &size| {
            let rt = create_runtime();
            b.to_async(&rt).iter(|| async move {
                let handles: Vec<_> = (0..size)
                    .map(|i| tokio::spawn(async move { black_box(i) }))
                    .collect();
                for handle in handles {
                    black_box(handle.await.unwrap());
                }
            });
        });
    }

    group.finish();
}

// Benchmark 2: масштабирование по DOP
fn bench_dop_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("dop_scaling");
    group.sample_size(20);

    let tasks = 5000;
    group.throughput(Throughput::Elements(tasks as u64));

    for dop in [1, 2, 4, 8, 16] {
        group.bench_with_input(BenchmarkId::new("dop", dop), &dop, |b, &dop| {
            let rt = create_runtime();
            b.to_async(&rt).iter(|| async move {
                let pool = WorkerPoolInner::with_config(PoolConfig::default().with_dop(dop)).unwrap();
                let result = pool.run(yielding_tasks(tasks)).await.unwrap();
                black_box(result.total());
            });
        });
    }

    group.finish();
}

// Benchmark 3: досрочный выход по квоте
fn bench_quota_early_exit(c: &mut Criterion) {
    let mut group = c.benchmark_group("quota_early_exit");
    group.sample_size(20);

    for quota in [10, 100, 1000] {
        group.bench_with_input(BenchmarkId::new("quota", quota), &quota, |b, &quota| {
            let rt = create_runtime();
            b.to_async(&rt).iter(|| async move {
                let config = PoolConfig::io_bound().with_quota(quota);
                let pool = WorkerPoolInner::with_config(config).unwrap();
                let source = IterSource::new((0..10_000usize).map(|i| {
                    TaskFn::boxed("maybe slow", move |_ctx| async move {
                        if i % 4 == 0 {
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                        Ok::<_, BoxError>(i)
                    })
                }));
                let result = pool.run(source).await.unwrap();
                black_box(result.winners.len());
            });
        });
    }

    group.finish();
}

// Benchmark 4: CPU-bound vs I/O-bound config
fn bench_config_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_comparison");
    group.sample_size(20);

    let tasks = 5000;

    group.bench_function("cpu_bound", |b| {
        let rt = create_runtime();
        b.to_async(&rt).iter(|| async {
            let pool = WorkerPoolInner::with_config(PoolConfig::cpu_bound()).unwrap();
            black_box(pool.run(instant_tasks(tasks)).await.unwrap().total());
        });
    });

    group.bench_function("io_bound", |b| {
        let rt = create_runtime();
        b.to_async(&rt).iter(|| async {
            let pool = WorkerPoolInner::with_config(PoolConfig::io_bound()).unwrap();
            black_box(pool.run(yielding_tasks(tasks)).await.unwrap().total());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_dispatch_overhead,
    bench_dop_scaling,
    bench_quota_early_exit,
    bench_config_comparison,
);
criterion_main!(benches);
