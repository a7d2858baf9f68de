use bounded_runner::{BoundedTaskRunner, Config};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use futures::future::join_all;
use std::hint::black_box;
use tokio::time::Duration;

fn create_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()
        .unwrap()
}

// Submit-to-completion overhead for trivial tasks.
fn bench_submit_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_overhead");

    for size in [100usize, 1_000, 10_000] {
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("async", size), &size, |b, &size| {
            let rt = create_runtime();
            let runner = rt.block_on(async { BoundedTaskRunner::with_config(Config::cpu_bound()) }).unwrap();

            b.to_async(&rt).iter(|| {
                let runner = &runner;
                async move {
                    let handles: Vec<_> = (0..size)
                        .map(|i| {
                            runner
                                .submit(move |_| async move {
                                    black_box(i);
                                    Ok(())
                                })
                                .unwrap()
                        })
                        .collect();
                    black_box(join_all(handles).await);
                }
            });

            rt.block_on(runner.shutdown(Duration::from_secs(5)));
        });

        group.bench_with_input(BenchmarkId::new("blocking", size), &size, |b, &size| {
            let rt = create_runtime();
            let runner = rt.block_on(async { BoundedTaskRunner::with_config(Config::cpu_bound()) }).unwrap();

            b.to_async(&rt).iter(|| {
                let runner = &runner;
                async move {
                    let handles: Vec<_> = (0..size)
                        .map(|i| {
                            runner
                                .submit_blocking(move |_| {
                                    black_box(i);
                                    Ok(())
                                })
                                .unwrap()
                        })
                        .collect();
                    black_box(join_all(handles).await);
                }
            });

            rt.block_on(runner.shutdown(Duration::from_secs(5)));
        });
    }
    group.finish();
}

// Cost of a clean shutdown on an idle runner, by worker count.
fn bench_shutdown(c: &mut Criterion) {
    let mut group = c.benchmark_group("shutdown_idle");
    let rt = create_runtime();

    for workers in [1usize, 4, 16] {
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, &workers| {
            b.to_async(&rt).iter(|| async move {
                let runner = BoundedTaskRunner::new(workers).unwrap();
                black_box(runner.shutdown(Duration::from_secs(1)).await);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_submit_overhead, bench_shutdown);
criterion_main!(benches);
