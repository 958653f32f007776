//! Benchmark for scheduling and destroying app instances
//!
//! Runs against the in-memory cluster, so it measures driver, dispatcher
//! and template expansion overhead only.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use resilience_harness::{
    register_builtin, AppSpecFactory, InMemoryCluster, K8sDriver, ScheduleOptions,
    SchedulerDriver, WaitOptions,
};
use std::sync::Arc;
use tokio::runtime::Runtime;

fn driver(rt: &Runtime) -> K8sDriver {
    let cluster = Arc::new(
        InMemoryCluster::new()
            .with_master("m0", "10.0.0.1")
            .with_worker("w0", "10.0.0.2")
            .with_worker("w1", "10.0.0.3"),
    );
    let mut factory = AppSpecFactory::new();
    register_builtin(&mut factory).unwrap();

    let driver = K8sDriver::new(cluster, Arc::new(factory));
    rt.block_on(driver.init()).unwrap();
    driver
}

fn bench_schedule_destroy(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let driver = driver(&rt);
    let options = ScheduleOptions::default();
    let wait = WaitOptions::default();

    let mut group = c.benchmark_group("driver");
    group.throughput(Throughput::Elements(1));

    group.bench_function("schedule_validate_destroy", |b| {
        let mut counter = 0u64;
        b.iter(|| {
            counter += 1;
            let id = format!("bench-{}", counter);
            rt.block_on(async {
                let contexts = driver.schedule(black_box(&id), &options).await.unwrap();
                for ctx in &contexts {
                    driver.wait_for_running(ctx, &wait).await.unwrap();
                    driver.destroy(ctx).await.unwrap();
                    driver.delete_volumes(ctx).await.unwrap();
                }
            });
        });
    });

    group.finish();
}

fn bench_get_nodes_for_app(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let driver = driver(&rt);
    let contexts = rt
        .block_on(driver.schedule("nodes", &ScheduleOptions::default()))
        .unwrap();

    let mut group = c.benchmark_group("driver");
    group.throughput(Throughput::Elements(contexts.len() as u64));

    group.bench_function("get_nodes_for_app", |b| {
        b.iter(|| {
            rt.block_on(async {
                for ctx in &contexts {
                    black_box(driver.get_nodes_for_app(ctx).await.unwrap());
                }
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_schedule_destroy, bench_get_nodes_for_app);
criterion_main!(benches);
