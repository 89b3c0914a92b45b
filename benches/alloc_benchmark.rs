use std::sync::Arc;
use std::thread;

use buddy_cache::{Allocator, Config};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

fn bench_config() -> Config {
    Config {
        min_alloc_bytes: 64,
        max_alloc_bytes: 1 << 16,
        arena_size_bytes: 1 << 20,
        max_total_bytes: 1 << 28,
    }
}

fn bench_single_thread_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_thread_round_trip");
    for &size in &[64usize, 1024, 65536] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let alloc = Allocator::with_defaults(bench_config()).unwrap();
            b.iter(|| {
                let mut handle = alloc.allocate_new(1, size).unwrap().pop().unwrap();
                black_box(handle.as_mut_slice())[0] = 1;
                alloc.deallocate(&mut handle);
            });
        });
    }
    group.finish();
}

fn bench_batch_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_allocation");
    for &count in &[8usize, 64, 512] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let alloc = Allocator::with_defaults(bench_config()).unwrap();
            b.iter(|| {
                let mut handles = alloc.allocate_new(count, 256).unwrap();
                for h in &mut handles {
                    alloc.deallocate(h);
                }
            });
        });
    }
    group.finish();
}

fn bench_contended_allocate_deallocate(c: &mut Criterion) {
    let mut group = c.benchmark_group("contended_allocate_deallocate");
    for &threads in &[2usize, 4, 8] {
        group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
            let alloc = Arc::new(Allocator::with_defaults(bench_config()).unwrap());
            b.iter(|| {
                let workers: Vec<_> = (0..threads)
                    .map(|_| {
                        let alloc = Arc::clone(&alloc);
                        thread::spawn(move || {
                            for _ in 0..64 {
                                let mut h = alloc.allocate_new(1, 256).unwrap().pop().unwrap();
                                black_box(h.as_mut_slice())[0] = 1;
                                alloc.deallocate(&mut h);
                            }
                        })
                    })
                    .collect();
                for w in workers {
                    w.join().unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_single_thread_round_trip,
    bench_batch_allocation,
    bench_contended_allocate_deallocate
);
criterion_main!(benches);
