use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use ringsink::{Memory, OffHeapRing, OnHeapRing, RingBuffer};
use std::{hint::black_box, time::Duration};

// Size of the ring buffer for benchmarks.
const CAPACITY: usize = 4 << 20;

// Payload sizes to reserve per lease.
const PAYLOADS: [usize; 3] = [64, 1024, 16 << 10];

// Number of leases committed before draining the ring buffer.
const BATCH_SIZE: usize = 128;

criterion_main!(benches);
criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_secs(3))
        .measurement_time(Duration::from_secs(10));
    targets = on_heap_bench, off_heap_bench
}

fn on_heap_bench(c: &mut Criterion) {
    run_bench(c, OnHeapRing::new(CAPACITY), "OnHeap");
}

fn off_heap_bench(c: &mut Criterion) {
    let ring = OffHeapRing::off_heap(CAPACITY).expect("Should allocate memory");
    run_bench(c, ring, "OffHeap");
}

fn run_bench<M: Memory>(c: &mut Criterion, mut ring: RingBuffer<M>, name: &str) {
    let mut group = c.benchmark_group(name);

    for size in PAYLOADS {
        let payload = vec![b'a'; size];

        // Single lease through reserve, commit, read and release.
        group.throughput(Throughput::BytesDecimal(size as _));
        group.bench_function(format!("round_trip/{size}"), |bencher| {
            bencher.iter(|| {
                let mut lease = ring.reserve(size).expect("Should reserve");
                lease.copy_from_slice(&payload);
                ring.commit(lease);

                let lease = ring.read().expect("Should read");
                black_box(&*lease);
                ring.release(lease);
            })
        });

        // Many commits followed by draining all segments, crosses the end of memory.
        group.throughput(Throughput::BytesDecimal((size * BATCH_SIZE) as _));
        group.bench_function(format!("batch/{size}"), |bencher| {
            bencher.iter(|| {
                for _ in 0..BATCH_SIZE {
                    match ring.reserve(size) {
                        Ok(mut lease) => {
                            lease.copy_from_slice(&payload);
                            ring.commit(lease);
                        }

                        // Ring buffer is full, drain it and keep going.
                        Err(_) => drain(&mut ring),
                    }
                }

                drain(&mut ring);
            })
        });
    }

    group.finish();
}

fn drain<M: Memory>(ring: &mut RingBuffer<M>) {
    while let Some(lease) = ring.read() {
        black_box(&*lease);
        ring.release(lease);
    }
}
