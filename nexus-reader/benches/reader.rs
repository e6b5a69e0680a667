//! Throughput benchmarks for the prefetching reader.
//!
//! Compares draining an in-memory source through `ParallelReader` against
//! reading the source directly on the calling thread.

use std::hint::black_box;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use nexus_reader::{BusySpin, CharSource, ParallelReader, ParkNanos, StrSource, ThreadPerTask};

const TEXT_LEN: usize = 1 << 20;

fn corpus() -> Vec<char> {
    "the quick brown fox jumps over the lazy dog\n"
        .chars()
        .cycle()
        .take(TEXT_LEN)
        .collect()
}

fn drain(reader: &mut ParallelReader, buf: &mut [char]) -> usize {
    let mut total = 0;
    loop {
        let n = reader.read(buf).unwrap();
        if n == 0 {
            return total;
        }
        total += n;
    }
}

fn bench_bulk_read(c: &mut Criterion) {
    let text = corpus();
    let mut group = c.benchmark_group("bulk_read");
    group.throughput(Throughput::Elements(TEXT_LEN as u64));
    group.sample_size(20);

    group.bench_function("direct", |b| {
        let mut buf = vec!['\0'; 4096];
        b.iter(|| {
            let mut source = StrSource::from_chars(text.clone());
            let mut total = 0;
            loop {
                let n = source.read_chars(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                total += n;
            }
            black_box(total)
        });
    });

    for ring in [1024usize, 64 * 1024] {
        group.bench_with_input(BenchmarkId::new("parallel_park", ring), &ring, |b, &ring| {
            let mut buf = vec!['\0'; 4096];
            b.iter(|| {
                let mut reader = ParallelReader::builder()
                    .ring_buffer_size(ring)
                    .waiting_strategy(ParkNanos)
                    .scheduler(Arc::new(ThreadPerTask::default()))
                    .open(StrSource::from_chars(text.clone()))
                    .unwrap();
                black_box(drain(&mut reader, &mut buf))
            });
        });

        group.bench_with_input(BenchmarkId::new("parallel_spin", ring), &ring, |b, &ring| {
            let mut buf = vec!['\0'; 4096];
            b.iter(|| {
                let mut reader = ParallelReader::builder()
                    .ring_buffer_size(ring)
                    .waiting_strategy(BusySpin)
                    .scheduler(Arc::new(ThreadPerTask::default()))
                    .open(StrSource::from_chars(text.clone()))
                    .unwrap();
                black_box(drain(&mut reader, &mut buf))
            });
        });
    }

    group.finish();
}

fn bench_read_char(c: &mut Criterion) {
    let text = corpus();
    let mut group = c.benchmark_group("read_char");
    group.throughput(Throughput::Elements(TEXT_LEN as u64));
    group.sample_size(20);

    group.bench_function("parallel_spin", |b| {
        b.iter(|| {
            let mut reader = ParallelReader::builder()
                .waiting_strategy(BusySpin)
                .scheduler(Arc::new(ThreadPerTask::default()))
                .open(StrSource::from_chars(text.clone()))
                .unwrap();
            let mut count = 0usize;
            while let Some(c) = reader.read_char().unwrap() {
                count += usize::from(c == 'o');
            }
            black_box(count)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_bulk_read, bench_read_char);
criterion_main!(benches);
