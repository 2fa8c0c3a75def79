//! Benchmarks for the ISBN engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tsundoku_bench::{generate, CorpusConfig};
use tsundoku_isbn::{canonicalize_str, dedup, extract, is_valid_isbn13};

fn bench_checksum(c: &mut Criterion) {
    c.bench_function("isbn13_checksum", |b| {
        b.iter(|| is_valid_isbn13(black_box(b"9784873110011")))
    });
}

fn bench_canonicalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonicalize");
    for (name, raw) in [
        ("valid_long", "978-4-87311-001-1"),
        ("valid_short", "0-306-40615-2"),
        ("restore_prefix", "1032300824"),
        ("correct_long_check", "9784873110010"),
        ("reject", "12345678901"),
    ] {
        group.bench_with_input(BenchmarkId::from_parameter(name), raw, |b, raw| {
            b.iter(|| canonicalize_str(black_box(raw)))
        });
    }
    group.finish();
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("extract");
    for ids in [1usize, 5, 20] {
        let messages = generate(&CorpusConfig {
            messages: 50,
            ids_per_message: ids,
            ..Default::default()
        });
        let bytes: usize = messages.iter().map(String::len).sum();
        group.throughput(Throughput::Bytes(bytes as u64));
        group.bench_with_input(BenchmarkId::from_parameter(ids), &messages, |b, messages| {
            b.iter(|| {
                messages
                    .iter()
                    .map(|m| extract(black_box(m)).count())
                    .sum::<usize>()
            })
        });
    }
    group.finish();
}

fn bench_batch(c: &mut Criterion) {
    let messages = generate(&CorpusConfig::default());
    c.bench_function("extract_dedup_batch", |b| {
        b.iter(|| {
            for message in &messages {
                black_box(dedup(extract(black_box(message))));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_checksum,
    bench_canonicalize,
    bench_extract,
    bench_batch
);
criterion_main!(benches);
