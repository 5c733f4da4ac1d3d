//! Benchmarks for Merkle batches and the combiner.
//!
//! Run with: cargo bench --bench merkle_batch

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use verirand::core::secret::{Secret, SECRET_LEN};
use verirand::proof::combiner::combine;
use verirand::proof::merkle::MerkleBatch;

fn secrets(n: usize) -> Vec<Secret> {
    (0..n)
        .map(|i| {
            let mut bytes = [0u8; SECRET_LEN];
            bytes[..8].copy_from_slice(&(i as u64).to_le_bytes());
            Secret::from_bytes(bytes)
        })
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("merkle_build");
    for size in [64usize, 512, 4096] {
        let leaves = secrets(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &leaves, |b, leaves| {
            b.iter(|| MerkleBatch::build(black_box(leaves)))
        });
    }
    group.finish();
}

fn bench_prove_verify(c: &mut Criterion) {
    let leaves = secrets(512);
    let batch = MerkleBatch::build(&leaves).expect("non-empty batch");
    let root = batch.root();
    let proof = batch.prove_index(300).expect("index in range");

    c.bench_function("merkle_prove_512", |b| b.iter(|| batch.prove_index(black_box(300))));
    c.bench_function("merkle_verify_512", |b| {
        b.iter(|| MerkleBatch::verify_proof(black_box(&leaves[300]), 300, &proof, &root))
    });
}

fn bench_combine(c: &mut Criterion) {
    let mut group = c.benchmark_group("combine");
    for parties in [2usize, 8, 64] {
        let reveals = secrets(parties);
        group.bench_with_input(BenchmarkId::from_parameter(parties), &reveals, |b, reveals| {
            b.iter(|| combine(black_box(reveals)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_prove_verify, bench_combine);
criterion_main!(benches);
