//! Delay proof benchmarks
//!
//! compute растёт линейно по T (плюс второй проход для proof),
//! verify должен оставаться почти постоянным.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use montana_finality::{DelayProofEngine, MerkleTree, sha3};
use std::time::Duration;

const DISCRIMINANT_BITS: [u32; 2] = [256, 512];

fn bench_compute(c: &mut Criterion) {
    let mut group = c.benchmark_group("delay-proof-compute");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(10));

    for bits in DISCRIMINANT_BITS {
        let engine = DelayProofEngine::new(bits, 128, 1 << 20);
        for iterations in [100u64, 1_000] {
            group.bench_with_input(
                BenchmarkId::new(format!("{}bit", bits), iterations),
                &iterations,
                |b, &t| b.iter(|| engine.compute(black_box(b"bench-seed"), t)),
            );
        }
    }
    group.finish();
}

fn bench_verify(c: &mut Criterion) {
    let mut group = c.benchmark_group("delay-proof-verify");
    group.sample_size(20);

    for bits in DISCRIMINANT_BITS {
        let engine = DelayProofEngine::new(bits, 128, 1 << 20);
        for iterations in [100u64, 1_000] {
            let Ok(proof) = engine.compute(b"bench-seed", iterations) else {
                continue;
            };
            group.bench_with_input(
                BenchmarkId::new(format!("{}bit", bits), iterations),
                &proof,
                |b, proof| b.iter(|| engine.verify_for_input(black_box(b"bench-seed"), proof)),
            );
        }
    }
    group.finish();
}

fn bench_checkpoint_roots(c: &mut Criterion) {
    let mut group = c.benchmark_group("checkpoint-roots");
    for count in [21usize, 1_000] {
        let leaves: Vec<_> = (0..count).map(|i| sha3(&(i as u64).to_be_bytes())).collect();
        group.bench_with_input(BenchmarkId::new("proofs_root", count), &leaves, |b, leaves| {
            b.iter(|| MerkleTree::from_set(black_box(leaves.iter().copied())).root())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compute, bench_verify, bench_checkpoint_roots);
criterion_main!(benches);
