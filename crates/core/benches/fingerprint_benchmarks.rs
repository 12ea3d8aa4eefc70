//! Benchmarks for the content-fingerprint hot path.
//!
//! Run with: cargo bench -p same-core

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::hint::black_box;
use std::io::Write;
use std::path::PathBuf;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use same_core::fingerprint::{compute_input_hash, FingerprintInput};

fn make_inputs(count: usize, size_bytes: usize) -> Vec<PathBuf> {
    let dir = tempfile::tempdir().unwrap();
    let dir = dir.into_path();
    let mut paths = Vec::with_capacity(count);
    for i in 0..count {
        let path = dir.join(format!("input_{i}.txt"));
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&vec![b'a'; size_bytes]).unwrap();
        paths.push(path);
    }
    paths
}

fn bench_input_hash(c: &mut Criterion) {
    let mut group = c.benchmark_group("compute_input_hash");
    for count in [1, 10, 100] {
        let resolved_inputs = make_inputs(count, 4096);
        let input = FingerprintInput {
            command: vec!["cargo".to_string(), "build".to_string()],
            tools: BTreeMap::new(),
            environment: BTreeMap::new(),
            resolved_inputs,
            working_dir: PathBuf::from("/workspace"),
        };
        group.bench_with_input(BenchmarkId::from_parameter(count), &input, |b, input| {
            b.iter(|| black_box(compute_input_hash(input).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_input_hash);
criterion_main!(benches);
