//! Benchmarks for Accord commit operations

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

use accord_state::{DependencyGraph, DerivedSectionDefinition};
use accord_test::{CommitFuzzer, CommitFuzzerConfig, HarnessBuilder, ScenarioHarness};

fn chain(len: usize) -> ScenarioHarness {
    let mut builder = HarnessBuilder::new().section("s0", json!({ "n": 0 }));
    for i in 1..len {
        let previous = format!("s{}", i - 1);
        builder = builder.section_depending(&format!("s{}", i), json!({ "n": 0 }), &[previous.as_str()]);
    }
    let keys: Vec<String> = (0..len).map(|i| format!("s{}", i)).collect();
    builder
        .derived(DerivedSectionDefinition::new("total", keys, |inputs| {
            json!(inputs.iter().filter_map(|v| v["n"].as_i64()).sum::<i64>())
        }))
        .build()
        .unwrap()
}

fn bench_single_set(c: &mut Criterion) {
    let harness = chain(4);
    let mut n = 0i64;

    c.bench_function("single_set", |b| {
        b.iter(|| {
            n += 1;
            harness.conductor.set("s0", black_box(json!({ "n": n }))).unwrap();
            harness.drain()
        })
    });
}

fn bench_identical_write(c: &mut Criterion) {
    let harness = chain(4);

    c.bench_function("identical_write", |b| {
        b.iter(|| {
            harness
                .conductor
                .set("s0", black_box(json!({ "n": 0 })))
                .unwrap()
        })
    });
}

fn bench_transaction_by_width(c: &mut Criterion) {
    let mut group = c.benchmark_group("transaction_by_width");

    for width in [4, 16, 64] {
        let harness = chain(width);
        let mut n = 0i64;

        group.bench_with_input(BenchmarkId::from_parameter(width), &width, |b, &width| {
            b.iter(|| {
                n += 1;
                let conductor = &harness.conductor;
                conductor
                    .transaction(|| {
                        for i in 0..width {
                            conductor.patch(&format!("s{}", i), json!({ "n": n }))?;
                        }
                        Ok(())
                    })
                    .unwrap();
                harness.drain()
            })
        });
    }

    group.finish();
}

fn bench_topological_order(c: &mut Criterion) {
    let mut graph = DependencyGraph::new();
    for i in 0..200usize {
        let depends_on: Vec<String> = (i.saturating_sub(3)..i).map(|d| format!("k{}", d)).collect();
        graph.add_node(&format!("k{}", i), &depends_on).unwrap();
    }

    c.bench_function("topological_order_200", |b| {
        b.iter(|| black_box(graph.topological_order().unwrap()))
    });
}

fn bench_commit_fuzz_light(c: &mut Criterion) {
    c.bench_function("commit_fuzz_light", |b| {
        b.iter(|| {
            let mut fuzzer = CommitFuzzer::new(CommitFuzzerConfig::light()).unwrap();
            black_box(fuzzer.run())
        })
    });
}

criterion_group!(
    benches,
    bench_single_set,
    bench_identical_write,
    bench_transaction_by_width,
    bench_topological_order,
    bench_commit_fuzz_light,
);
criterion_main!(benches);
