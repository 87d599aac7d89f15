//! Benchmarks for the projection filter
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use docfeed::document::{filter, project_document, Mutation, Projection};
use serde_json::{json, Map, Value};

fn create_update(fields: usize) -> Mutation {
    let mut set = Map::new();
    for i in 0..fields {
        set.insert(format!("field{}.value", i), json!(i));
    }
    Mutation::from_parts(json!({"_id": "bench"}), json!({ "$set": set }))
        .expect("valid mutation")
}

fn create_document(fields: usize) -> Value {
    let mut doc = Map::new();
    doc.insert("_id".to_string(), json!("bench"));
    for i in 0..fields {
        doc.insert(format!("field{}", i), json!({"value": i, "note": "x"}));
    }
    Value::Object(doc)
}

fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter");

    for size in [10, 100, 1000] {
        let update = create_update(size);
        let include = Projection::include((0..size).step_by(2).map(|i| format!("field{}", i)));
        let exclude = Projection::exclude(["field1", "field3"]);

        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("all_{}", size), |b| {
            b.iter(|| filter(black_box(&update), &Projection::All))
        });

        group.bench_function(format!("include_{}", size), |b| {
            b.iter(|| filter(black_box(&update), &include))
        });

        group.bench_function(format!("exclude_{}", size), |b| {
            b.iter(|| filter(black_box(&update), &exclude))
        });
    }

    group.finish();
}

fn bench_bulk_expansion(c: &mut Criterion) {
    let mut group = c.benchmark_group("bulk_expansion");

    for size in [10, 100, 1000] {
        let elements: Vec<Value> = (0..size).map(|i| json!({"n": i})).collect();
        let update = Mutation::from_parts(
            json!({"_id": "bench"}),
            json!({"$pushAll": {"comments": elements}}),
        )
        .expect("valid mutation");

        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("push_all_{}", size), |b| {
            b.iter(|| filter(black_box(&update), &Projection::All))
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    let doc = create_document(200);
    let include = Projection::include((0..200).step_by(4).map(|i| format!("field{}", i)));

    group.bench_function("project_include_200", |b| {
        b.iter(|| project_document(black_box(&doc), &include))
    });

    group.bench_function("project_all_200", |b| {
        b.iter(|| project_document(black_box(&doc), &Projection::All))
    });

    group.finish();
}

criterion_group!(benches, bench_filter, bench_bulk_expansion, bench_snapshot);
criterion_main!(benches);
