//! Performance benchmarks for value conversion and dispatch.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use docbridge::dispatch::{pack, unpack};
use docbridge::{
    EngineConfig, ExecutionContext, MemoryEngine, Session, SessionConfig, Value, ValueReader,
    ValueWriter, TOKEN_KEY,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn sample_document(fields: usize) -> BTreeMap<String, Value> {
    (0..fields)
        .map(|i| {
            let value = Value::from(json!({
                "name": format!("item-{}", i),
                "count": i,
                "ratio": i as f64 / 3.0,
                "tags": ["a", "b", "c"],
                "owner": {"id": i, "active": i % 2 == 0},
            }));
            (format!("field{}", i), value)
        })
        .collect()
}

/// Benchmark encoding host dictionaries into engine values
fn bench_write_dict(c: &mut Criterion) {
    let mut group = c.benchmark_group("write_dict");
    let writer = ValueWriter::default();

    for fields in [1, 10, 100, 1000] {
        let doc = sample_document(fields);
        group.bench_with_input(BenchmarkId::new("fields", fields), &doc, |b, doc| {
            b.iter(|| black_box(writer.write_dict(doc).unwrap().into_dict()));
        });
    }

    group.finish();
}

/// Benchmark nested and flattened reads of the same dictionary
fn bench_read_dict(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_dict");
    let reader = ValueReader::default();

    for fields in [1, 10, 100, 1000] {
        let dict = ValueWriter::default()
            .write_dict(&sample_document(fields))
            .unwrap()
            .into_dict();

        group.bench_with_input(BenchmarkId::new("nested", fields), &dict, |b, dict| {
            b.iter(|| black_box(reader.read_dict(dict).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("flattened", fields), &dict, |b, dict| {
            b.iter(|| black_box(reader.read_flattened(dict).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark context marshaling across the callback boundary
fn bench_context_packing(c: &mut Criterion) {
    let mut group = c.benchmark_group("context_packing");
    let writer = ValueWriter::default();
    let reader = ValueReader::default();

    for entries in [1, 8, 32] {
        let mut context = ExecutionContext::new().with_token("bench-token");
        for i in 0..entries {
            context.insert(format!("key{}", i), format!("value{}", i));
        }
        let keys: Vec<String> = context.keys().map(str::to_owned).collect();

        group.bench_with_input(BenchmarkId::new("pack", entries), &context, |b, context| {
            b.iter(|| black_box(pack(context, &keys, &writer).unwrap()));
        });

        let dict = pack(&context, &keys, &writer).unwrap();
        group.bench_with_input(BenchmarkId::new("unpack", entries), &dict, |b, dict| {
            b.iter(|| black_box(unpack(dict, &reader).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark end-to-end event delivery through the notification worker
fn bench_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch");

    for listeners in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new("listeners", listeners),
            &listeners,
            |b, &count| {
                let engine = Arc::new(MemoryEngine::new(EngineConfig::default()).unwrap());
                let session = Session::new(engine.clone(), SessionConfig::default());
                let delivered = Arc::new(AtomicUsize::new(0));
                for i in 0..count {
                    let delivered = delivered.clone();
                    session
                        .add_database_change_listener(
                            ExecutionContext::new().with("slot", i as i64),
                            &[TOKEN_KEY, "slot"],
                            move |_, ids| {
                                delivered.fetch_add(ids.len(), Ordering::Relaxed);
                            },
                        )
                        .unwrap();
                }
                let doc = sample_document(4);

                b.iter(|| {
                    session.save_properties("doc", &doc).unwrap();
                    engine.flush();
                });
                black_box(delivered.load(Ordering::Relaxed));
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_write_dict,
    bench_read_dict,
    bench_context_packing,
    bench_dispatch,
);

criterion_main!(benches);
