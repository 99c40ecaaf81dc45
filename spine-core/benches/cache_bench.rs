use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use spine_core::types::*;
use spine_core::{AttributeDescriptor, ClassBuilder, ClassModel, Config, Credentials, Spine};

fn runtime(entities: i64) -> Spine {
    let (spine, store) = Spine::in_memory(Config::default());
    let model = ClassModel::new("host")
        .primary(AttributeDescriptor::new("id", SemanticType::Int))
        .slot(AttributeDescriptor::new("name", SemanticType::String).writable());
    for id in 1..=entities {
        let mut values = SlotValues::new();
        values.insert("name".to_string(), Value::Str(format!("host-{}", id)));
        store.insert(&model, PrimaryKey::single(id), values);
    }
    store.add_account("ops", "pw", EntityKey::new("person", PrimaryKey::single("ops")));
    if let Err(err) = spine.register(ClassBuilder::new(model)) {
        panic!("host class rejected: {}", err);
    }
    spine
}

fn bench_cached_fetch(c: &mut Criterion) {
    let spine = runtime(1);
    let session = spine.login(&Credentials::new("ops", "pw")).unwrap();
    let tx = session.new_transaction().unwrap();
    // keep the instance alive so every fetch is a hit
    let _pinned = tx.fetch("host", PrimaryKey::single(1)).unwrap();

    c.bench_function("cache_fetch_hit", |b| {
        b.iter(|| black_box(tx.fetch("host", PrimaryKey::single(1)).unwrap()))
    });
}

fn bench_cold_fetch(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache_fetch_cold");

    for entities in [10_i64, 100, 1000] {
        let spine = runtime(entities);
        let session = spine.login(&Credentials::new("ops", "pw")).unwrap();

        group.bench_with_input(BenchmarkId::new("entities", entities), &entities, |b, &count| {
            b.iter(|| {
                let tx = session.new_transaction().unwrap();
                // instances are dropped right away, so each fetch reloads
                for id in 1..=count {
                    black_box(tx.fetch("host", PrimaryKey::single(id)).unwrap());
                }
                tx.rollback().unwrap();
                black_box(spine.cache().purge())
            })
        });
    }

    group.finish();
}

fn bench_hot_set(c: &mut Criterion) {
    let spine = runtime(100);
    let session = spine.login(&Credentials::new("ops", "pw")).unwrap();
    let tx = session.new_transaction().unwrap();
    let pinned: Vec<_> = (1..=100)
        .map(|id| tx.fetch("host", PrimaryKey::single(id)).unwrap())
        .collect();

    c.bench_function("cache_read_hot_set", |b| {
        b.iter(|| {
            for entity in &pinned {
                black_box(tx.get(entity, "name").unwrap());
            }
        })
    });
}

criterion_group!(benches, bench_cached_fetch, bench_cold_fetch, bench_hot_set);
criterion_main!(benches);
