use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;
use weft_checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};

fn sample_checkpoint() -> Checkpoint {
    let mut state = HashMap::new();
    state.insert("draft".to_string(), serde_json::json!("some text"));
    state.insert("step".to_string(), serde_json::json!(3));
    Checkpoint::new("bench-run", "bench-graph", "review", state, HashMap::new())
}

fn checkpoint_save_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("checkpoint save", |b| {
        b.to_async(&runtime).iter(|| async {
            let store = InMemoryCheckpointStore::new();
            store.save(black_box(sample_checkpoint())).await.unwrap();
        });
    });
}

fn checkpoint_load_benchmark(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("checkpoint load", |b| {
        b.to_async(&runtime).iter(|| async {
            let store = InMemoryCheckpointStore::new();
            let id = store.save(sample_checkpoint()).await.unwrap();
            store.load(black_box(&id)).await.unwrap();
        });
    });
}

criterion_group!(benches, checkpoint_save_benchmark, checkpoint_load_benchmark);
criterion_main!(benches);
