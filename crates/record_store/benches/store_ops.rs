use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use record_store::{RecordStore, StoreConfig};
use seal_core::FixedIdentity;

fn bench_store(c: &mut Criterion) {
    c.bench_function("store_4k", |b| {
        b.iter_batched(
            || {
                let dir = tempfile::tempdir().unwrap();
                let store = RecordStore::open(
                    StoreConfig::with_root(dir.path()),
                    &FixedIdentity::new(&b"bench-device"[..]),
                )
                .unwrap();
                (dir, store)
            },
            |(_dir, store)| {
                store.store("payload", &[0x5au8; 4096]).unwrap();
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_retrieve(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let store = RecordStore::open(
        StoreConfig::with_root(dir.path()),
        &FixedIdentity::new(&b"bench-device"[..]),
    )
    .unwrap();
    store.store("payload", &[0x5au8; 4096]).unwrap();

    c.bench_function("retrieve_4k", |b| {
        b.iter(|| store.retrieve("payload").unwrap());
    });
}

criterion_group!(benches, bench_store, bench_retrieve);
criterion_main!(benches);
