//! Counter cache synchronization benchmark
//!
//! Measures batch recounts where many owners share a few targets, and
//! eager loading against per-record lazy fetches.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use elif_record::{CounterSync, MemoryDatabase, ModelDefinition, Registry, Row};
use serde_json::{json, Value};

fn row(pairs: &[(&str, Value)]) -> Row {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

fn setup(books: usize, genres: usize) -> (MemoryDatabase, Registry, Vec<Value>) {
    let db = MemoryDatabase::new();
    let registry = Registry::new();
    registry.register(
        ModelDefinition::builder("Genre", db.repository("genres"))
            .has_many("books", "Book")
            .build()
            .expect("genre definition"),
    );
    registry.register(
        ModelDefinition::builder("Book", db.repository("books"))
            .belongs_to("genre", "Genre")
            .track("genre", "book_count")
            .build()
            .expect("book definition"),
    );

    db.seed(
        "genres",
        (0..genres).map(|i| row(&[("name", json!(format!("genre {}", i)))])).collect(),
    );
    let ids = db.seed(
        "books",
        (0..books)
            .map(|i| row(&[("genre_id", json!(i % genres + 1))]))
            .collect(),
    );
    (db, registry, ids)
}

fn bench_batch_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("counter_sync");

    for &books in &[10usize, 100, 1000] {
        let (_db, registry, ids) = setup(books, 5);
        let definition = registry.definition("Book").expect("registered");

        group.bench_with_input(BenchmarkId::new("shared_targets", books), &ids, |b, ids| {
            b.iter(|| {
                let mut sync = CounterSync::new(&registry, &definition);
                black_box(sync.sync_counters(black_box(ids)))
            })
        });
    }

    group.finish();
}

fn bench_loading(c: &mut Criterion) {
    let mut group = c.benchmark_group("relation_loading");
    let (_db, registry, _ids) = setup(500, 20);

    group.bench_function("eager_many_to_one", |b| {
        b.iter(|| {
            let books = registry
                .query("Book")
                .and_then(|query| query.with("genre"))
                .and_then(|query| query.all())
                .expect("eager load");
            black_box(books.len())
        })
    });

    group.bench_function("lazy_many_to_one", |b| {
        b.iter(|| {
            let mut books = registry
                .query("Book")
                .and_then(|query| query.all())
                .expect("load books");
            for book in books.iter_mut() {
                black_box(book.related("genre").map(|results| results.len()).ok());
            }
        })
    });

    group.finish();
}

criterion_group!(benches, bench_batch_sync, bench_loading);
criterion_main!(benches);
