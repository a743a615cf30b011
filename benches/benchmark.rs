use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use structdb::catalog::{Catalog, Granularity};
use structdb::construct::{Database, PersistenceMode};

// repetitive text, so the tokenizer has patterns to find
fn corpus(lines: usize) -> Vec<u8> {
    (0..lines)
        .map(|line| format!("line {} of the benchmark corpus, same words again\n", line % 17))
        .collect::<String>()
        .into_bytes()
}

fn catalog_fresh_store(c: &mut Criterion) {
    let input = corpus(64);
    c.bench_function("catalog into a fresh store", |b| {
        b.iter(|| {
            let db = Database::new(PersistenceMode::InMemory).unwrap();
            let mut catalog = Catalog::new(&db, Granularity::Byte);
            black_box(catalog.catalog(black_box(&input)).unwrap())
        })
    });
}

fn tokenize_warm_store(c: &mut Criterion) {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut catalog = Catalog::new(&db, Granularity::Byte);
    for lines in [8, 16, 32] {
        catalog.catalog(&corpus(lines)).unwrap();
    }
    let input = corpus(48);
    c.bench_function("tokenize against a warm store", |b| {
        b.iter(|| black_box(catalog.tokenize(black_box(&input)).unwrap()))
    });
}

fn expand_root(c: &mut Criterion) {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut catalog = Catalog::new(&db, Granularity::Byte);
    let blueprint = catalog.catalog(&corpus(128)).unwrap();
    c.bench_function("expand a blueprint", |b| {
        b.iter(|| black_box(blueprint.expand(&db).unwrap()))
    });
}

criterion_group!(benches, catalog_fresh_store, tokenize_warm_store, expand_root);
criterion_main!(benches);
