use structdb::StructDbError;
use structdb::catalog::{Catalog, Granularity};
use structdb::construct::{Database, PersistenceMode, StructId, Value};

fn concatenated(db: &Database, ids: &[StructId]) -> Vec<Value> {
    ids.iter().flat_map(|id| db.expand(*id).expect("expand")).collect()
}

#[test]
fn empty_input_changes_nothing() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut catalog = Catalog::new(&db, Granularity::Byte);
    let blueprint = catalog.catalog(&[]).expect("empty input is fine");
    assert!(blueprint.is_empty());
    assert!(blueprint.expand(&db).unwrap().is_empty());
    assert_eq!(db.len().unwrap(), 0, "no bootstrap for empty input");
}

#[test]
fn byte_input_bootstraps_and_reduces() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut catalog = Catalog::new(&db, Granularity::Byte);
    assert_eq!(catalog.bootstrap().unwrap(), 256);
    assert!(db.snapshot().unwrap().iter().all(|s| s.is_leaf() && s.values() == [s.id() as u8]));
    assert_eq!(catalog.tokenize(&[65, 66, 65, 66]).unwrap(), vec![65, 66, 65, 66]);

    let blueprint = catalog.catalog(&[65, 66, 65, 66]).unwrap();
    assert_eq!(blueprint.root(), Some(257));
    assert_eq!(db.len().unwrap(), 258);
    let root = db.get_by_id(257).unwrap().unwrap();
    assert_eq!(root.children(), &[256, 256]);
    assert_eq!(db.get_by_id(256).unwrap().unwrap().children(), &[65, 66]);
    assert_eq!(blueprint.expand(&db).unwrap(), vec![65, 66, 65, 66]);

    let again = catalog.catalog(&[65, 66, 65, 66]).unwrap();
    assert_eq!(again, blueprint);
    assert_eq!(db.len().unwrap(), 258, "a repeated input creates nothing");
}

#[test]
fn known_inputs_short_circuit() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut catalog = Catalog::new(&db, Granularity::Byte);
    catalog.catalog(b"ABAB").unwrap();
    let before = db.len().unwrap();
    assert_eq!(catalog.catalog(b"AB").unwrap().root(), Some(256));
    assert_eq!(catalog.catalog(b"A").unwrap().root(), Some(65));
    assert_eq!(db.len().unwrap(), before);
}

#[test]
fn tokenizer_reuses_the_newest_patterns_first() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut catalog = Catalog::new(&db, Granularity::Byte);
    catalog.catalog(b"ABAB").unwrap();
    assert_eq!(catalog.tokenize(b"ABABAB").unwrap(), vec![257, 256]);
    assert!(catalog.memo_len() > 0);

    let blueprint = catalog.catalog(b"ABABAB").unwrap();
    assert_eq!(blueprint.root(), Some(258));
    assert_eq!(db.get_by_id(258).unwrap().unwrap().children(), &[257, 256]);
    assert_eq!(blueprint.expand(&db).unwrap(), b"ABABAB".to_vec());
}

#[test]
fn tokenizer_never_overlaps_matches() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut catalog = Catalog::new(&db, Granularity::Byte);
    catalog.catalog(b"AA").unwrap();
    let tokens = catalog.tokenize(b"AAAAA").unwrap();
    assert_eq!(tokens, vec![256, 256, 65]);
    assert_eq!(concatenated(&db, &tokens), b"AAAAA".to_vec());
}

#[test]
fn odd_token_is_carried_to_the_next_level() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let catalog = Catalog::new(&db, Granularity::Byte);
    catalog.bootstrap().unwrap();
    let root = catalog.reduce(&[1, 2, 3]).unwrap();
    assert_eq!(root.children(), &[256, 3]);
    assert_eq!(db.get_by_id(256).unwrap().unwrap().children(), &[1, 2]);
    assert_eq!(db.expand(root.id()).unwrap(), vec![1, 2, 3]);

    let single = catalog.reduce(&[7]).unwrap();
    assert_eq!(single.id(), 7);
    assert!(matches!(catalog.reduce(&[]), Err(StructDbError::InvalidArgument(_))));
}

#[test]
fn bit_streams_use_a_two_leaf_alphabet() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut catalog = Catalog::new(&db, Granularity::Bit);
    let input = [1, 0, 1, 1, 0, 1, 1, 0, 1];
    let blueprint = catalog.catalog(&input).unwrap();
    assert_eq!(db.structs_of_length(1).unwrap().len(), 2);
    assert_eq!(catalog.expand(&blueprint).unwrap(), input.to_vec());
}

#[test]
fn full_blueprints_list_every_descendant() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut catalog = Catalog::new(&db, Granularity::Byte).with_full_blueprints(true);
    let blueprint = catalog.catalog(b"ABAB").unwrap();
    assert!(blueprint.is_full());
    assert_eq!(blueprint.descendants(), Some(&[256, 65, 66, 256, 65, 66][..]));
    let bytes = blueprint.to_bytes().unwrap();
    assert_eq!(db.materialize(&bytes).unwrap(), b"ABAB".to_vec());
}

#[test]
fn one_store_serves_many_inputs() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut catalog = Catalog::new(&db, Granularity::Byte);
    let inputs: [&[u8]; 4] = [b"the cat sat", b"the cat sat on the mat", b"mat", b"on the mat the cat sat"];
    let blueprints: Vec<_> = inputs.iter().map(|input| catalog.catalog(input).unwrap()).collect();
    for (input, blueprint) in inputs.iter().zip(&blueprints) {
        assert_eq!(blueprint.expand(&db).unwrap(), input.to_vec());
    }
    for kept in db.snapshot().unwrap() {
        assert!(kept.children().iter().all(|child| *child < kept.id()));
    }
}

#[test]
fn tokenizer_follows_structs_renumbered_by_a_flush() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(PersistenceMode::Directory(dir.path().to_path_buf())).unwrap();
    let mut catalog = Catalog::new(&db, Granularity::Byte);
    catalog.catalog(b"ABAB").unwrap();
    let (long, _) = db.keep_composite(vec![257, 67]).unwrap();
    let (short, _) = db.keep_composite(vec![68, 69]).unwrap();
    assert_eq!((long.id(), short.id()), (258, 259));
    assert_eq!(catalog.tokenize(b"DEDEDE").unwrap(), vec![259, 259, 259]);

    // the shorter pair moves ahead of the longer one
    let remap = db.flush().unwrap();
    assert_eq!(&remap[258..], &[259, 258]);
    let tokens = catalog.tokenize(b"DEDEDE").unwrap();
    assert_eq!(tokens, vec![258, 258, 258]);
    assert_eq!(concatenated(&db, &tokens), b"DEDEDE".to_vec());
}
