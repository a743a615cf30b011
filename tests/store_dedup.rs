use structdb::StructDbError;
use structdb::catalog::{Catalog, Granularity};
use structdb::construct::{Database, PersistenceMode, Struct};

fn with_leaves(values: &[u8]) -> Database {
    let db = Database::new(PersistenceMode::InMemory).expect("db");
    for value in values {
        db.insert(Struct::leaf(vec![*value])).expect("leaf");
    }
    db
}

#[test]
fn identical_children_are_kept_once() {
    let db = with_leaves(&[1, 2]);
    let (first, previously_kept) = db.keep_composite(vec![0, 1]).unwrap();
    assert!(!previously_kept);
    let (second, previously_kept) = db.keep_composite(vec![0, 1]).unwrap();
    assert!(previously_kept);
    assert_eq!(first.id(), second.id());
    assert_eq!(db.len().unwrap(), 3);
    assert_eq!(db.get_by_children(&[0, 1]).unwrap().map(|s| s.id()), Some(first.id()));
}

#[test]
fn children_order_matters() {
    let db = with_leaves(&[1, 2]);
    let forward = db.insert(Struct::composite(vec![0, 1])).unwrap();
    assert!(db.get_by_children(&[1, 0]).unwrap().is_none());
    let backward = db.insert(Struct::composite(vec![1, 0])).unwrap();
    assert_ne!(forward.id(), backward.id());
    assert_eq!(db.expand(backward.id()).unwrap(), vec![2, 1]);
}

#[test]
fn leaves_are_deduplicated_by_value() {
    let db = with_leaves(&[7]);
    let (leaf, previously_kept) = db.keep(Struct::leaf(vec![7])).unwrap();
    assert!(previously_kept);
    assert_eq!(leaf.id(), 0);
    assert_eq!(db.leaf_for(7).unwrap().id(), 0);
    // a value outside the kept alphabet gets a leaf of its own
    assert_eq!(db.leaf_for(9).unwrap().id(), 1);
}

#[test]
fn children_must_precede_their_owner() {
    let db = with_leaves(&[1, 2]);
    let err = db.keep_composite(vec![0, 5]).unwrap_err();
    assert!(matches!(err, StructDbError::OutOfRange { .. }));
    assert_eq!(db.len().unwrap(), 2, "a rejected struct is not kept");
}

#[test]
fn malformed_arguments_are_rejected() {
    let db = with_leaves(&[1]);
    assert!(matches!(
        db.keep_composite(Vec::new()),
        Err(StructDbError::InvalidArgument(_))
    ));
    assert!(matches!(
        db.keep(Struct::leaf(Vec::new())),
        Err(StructDbError::InvalidArgument(_))
    ));
    assert!(matches!(
        db.get_by_children(&[]),
        Err(StructDbError::InvalidArgument(_))
    ));
    assert!(db.get_by_literal_values(&[]).unwrap().is_none());
    assert!(db.get_by_id(42).unwrap().is_none());
}

#[test]
fn reserved_slots_are_filled_in_place() {
    let db = with_leaves(&[1, 2]);
    assert_eq!(db.new_id(false).unwrap(), 2);
    assert_eq!(db.len().unwrap(), 2, "peeking does not reserve");
    let reserved = db.new_id(true).unwrap();
    assert_eq!(reserved, 2);
    assert!(db.get_by_id(reserved).unwrap().is_none());
    assert_eq!(db.new_id(false).unwrap(), 3);

    let kept = db.insert_at(reserved, Struct::composite(vec![0, 1])).unwrap();
    assert_eq!(kept.id(), reserved);
    assert_eq!(db.get_by_children(&[0, 1]).unwrap().map(|s| s.id()), Some(reserved));

    assert!(matches!(
        db.insert_at(reserved, Struct::composite(vec![1, 1])),
        Err(StructDbError::InvalidArgument(_))
    ));
    assert!(matches!(
        db.insert_at(9, Struct::composite(vec![1, 1])),
        Err(StructDbError::InvalidArgument(_))
    ));
    let late = db.new_id(true).unwrap();
    assert!(matches!(
        db.insert_at(late, Struct::composite(vec![late])),
        Err(StructDbError::OutOfRange { .. })
    ));
}

#[test]
fn lookups_by_shape() {
    let db = Database::new(PersistenceMode::InMemory).unwrap();
    let mut catalog = Catalog::new(&db, Granularity::Byte);
    catalog.catalog(b"ABAB").unwrap();

    let pairs = db.structs_of_length(2).unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].id(), 256);
    assert_eq!(db.structs_of_length(1).unwrap().len(), 256);

    let whole = db.get_by_literal_values(b"ABAB").unwrap().expect("whole input");
    assert_eq!(whole.id(), 257);
    assert_eq!(whole.span(), 4);
    assert!(db.get_by_literal_values(b"BA").unwrap().is_none());

    let leaves = vec![db.get_by_id(65).unwrap().unwrap(), db.get_by_id(66).unwrap().unwrap()];
    assert_eq!(db.get_by_child_structs(&leaves).unwrap().map(|s| s.id()), Some(256));

    assert_eq!(db.first_value(257).unwrap(), Some(65));
    assert_eq!(db.descendants(257).unwrap(), vec![256, 65, 66, 256, 65, 66]);
    assert!(db.descendants(65).unwrap().is_empty());
}

#[test]
fn cache_hits_are_verified_and_bounded() {
    let db = Database::with_cache_capacity(PersistenceMode::InMemory, 1).unwrap();
    for value in 0..4 {
        db.insert(Struct::leaf(vec![value])).unwrap();
    }
    let first = db.insert(Struct::composite(vec![0, 1])).unwrap();
    let second = db.insert(Struct::composite(vec![2, 3])).unwrap();
    assert_eq!(db.lookup_cache().lock().unwrap().len(), 1);

    // evicted from the cache, still found through the index
    assert_eq!(db.get_by_children(&[0, 1]).unwrap().map(|s| s.id()), Some(first.id()));
    assert_eq!(db.get_by_children(&[0, 1]).unwrap().map(|s| s.id()), Some(first.id()));
    assert_eq!(db.get_by_children(&[2, 3]).unwrap().map(|s| s.id()), Some(second.id()));
    let cache = db.lookup_cache();
    let cache = cache.lock().unwrap();
    assert!(cache.hits() >= 1);
    assert!(cache.misses() >= 1);
}

#[test]
fn flush_clears_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::new(PersistenceMode::Directory(dir.path().to_path_buf())).unwrap();
    db.insert(Struct::leaf(vec![0])).unwrap();
    db.insert(Struct::composite(vec![0, 0])).unwrap();
    assert!(!db.lookup_cache().lock().unwrap().is_empty());
    db.flush().unwrap();
    assert!(db.lookup_cache().lock().unwrap().is_empty());
    assert_eq!(db.get_by_children(&[0, 0]).unwrap().map(|s| s.id()), Some(1));
}
