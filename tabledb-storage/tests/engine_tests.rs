//! Trait-contract tests for the redb storage backend.

use std::ops::Bound;

use tabledb_storage::backends::RedbEngine;
use tabledb_storage::{StorageEngine, StorageError, Transaction};

fn engine() -> RedbEngine {
    RedbEngine::in_memory().expect("failed to create engine")
}

#[test]
fn basic_operations() {
    let engine = engine();

    {
        let mut tx = engine.begin_write().expect("begin write");
        tx.put("test_table", b"key1", b"value1").expect("put");
        tx.commit().expect("commit");
    }

    {
        let tx = engine.begin_read().expect("begin read");
        assert_eq!(
            tx.get("test_table", b"key1").expect("get"),
            Some(b"value1".to_vec())
        );
    }

    {
        let mut tx = engine.begin_write().expect("begin write");
        tx.put("test_table", b"key1", b"value1_updated").expect("put");
        tx.commit().expect("commit");
    }

    {
        let tx = engine.begin_read().expect("begin read");
        assert_eq!(
            tx.get("test_table", b"key1").expect("get"),
            Some(b"value1_updated".to_vec())
        );
    }

    {
        let mut tx = engine.begin_write().expect("begin write");
        assert!(tx.delete("test_table", b"key1").expect("delete"));
        assert!(!tx.delete("test_table", b"missing").expect("delete absent"));
        tx.commit().expect("commit");
    }

    {
        let tx = engine.begin_read().expect("begin read");
        assert_eq!(tx.get("test_table", b"key1").expect("get"), None);
    }
}

#[test]
fn uncommitted_writes_roll_back_on_drop() {
    let engine = engine();

    {
        let mut tx = engine.begin_write().expect("begin write");
        tx.put("t", b"k", b"v").expect("put");
        // dropped without commit
    }

    let tx = engine.begin_read().expect("begin read");
    assert_eq!(tx.get("t", b"k").expect("get"), None);
}

#[test]
fn rollback_discards_writes() {
    let engine = engine();

    let mut tx = engine.begin_write().expect("begin write");
    tx.put("t", b"k", b"v").expect("put");
    tx.rollback().expect("rollback");

    let tx = engine.begin_read().expect("begin read");
    assert_eq!(tx.get("t", b"k").expect("get"), None);
}

#[test]
fn read_only_enforcement() {
    let engine = engine();

    let mut tx = engine.begin_read().expect("begin read");
    assert!(matches!(
        tx.put("t", b"k", b"v"),
        Err(StorageError::ReadOnly)
    ));
    assert!(matches!(tx.delete("t", b"k"), Err(StorageError::ReadOnly)));
}

#[test]
fn scan_is_ordered_and_respects_bounds() {
    let engine = engine();

    {
        let mut tx = engine.begin_write().expect("begin write");
        for key in [b"c".as_slice(), b"a", b"e", b"b", b"d"] {
            tx.put("t", key, key).expect("put");
        }
        tx.commit().expect("commit");
    }

    let tx = engine.begin_read().expect("begin read");

    let all = tx
        .scan("t", Bound::Unbounded, Bound::Unbounded)
        .expect("scan");
    let keys: Vec<&[u8]> = all.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(keys, vec![b"a".as_slice(), b"b", b"c", b"d", b"e"]);

    let bounded = tx
        .scan("t", Bound::Included(b"b".as_slice()), Bound::Included(b"d"))
        .expect("scan");
    let keys: Vec<&[u8]> = bounded.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(keys, vec![b"b".as_slice(), b"c", b"d"]);

    let open_ended = tx
        .scan("t", Bound::Excluded(b"c".as_slice()), Bound::Unbounded)
        .expect("scan");
    let keys: Vec<&[u8]> = open_ended.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(keys, vec![b"d".as_slice(), b"e"]);
}

#[test]
fn logical_tables_are_isolated() {
    let engine = engine();

    {
        let mut tx = engine.begin_write().expect("begin write");
        tx.put("users", b"k", b"user").expect("put");
        tx.put("users2", b"k", b"other").expect("put");
        tx.put("orders", b"k", b"order").expect("put");
        tx.commit().expect("commit");
    }

    let tx = engine.begin_read().expect("begin read");
    assert_eq!(tx.get("users", b"k").expect("get"), Some(b"user".to_vec()));

    let users = tx
        .scan("users", Bound::Unbounded, Bound::Unbounded)
        .expect("scan");
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].1, b"user".to_vec());
}

#[test]
fn scan_of_missing_table_is_empty() {
    let engine = engine();
    let tx = engine.begin_read().expect("begin read");
    assert!(tx
        .scan("nothing", Bound::Unbounded, Bound::Unbounded)
        .expect("scan")
        .is_empty());
    assert_eq!(tx.get("nothing", b"k").expect("get"), None);
}

#[test]
fn file_backed_engine_persists_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store.redb");

    {
        let engine = RedbEngine::open(&path).expect("open");
        let mut tx = engine.begin_write().expect("begin write");
        tx.put("t", b"k", b"v").expect("put");
        tx.commit().expect("commit");
    }

    {
        let engine = RedbEngine::open(&path).expect("reopen");
        let tx = engine.begin_read().expect("begin read");
        assert_eq!(tx.get("t", b"k").expect("get"), Some(b"v".to_vec()));
    }
}
