#![cfg(feature = "fjall")]

use std::collections::HashSet;

use unityd_storage::fjall::{FjallOptions, FjallStore};
use unityd_storage::{Column, KeyValueStore, WriteBatch};

#[test]
fn columns_round_trip_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");

    let store = FjallStore::open(dir.path()).expect("open fjall");
    store.put(Column::Meta, b"key", b"value").expect("put");
    assert_eq!(
        store.get(Column::Meta, b"key").expect("get"),
        Some(b"value".to_vec())
    );

    store
        .put(Column::BlockInfo, &1u64.to_be_bytes(), b"a")
        .expect("put level");
    store
        .put(Column::BlockInfo, &2u64.to_be_bytes(), b"b")
        .expect("put level");
    let mut rows = HashSet::new();
    for (key, value) in store.scan_prefix(Column::BlockInfo, &[0u8; 7]).expect("scan") {
        rows.insert((key, value));
    }
    assert_eq!(
        rows,
        HashSet::from([
            (1u64.to_be_bytes().to_vec(), b"a".to_vec()),
            (2u64.to_be_bytes().to_vec(), b"b".to_vec()),
        ])
    );

    let mut batch = WriteBatch::new();
    batch.put(Column::BlockBody, b"hash", b"body".as_slice());
    batch.delete(Column::Meta, b"key");
    store.write_batch(&batch).expect("batch commit");
    store.flush().expect("flush");

    assert!(store.get(Column::Meta, b"key").expect("get").is_none());
    drop(store);

    let reopened = FjallStore::open(dir.path()).expect("reopen fjall");
    assert_eq!(
        reopened.get(Column::BlockBody, b"hash").expect("get"),
        Some(b"body".to_vec())
    );
}

#[test]
fn durable_batches_survive_without_flush() {
    let dir = tempfile::tempdir().expect("tempdir");
    let options = FjallOptions {
        durable_batches: true,
        ..FjallOptions::default()
    };
    {
        let store = FjallStore::open_with_options(dir.path(), options.clone()).expect("open");
        let mut batch = WriteBatch::new();
        batch.put(Column::StateJournal, 7u64.to_be_bytes(), vec![0xab; 64]);
        batch.put(Column::WorldState, [0x11u8; 32], b"snapshot".as_slice());
        store.write_batch(&batch).expect("commit");
    }

    let reopened = FjallStore::open_with_options(dir.path(), options).expect("reopen");
    assert_eq!(
        reopened
            .get(Column::StateJournal, &7u64.to_be_bytes())
            .expect("get"),
        Some(vec![0xab; 64])
    );
    assert!(reopened
        .contains(Column::WorldState, &[0x11; 32])
        .expect("contains"));
}
