//! Compaction integration tests
//!
//! Compaction runs against live stores: space must be reclaimed, every
//! live needle must survive, and writes arriving while a compaction is
//! in flight must not be lost.

use std::fs;
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use volstore::{Needle, Store, StoreConfig, StoreError, VolumeError};

fn test_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        block_dir: dir.path().join("block"),
        index_dir: dir.path().join("index"),
        volume_capacity: 64 * 1024 * 1024,
        ..StoreConfig::default()
    }
}

#[test]
fn test_compaction_reclaims_space_and_keeps_live_needles() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(test_config(&dir)).unwrap();
    let volume = store.add_volume(1).unwrap();

    for key in 0..200u64 {
        volume.write(&Needle::new(key, 0, vec![0xAB; 512])).unwrap();
    }
    // Overwrite half, delete a quarter.
    for key in 0..100u64 {
        volume.write(&Needle::new(key, 1, vec![0xCD; 64])).unwrap();
    }
    for key in 100..150u64 {
        volume.delete(key).unwrap();
    }

    let before = fs::metadata(volume.block_path()).unwrap().len();
    store.compact_volume(1).unwrap();
    let after = fs::metadata(volume.block_path()).unwrap().len();
    assert!(after < before, "container should shrink: {} -> {}", before, after);

    let mut needle = Needle::default();
    for key in 0..100u64 {
        store.probe(1, key, &mut needle).unwrap();
        assert_eq!(needle.data, vec![0xCD; 64]);
        assert_eq!(needle.cookie, 1);
    }
    for key in 100..150u64 {
        assert!(matches!(
            store.probe(1, key, &mut needle),
            Err(StoreError::Volume(VolumeError::NeedleNotExist(_)))
        ));
    }
    for key in 150..200u64 {
        store.probe(1, key, &mut needle).unwrap();
        assert_eq!(needle.data, vec![0xAB; 512]);
    }
}

#[test]
fn test_compaction_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open(test_config(&dir)).unwrap();
        let volume = store.add_volume(1).unwrap();
        for key in 0..50u64 {
            volume.write(&Needle::new(key, 0, vec![1; 256])).unwrap();
        }
        for key in 0..25u64 {
            volume.delete(key).unwrap();
        }
        store.compact_volume(1).unwrap();
    }

    let store = Store::open(test_config(&dir)).unwrap();
    let mut needle = Needle::default();
    for key in 25..50u64 {
        store.probe(1, key, &mut needle).unwrap();
        assert_eq!(needle.data, vec![1; 256]);
    }
    for key in 0..25u64 {
        assert!(store.probe(1, key, &mut needle).is_err());
    }
}

#[test]
fn test_writes_during_compaction_are_not_lost() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(test_config(&dir)).unwrap());
    let volume = store.add_volume(1).unwrap();

    // Enough churn that the compactor has real work to do.
    for round in 0..4u32 {
        for key in 0..500u64 {
            volume.write(&Needle::new(key, round, vec![round as u8; 256])).unwrap();
        }
    }

    let compact_store = Arc::clone(&store);
    let compactor = thread::spawn(move || compact_store.compact_volume(1));

    // Concurrent writers on fresh keys while the compactor runs.
    let writer_volume = Arc::clone(&volume);
    let writer = thread::spawn(move || {
        for key in 10_000..10_100u64 {
            writer_volume
                .write(&Needle::new(key, 9, format!("late-{}", key).into_bytes()))
                .unwrap();
        }
    });

    writer.join().unwrap();
    compactor.join().unwrap().unwrap();

    let mut needle = Needle::default();
    for key in 10_000..10_100u64 {
        store.probe(1, key, &mut needle).unwrap();
        assert_eq!(needle.data, format!("late-{}", key).as_bytes());
    }
    for key in 0..500u64 {
        store.probe(1, key, &mut needle).unwrap();
        assert_eq!(needle.cookie, 3);
    }
}

#[test]
fn test_back_to_back_compactions() {
    // The Compacting state is transient; once a run finishes the volume
    // must accept the next one.
    let dir = TempDir::new().unwrap();
    let store = Store::open(test_config(&dir)).unwrap();
    let volume = store.add_volume(1).unwrap();
    for key in 0..10u64 {
        volume.write(&Needle::new(key, 0, vec![0; 128])).unwrap();
    }
    store.compact_volume(1).unwrap();
    store.compact_volume(1).unwrap();
}
