//! Store lifecycle integration tests
//!
//! Exercises provisioning, the free pool, bulk attach and restart
//! restore through the public Store API.

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use volstore::{Needle, Store, StoreConfig, StoreError, Volume, VolumeState};

fn test_config(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        block_dir: dir.path().join("block"),
        index_dir: dir.path().join("index"),
        volume_capacity: 16 * 1024 * 1024,
        ..StoreConfig::default()
    }
}

// =============================================================================
// Provisioning
// =============================================================================

#[test]
fn test_provision_write_read_cycle() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(test_config(&dir)).unwrap();

    let volume = store.add_volume(1).unwrap();
    for key in 0..100u64 {
        let payload = format!("payload-{}", key).into_bytes();
        volume.write(&Needle::new(key, key as u32, payload)).unwrap();
    }

    let mut needle = Needle::default();
    for key in 0..100u64 {
        store.probe(1, key, &mut needle).unwrap();
        assert_eq!(needle.data, format!("payload-{}", key).as_bytes());
        assert_eq!(needle.cookie, key as u32);
    }
}

#[test]
fn test_free_pool_assignment_preserves_writability() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(test_config(&dir)).unwrap();

    let bdir = dir.path().join("block");
    let idir = dir.path().join("index");
    assert_eq!(store.add_free_volume(2, &bdir, &idir).unwrap(), 2);

    let volume = store.add_volume(5).unwrap();
    assert_eq!(volume.state(), VolumeState::Writable);
    volume.write(&Needle::new(9, 0, b"from-pool".to_vec())).unwrap();

    let mut needle = Needle::default();
    store.probe(5, 9, &mut needle).unwrap();
    assert_eq!(needle.data, b"from-pool");
}

#[test]
fn test_concurrent_provisioning_distinct_ids() {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(test_config(&dir)).unwrap());

    let handles: Vec<_> = (0..8u32)
        .map(|id| {
            let store = Arc::clone(&store);
            thread::spawn(move || store.add_volume(id).map(|_| id))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let mut ids = store.volume_ids();
    ids.sort_unstable();
    assert_eq!(ids, (0..8).collect::<Vec<_>>());
}

// =============================================================================
// Restart restore
// =============================================================================

#[test]
fn test_restart_restores_volumes_and_data() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open(test_config(&dir)).unwrap();
        for id in [1u32, 2, 3] {
            let volume = store.add_volume(id).unwrap();
            volume
                .write(&Needle::new(u64::from(id) * 10, 7, vec![id as u8; 64]))
                .unwrap();
        }
        let bdir = dir.path().join("block");
        let idir = dir.path().join("index");
        store.add_free_volume(2, &bdir, &idir).unwrap();
    }

    let store = Store::open(test_config(&dir)).unwrap();
    assert_eq!(store.volume_ids().len(), 3);
    assert_eq!(store.free_volume_count(), 2);

    let mut needle = Needle::default();
    for id in [1u32, 2, 3] {
        store.probe(id, u64::from(id) * 10, &mut needle).unwrap();
        assert_eq!(needle.data, vec![id as u8; 64]);
    }
}

#[test]
fn test_restart_after_delete_keeps_tombstone() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open(test_config(&dir)).unwrap();
        let volume = store.add_volume(1).unwrap();
        volume.write(&Needle::new(1, 0, b"a".to_vec())).unwrap();
        volume.write(&Needle::new(2, 0, b"b".to_vec())).unwrap();
        volume.delete(1).unwrap();
    }

    let store = Store::open(test_config(&dir)).unwrap();
    let mut needle = Needle::default();
    assert!(matches!(
        store.probe(1, 1, &mut needle),
        Err(StoreError::Volume(volstore::VolumeError::NeedleDeleted(1)))
    ));
    store.probe(1, 2, &mut needle).unwrap();
    assert_eq!(needle.data, b"b");
}

// =============================================================================
// Bulk attach
// =============================================================================

#[test]
fn test_bulk_attached_volume_is_read_only() {
    let dir = TempDir::new().unwrap();
    let store = Store::open(test_config(&dir)).unwrap();

    let source = TempDir::new().unwrap();
    let bfile = source.path().join("block_4");
    let ifile = source.path().join("block_4.idx");
    {
        let volume = Volume::create(4, &bfile, &ifile, 16 * 1024 * 1024).unwrap();
        volume.write(&Needle::new(77, 3, b"copied".to_vec())).unwrap();
    }

    store.bulk_volume(4, &bfile, &ifile).unwrap();
    let volume = store.volume(4).unwrap();
    assert_eq!(volume.state(), VolumeState::ReadOnly);

    let mut needle = Needle::default();
    store.probe(4, 77, &mut needle).unwrap();
    assert_eq!(needle.data, b"copied");
    assert_eq!(needle.cookie, 3);

    assert!(matches!(
        volume.write(&Needle::new(1, 0, b"x".to_vec())),
        Err(volstore::VolumeError::NotWritable(VolumeState::ReadOnly))
    ));
}
