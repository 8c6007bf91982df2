//! Volume compaction.
//!
//! Rewrites the live subset of a volume's records into a fresh container +
//! index pair, then atomically swaps the new files in, reclaiming the
//! space held by tombstones and superseded records.
//!
//! While the replay runs, reads keep hitting the old container and old
//! index. Writes and deletes are accepted into a staging log and applied
//! to the new container after the replay, so no operation is lost and no
//! caller blocks for the duration of the rewrite.
//!
//! A record that fails checksum verification during replay is dropped
//! with a warning and the replay continues; the goal is to carry every
//! readable live record across. If the sequential scan hits a record
//! whose header cannot be decoded, the remaining live records are
//! salvaged individually through their index offsets. Any other failure
//! aborts the compaction, leaves the old volume untouched, re-applies the
//! staged operations to it, and surfaces the error; a failed compaction
//! is safe to retry.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::needle::{Flag, Needle};
use crate::observability::Logger;

use super::errors::{VolumeError, VolumeResult};
use super::index::{self, IndexEntry, MemIndex};
use super::superblock::{write_superblock, BLOCK_MAGIC, INDEX_MAGIC, SUPERBLOCK_SIZE};
use super::volume::{BlockFile, RecordScanner, StagedOp, Volume, VolumeState};

/// Output files of the replay phase, swapped in during finish.
struct CompactOutput {
    block: File,
    block_path: PathBuf,
    index_file: File,
    index_path: PathBuf,
    index: MemIndex,
    write_offset: u64,
}

pub(crate) fn run(v: &Volume) -> VolumeResult<()> {
    // Transition to Compacting and snapshot the container. The writer lock
    // guarantees no append lands between the snapshot and the state change.
    let (snapshot_end, old_block, old_block_path) = {
        let mut writer = v.writer.lock().expect("volume writer lock poisoned");
        match writer.state {
            VolumeState::Compacting => return Err(VolumeError::CompactionRunning),
            VolumeState::ReadOnly => {
                return Err(VolumeError::NotWritable(VolumeState::ReadOnly))
            }
            VolumeState::Writable => {}
        }
        let block = v.block.read().expect("block lock poisoned");
        let old_block = block.file.try_clone()?;
        let old_block_path = block.path.clone();
        drop(block);

        writer.state = VolumeState::Compacting;
        writer.staged.clear();
        (writer.write_offset, old_block, old_block_path)
    };

    let old_index_path = v.index_path();
    let tmp_block_path = compact_path(&old_block_path);
    let tmp_index_path = compact_path(&old_index_path);

    Logger::info(
        "COMPACTION_START",
        &[
            ("volume", &v.id().to_string()),
            ("container_len", &snapshot_end.to_string()),
        ],
    );

    let result = replay(v, old_block, snapshot_end, &tmp_block_path, &tmp_index_path)
        .and_then(|output| finish(v, output, &old_block_path, &old_index_path, snapshot_end));
    if result.is_err() {
        abort(v, &tmp_block_path, &tmp_index_path);
    }
    result
}

fn compact_path(path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.compact", path.display()))
}

/// Copy every live record from the old container into fresh files.
fn replay(
    v: &Volume,
    old_block: File,
    snapshot_end: u64,
    tmp_block_path: &Path,
    tmp_index_path: &Path,
) -> VolumeResult<CompactOutput> {
    // A leftover .compact file from an aborted run is overwritten.
    let mut block = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(tmp_block_path)?;
    write_superblock(&mut block, BLOCK_MAGIC)?;

    let mut index_file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .read(true)
        .write(true)
        .open(tmp_index_path)?;
    write_superblock(&mut index_file, INDEX_MAGIC)?;

    let mut output = CompactOutput {
        block,
        block_path: tmp_block_path.to_path_buf(),
        index_file,
        index_path: tmp_index_path.to_path_buf(),
        index: MemIndex::new(),
        write_offset: SUPERBLOCK_SIZE,
    };

    let mut scanner = RecordScanner::new(old_block.try_clone()?, SUPERBLOCK_SIZE, snapshot_end)?;
    let stopped_at = loop {
        let offset = scanner.offset();
        match scanner.next_record() {
            Ok(Some((record_offset, needle))) => {
                if is_live(v, needle.key, record_offset) {
                    copy_record(&mut output, needle)?;
                }
            }
            Ok(None) => break None,
            Err(VolumeError::Needle(err)) if err.is_skippable() => {
                Logger::warn(
                    "COMPACTION_RECORD_DROPPED",
                    &[
                        ("volume", &v.id().to_string()),
                        ("offset", &offset.to_string()),
                        ("reason", &err.to_string()),
                    ],
                );
            }
            Err(VolumeError::Needle(err)) => {
                // The record boundary is gone; sequential replay cannot
                // continue past this point.
                Logger::warn(
                    "COMPACTION_SCAN_STOPPED",
                    &[
                        ("volume", &v.id().to_string()),
                        ("offset", &offset.to_string()),
                        ("reason", &err.to_string()),
                    ],
                );
                break Some(offset);
            }
            Err(err) => return Err(err),
        }
    };

    if let Some(stop_offset) = stopped_at {
        salvage(v, &old_block, stop_offset, snapshot_end, &mut output)?;
    }

    output.block.sync_all()?;
    output.index_file.sync_all()?;
    Ok(output)
}

/// A record survives if the current index still points exactly at it.
fn is_live(v: &Volume, key: u64, record_offset: u64) -> bool {
    let index = v.index.read().expect("index lock poisoned");
    matches!(
        index.get(&key),
        Some(entry) if entry.offset == record_offset && entry.flag == Flag::Normal
    )
}

fn copy_record(output: &mut CompactOutput, needle: &Needle) -> VolumeResult<()> {
    let buf = needle.encode();
    let entry = IndexEntry {
        offset: output.write_offset,
        size: needle.size(),
        flag: Flag::Normal,
    };
    output.block.write_all(&buf)?;
    index::append_entry(&mut output.index_file, needle.key, &entry)?;
    output.index.insert(needle.key, entry);
    output.write_offset += buf.len() as u64;
    Ok(())
}

/// Recover live records past an undecodable region through their index
/// offsets. Each record still verifies its own checksum; ones that fail
/// are dropped with a warning like any other corrupt record.
fn salvage(
    v: &Volume,
    old_block: &File,
    stop_offset: u64,
    snapshot_end: u64,
    output: &mut CompactOutput,
) -> VolumeResult<()> {
    let mut pending: Vec<(u64, u32)> = {
        let index = v.index.read().expect("index lock poisoned");
        index
            .values()
            .filter(|e| e.flag == Flag::Normal && e.offset >= stop_offset)
            .filter(|e| e.offset + Needle::encoded_len(e.size) as u64 <= snapshot_end)
            .map(|e| (e.offset, e.size))
            .collect()
    };
    pending.sort_unstable();

    let mut needle = Needle::default();
    for (offset, size) in pending {
        let mut buf = vec![0u8; Needle::encoded_len(size)];
        old_block.read_exact_at(&mut buf, offset)?;
        match needle.decode_into(&buf) {
            Ok(_) => copy_record(output, &needle)?,
            Err(err) => Logger::warn(
                "COMPACTION_RECORD_DROPPED",
                &[
                    ("volume", &v.id().to_string()),
                    ("offset", &offset.to_string()),
                    ("reason", &err.to_string()),
                ],
            ),
        }
    }
    Ok(())
}

/// Apply the staged operations to the new container, then atomically swap
/// it in for the old one and return the volume to Writable.
fn finish(
    v: &Volume,
    mut output: CompactOutput,
    old_block_path: &Path,
    old_index_path: &Path,
    old_len: u64,
) -> VolumeResult<()> {
    let mut writer = v.writer.lock().expect("volume writer lock poisoned");

    // The staging log is only cleared once the swap has succeeded; if
    // anything below fails, abort() replays it against the old container.
    for op in &writer.staged {
        match op {
            StagedOp::Write(needle) => copy_record(&mut output, needle)?,
            StagedOp::Delete(key) => {
                let key = *key;
                let Some(entry) = output.index.get(&key).copied() else {
                    // The target was superseded or dropped during replay.
                    continue;
                };
                let buf = Needle::tombstone(key).encode();
                let dead = IndexEntry {
                    flag: Flag::Deleted,
                    ..entry
                };
                output.block.write_all(&buf)?;
                index::append_entry(&mut output.index_file, key, &dead)?;
                output.index.insert(key, dead);
                output.write_offset += buf.len() as u64;
            }
        }
    }
    output.block.sync_all()?;
    output.index_file.sync_all()?;

    {
        let mut index = v.index.write().expect("index lock poisoned");
        let mut block = v.block.write().expect("block lock poisoned");

        // Two renames cannot be atomic together. If the second one fails,
        // the in-memory state below is never touched: the volume keeps
        // serving from the still-open old file handles and the error is
        // surfaced; only the on-disk paths need operator attention.
        std::fs::rename(&output.block_path, old_block_path)?;
        std::fs::rename(&output.index_path, old_index_path)?;

        *block = BlockFile {
            file: output.block,
            path: old_block_path.to_path_buf(),
        };
        *index = output.index;
        writer.index_file = output.index_file;
        writer.write_offset = output.write_offset;
        writer.state = VolumeState::Writable;
        writer.staged.clear();
    }

    Logger::info(
        "COMPACTION_COMPLETE",
        &[
            ("volume", &v.id().to_string()),
            ("old_len", &old_len.to_string()),
            ("new_len", &writer.write_offset.to_string()),
        ],
    );
    Ok(())
}

/// Undo a failed compaction: drop the temp files, return the volume to
/// Writable, and re-apply any staged operations to the old container so
/// nothing accepted during the attempt is lost.
fn abort(v: &Volume, tmp_block_path: &Path, tmp_index_path: &Path) {
    let _ = std::fs::remove_file(tmp_block_path);
    let _ = std::fs::remove_file(tmp_index_path);

    let staged = {
        let mut writer = v.writer.lock().expect("volume writer lock poisoned");
        writer.state = VolumeState::Writable;
        std::mem::take(&mut writer.staged)
    };

    for op in staged {
        let result = match op {
            StagedOp::Write(ref needle) => v.write(needle).map(|_| ()),
            StagedOp::Delete(key) => v.delete(key),
        };
        if let Err(err) = result {
            Logger::error(
                "COMPACTION_STAGED_REPLAY_FAILED",
                &[
                    ("volume", &v.id().to_string()),
                    ("reason", &err.to_string()),
                ],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_volume(dir: &TempDir) -> Volume {
        Volume::create(
            7,
            &dir.path().join("block_7"),
            &dir.path().join("block_7.idx"),
            64 * 1024 * 1024,
        )
        .unwrap()
    }

    #[test]
    fn test_compaction_reclaims_space() {
        let dir = TempDir::new().unwrap();
        let volume = new_volume(&dir);

        volume.write(&Needle::new(1, 0, vec![0xaa; 1024])).unwrap();
        volume.write(&Needle::new(2, 0, b"keep".to_vec())).unwrap();
        volume.write(&Needle::new(1, 0, vec![0xbb; 1024])).unwrap();
        volume.delete(1).unwrap();

        let before = volume.write_offset();
        volume.compact().unwrap();
        let after = volume.write_offset();

        assert!(after < before);
        assert_eq!(volume.read(2).unwrap().data, b"keep");
        assert!(matches!(
            volume.read(1).unwrap_err(),
            VolumeError::NeedleNotExist(1)
        ));
        assert_eq!(volume.state(), VolumeState::Writable);
    }

    #[test]
    fn test_compaction_keeps_latest_version() {
        let dir = TempDir::new().unwrap();
        let volume = new_volume(&dir);

        volume.write(&Needle::new(1, 0, b"old".to_vec())).unwrap();
        volume.write(&Needle::new(1, 0, b"new".to_vec())).unwrap();
        volume.compact().unwrap();

        assert_eq!(volume.read(1).unwrap().data, b"new");
        assert_eq!(volume.live_count(), 1);
    }

    #[test]
    fn test_volume_writable_after_compaction() {
        let dir = TempDir::new().unwrap();
        let volume = new_volume(&dir);

        volume.write(&Needle::new(1, 0, b"a".to_vec())).unwrap();
        volume.compact().unwrap();
        volume.write(&Needle::new(2, 0, b"b".to_vec())).unwrap();

        assert_eq!(volume.read(1).unwrap().data, b"a");
        assert_eq!(volume.read(2).unwrap().data, b"b");
    }

    #[test]
    fn test_compaction_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let block_path = dir.path().join("block_7");
        let index_path = dir.path().join("block_7.idx");
        {
            let volume =
                Volume::create(7, &block_path, &index_path, 64 * 1024 * 1024).unwrap();
            volume.write(&Needle::new(1, 0, b"gone".to_vec())).unwrap();
            volume.write(&Needle::new(2, 0, b"kept".to_vec())).unwrap();
            volume.delete(1).unwrap();
            volume.compact().unwrap();
        }

        let volume = Volume::open(7, &block_path, &index_path, 64 * 1024 * 1024).unwrap();
        assert_eq!(volume.read(2).unwrap().data, b"kept");
        assert!(volume.read(1).is_err());
        assert!(!compact_path(&block_path).exists());
    }

    #[test]
    fn test_readonly_volume_rejects_compaction() {
        let dir = TempDir::new().unwrap();
        let block_path = dir.path().join("block_7");
        let index_path = dir.path().join("block_7.idx");
        {
            let volume =
                Volume::create(7, &block_path, &index_path, 64 * 1024 * 1024).unwrap();
            volume.write(&Needle::new(1, 0, b"x".to_vec())).unwrap();
        }

        let volume = Volume::attach(7, &block_path, &index_path, 64 * 1024 * 1024).unwrap();
        assert!(matches!(
            volume.compact().unwrap_err(),
            VolumeError::NotWritable(VolumeState::ReadOnly)
        ));
    }

    #[test]
    fn test_corrupt_record_dropped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let volume = new_volume(&dir);

        volume.write(&Needle::new(1, 0, b"good one".to_vec())).unwrap();
        let bad_offset = volume.write(&Needle::new(2, 0, b"bad one!".to_vec())).unwrap();
        volume.write(&Needle::new(3, 0, b"good two".to_vec())).unwrap();

        // Flip a payload byte of key 2: checksum fails but the header (and
        // so the record boundary) stays intact.
        {
            let block = volume.block.read().unwrap();
            block
                .file
                .write_all_at(&[0xff], bad_offset + crate::needle::HEADER_SIZE as u64)
                .unwrap();
        }

        volume.compact().unwrap();

        assert_eq!(volume.read(1).unwrap().data, b"good one");
        assert_eq!(volume.read(3).unwrap().data, b"good two");
        assert!(matches!(
            volume.read(2).unwrap_err(),
            VolumeError::NeedleNotExist(2)
        ));
    }

    #[test]
    fn test_salvage_past_undecodable_record() {
        let dir = TempDir::new().unwrap();
        let volume = new_volume(&dir);

        volume.write(&Needle::new(1, 0, b"before".to_vec())).unwrap();
        let bad_offset = volume.write(&Needle::new(2, 0, b"header dies".to_vec())).unwrap();
        volume.write(&Needle::new(3, 0, b"after".to_vec())).unwrap();

        // Destroy the header magic of key 2: the sequential scan cannot
        // continue, but key 3 is still reachable through the index.
        {
            let block = volume.block.read().unwrap();
            block.file.write_all_at(&[0u8; 4], bad_offset).unwrap();
        }

        volume.compact().unwrap();

        assert_eq!(volume.read(1).unwrap().data, b"before");
        assert_eq!(volume.read(3).unwrap().data, b"after");
        assert!(volume.read(2).is_err());
    }
}
