//! One append-only container file plus its index.
//!
//! A volume owns the sequential write offset, applies writes and deletes,
//! and serves point reads. The in-memory index is the single source of
//! truth for liveness: the container is never scanned on the read path,
//! and an index entry for a key is only published after its bytes are
//! durably appended.
//!
//! Concurrency: reads take shared locks and use positional I/O, so they
//! run concurrently with each other and with the single in-flight writer.
//! Writes and deletes serialize on the writer mutex, which also owns the
//! volume state and the staging log used while a compaction is running.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::needle::{Flag, Needle, NeedleError, HEADER_SIZE};
use crate::observability::Logger;

use super::errors::{VolumeError, VolumeResult};
use super::index::{self, IndexEntry, MemIndex};
use super::superblock::{
    validate_superblock, write_superblock, BLOCK_MAGIC, INDEX_MAGIC, SUPERBLOCK_SIZE,
};

/// Lifecycle state of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeState {
    /// Accepting writes and deletes.
    Writable,
    /// Restored/bulk-attached; serves reads only.
    ReadOnly,
    /// A compaction is replaying the container; writes are staged.
    Compacting,
}

/// The container file and its path, swapped as a unit by compaction.
pub(crate) struct BlockFile {
    pub(crate) file: File,
    pub(crate) path: PathBuf,
}

/// An operation accepted while a compaction is in flight, applied to the
/// new container once the replay completes.
pub(crate) enum StagedOp {
    Write(Needle),
    Delete(u64),
}

/// Writer-side state: one lock covers the append offset, the index mirror
/// handle, the volume state and the staging log, so a state transition can
/// never race a write.
pub(crate) struct VolumeWriter {
    pub(crate) state: VolumeState,
    pub(crate) write_offset: u64,
    pub(crate) index_file: File,
    pub(crate) index_path: PathBuf,
    pub(crate) staged: Vec<StagedOp>,
}

/// One append-only container file plus its index.
pub struct Volume {
    id: u32,
    capacity: u64,
    pub(crate) block: RwLock<BlockFile>,
    pub(crate) index: RwLock<MemIndex>,
    pub(crate) writer: Mutex<VolumeWriter>,
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// Create an empty container + index file pair with superblocks written.
///
/// Fails if either file already exists; provisioning never clobbers data.
pub(crate) fn init_volume_files(block_path: &Path, index_path: &Path) -> VolumeResult<()> {
    let mut block = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .open(block_path)?;
    write_superblock(&mut block, BLOCK_MAGIC)?;

    let mut index_file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .append(true)
        .open(index_path)?;
    write_superblock(&mut index_file, INDEX_MAGIC)?;
    Ok(())
}

fn open_block(path: &Path) -> VolumeResult<File> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    validate_superblock(&file, BLOCK_MAGIC)?;
    Ok(file)
}

fn open_index(path: &Path) -> VolumeResult<File> {
    let file = OpenOptions::new().read(true).append(true).open(path)?;
    validate_superblock(&file, INDEX_MAGIC)?;
    Ok(file)
}

impl Volume {
    /// Create a brand-new empty, writable volume.
    pub fn create(
        id: u32,
        block_path: &Path,
        index_path: &Path,
        capacity: u64,
    ) -> VolumeResult<Self> {
        init_volume_files(block_path, index_path)?;
        Self::open(id, block_path, index_path, capacity)
    }

    /// Open an existing container + index pair as a writable volume.
    ///
    /// The index mirror is loaded first, then the container tail past the
    /// last mirrored record is replayed to pick up anything the mirror
    /// missed; replay stops at the first undecodable record. If the mirror
    /// is empty this degenerates into the full rebuild scan.
    pub fn open(
        id: u32,
        block_path: &Path,
        index_path: &Path,
        capacity: u64,
    ) -> VolumeResult<Self> {
        let block = open_block(block_path)?;
        let mut index_file = open_index(index_path)?;

        let (mut mem, scan_start) = index::load(&index_file)?;
        let block_len = block.metadata()?.len();

        // Catch-up replay of the container tail, healing the mirror as we
        // go. Encountering a tombstone flips the entry's flag; the offset
        // keeps pointing at the last live record.
        let mut scanner = RecordScanner::new(block.try_clone()?, scan_start, block_len)?;
        loop {
            match scanner.next_record() {
                Ok(Some((offset, needle))) => {
                    let entry = apply_record(&mut mem, offset, needle);
                    index::append_entry(&mut index_file, needle.key, &entry)?;
                }
                Ok(None) => break,
                Err(err) => {
                    Logger::warn(
                        "VOLUME_SCAN_STOPPED",
                        &[
                            ("volume", &id.to_string()),
                            ("offset", &scanner.offset().to_string()),
                            ("reason", &err.to_string()),
                        ],
                    );
                    break;
                }
            }
        }
        let write_offset = scanner.good_end();

        Ok(Self {
            id,
            capacity,
            block: RwLock::new(BlockFile {
                file: block,
                path: block_path.to_path_buf(),
            }),
            index: RwLock::new(mem),
            writer: Mutex::new(VolumeWriter {
                state: VolumeState::Writable,
                write_offset,
                index_file,
                index_path: index_path.to_path_buf(),
                staged: Vec::new(),
            }),
        })
    }

    /// Attach an externally supplied container + index pair read-only.
    ///
    /// The index is loaded straight from the mirror file without rescanning
    /// the container; this is the warm-restore fast path.
    pub fn attach(
        id: u32,
        block_path: &Path,
        index_path: &Path,
        capacity: u64,
    ) -> VolumeResult<Self> {
        let block = open_block(block_path)?;
        let index_file = open_index(index_path)?;

        let (mem, _) = index::load(&index_file)?;
        let write_offset = block.metadata()?.len();

        Ok(Self {
            id,
            capacity,
            block: RwLock::new(BlockFile {
                file: block,
                path: block_path.to_path_buf(),
            }),
            index: RwLock::new(mem),
            writer: Mutex::new(VolumeWriter {
                state: VolumeState::ReadOnly,
                write_offset,
                index_file,
                index_path: index_path.to_path_buf(),
                staged: Vec::new(),
            }),
        })
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn state(&self) -> VolumeState {
        self.writer.lock().expect("volume writer lock poisoned").state
    }

    /// Next append position; also the container's used length.
    pub fn write_offset(&self) -> u64 {
        self.writer
            .lock()
            .expect("volume writer lock poisoned")
            .write_offset
    }

    pub fn block_path(&self) -> PathBuf {
        self.block.read().expect("block lock poisoned").path.clone()
    }

    pub fn index_path(&self) -> PathBuf {
        self.writer
            .lock()
            .expect("volume writer lock poisoned")
            .index_path
            .clone()
    }

    /// Number of live (non-deleted) keys.
    pub fn live_count(&self) -> usize {
        self.index
            .read()
            .expect("index lock poisoned")
            .values()
            .filter(|e| e.flag == Flag::Normal)
            .count()
    }

    /// Append a needle and publish it in the index.
    ///
    /// Returns the container offset of the record. While a compaction is
    /// running the write is staged instead and the returned value is its
    /// position in the staging log; callers do not rely on the offset.
    pub fn write(&self, needle: &Needle) -> VolumeResult<u64> {
        let mut writer = self.writer.lock().expect("volume writer lock poisoned");
        match writer.state {
            VolumeState::ReadOnly => return Err(VolumeError::NotWritable(writer.state)),
            VolumeState::Compacting => {
                writer.staged.push(StagedOp::Write(needle.clone()));
                return Ok(writer.staged.len() as u64 - 1);
            }
            VolumeState::Writable => {}
        }

        let buf = needle.encode();
        let offset = writer.write_offset;
        if offset + buf.len() as u64 > self.capacity {
            return Err(VolumeError::VolumeFull {
                offset,
                record_len: buf.len() as u64,
                capacity: self.capacity,
            });
        }

        let entry = IndexEntry {
            offset,
            size: needle.size(),
            flag: Flag::Normal,
        };
        {
            let block = self.block.read().expect("block lock poisoned");
            block.file.write_all_at(&buf, offset)?;
            block.file.sync_all()?;
        }
        index::append_entry(&mut writer.index_file, needle.key, &entry)?;

        // Publish only after the bytes are durable.
        self.index
            .write()
            .expect("index lock poisoned")
            .insert(needle.key, entry);
        writer.write_offset = offset + buf.len() as u64;
        Ok(offset)
    }

    /// Read the needle for `key` into a caller-provided record.
    pub fn read_into(&self, key: u64, needle: &mut Needle) -> VolumeResult<()> {
        // Hold the index lock across the block read so a compaction swap
        // can never pair the old index with the new container.
        let index = self.index.read().expect("index lock poisoned");
        let entry = match index.get(&key) {
            None => return Err(VolumeError::NeedleNotExist(key)),
            Some(entry) if entry.flag == Flag::Deleted => {
                return Err(VolumeError::NeedleDeleted(key))
            }
            Some(entry) => *entry,
        };

        let frame_len = Needle::encoded_len(entry.size);
        let mut buf = vec![0u8; frame_len];
        {
            let block = self.block.read().expect("block lock poisoned");
            block.file.read_exact_at(&mut buf, entry.offset)?;
        }
        needle.decode_into(&buf)?;
        debug_assert_eq!(needle.key, key);
        Ok(())
    }

    /// Read the needle for `key` into a fresh record.
    pub fn read(&self, key: u64) -> VolumeResult<Needle> {
        let mut needle = Needle::default();
        self.read_into(key, &mut needle)?;
        Ok(needle)
    }

    /// Existence/metadata check; same contract as [`read_into`].
    ///
    /// Returns the full decoded needle so the caller may use or discard
    /// the payload; the index holds no lighter metadata worth a separate
    /// path.
    ///
    /// [`read_into`]: Volume::read_into
    pub fn probe(&self, key: u64, needle: &mut Needle) -> VolumeResult<()> {
        self.read_into(key, needle)
    }

    /// Append a tombstone for `key` and mark its index entry deleted.
    ///
    /// Deleting a key that was never written fails with `NeedleNotExist`;
    /// deleting an already-deleted key fails with `NeedleDeleted`.
    pub fn delete(&self, key: u64) -> VolumeResult<()> {
        let mut writer = self.writer.lock().expect("volume writer lock poisoned");
        match writer.state {
            VolumeState::ReadOnly => return Err(VolumeError::NotWritable(writer.state)),
            VolumeState::Compacting => {
                self.check_deletable_staged(&writer, key)?;
                writer.staged.push(StagedOp::Delete(key));
                return Ok(());
            }
            VolumeState::Writable => {}
        }

        let entry = {
            let index = self.index.read().expect("index lock poisoned");
            match index.get(&key) {
                None => return Err(VolumeError::NeedleNotExist(key)),
                Some(entry) if entry.flag == Flag::Deleted => {
                    return Err(VolumeError::NeedleDeleted(key))
                }
                Some(entry) => *entry,
            }
        };

        let buf = Needle::tombstone(key).encode();
        let offset = writer.write_offset;
        if offset + buf.len() as u64 > self.capacity {
            return Err(VolumeError::VolumeFull {
                offset,
                record_len: buf.len() as u64,
                capacity: self.capacity,
            });
        }

        // The entry keeps the live record's offset; only the flag flips.
        let dead = IndexEntry {
            flag: Flag::Deleted,
            ..entry
        };
        {
            let block = self.block.read().expect("block lock poisoned");
            block.file.write_all_at(&buf, offset)?;
            block.file.sync_all()?;
        }
        index::append_entry(&mut writer.index_file, key, &dead)?;

        self.index
            .write()
            .expect("index lock poisoned")
            .insert(key, dead);
        writer.write_offset = offset + buf.len() as u64;
        Ok(())
    }

    /// Reclaim space from deleted and superseded records; see
    /// [`compact`](super::compact).
    pub fn compact(&self) -> VolumeResult<()> {
        super::compact::run(self)
    }

    /// Liveness check for a delete accepted during compaction: the staging
    /// log overrides the (frozen-for-writes) index.
    fn check_deletable_staged(&self, writer: &VolumeWriter, key: u64) -> VolumeResult<()> {
        for op in writer.staged.iter().rev() {
            match op {
                StagedOp::Write(n) if n.key == key => return Ok(()),
                StagedOp::Delete(k) if *k == key => {
                    return Err(VolumeError::NeedleDeleted(key))
                }
                _ => {}
            }
        }
        let index = self.index.read().expect("index lock poisoned");
        match index.get(&key) {
            None => Err(VolumeError::NeedleNotExist(key)),
            Some(entry) if entry.flag == Flag::Deleted => Err(VolumeError::NeedleDeleted(key)),
            Some(_) => Ok(()),
        }
    }
}

/// Fold one scanned record into the in-memory index, last write wins.
pub(crate) fn apply_record(mem: &mut MemIndex, offset: u64, needle: &Needle) -> IndexEntry {
    let entry = match needle.flag {
        Flag::Normal => IndexEntry {
            offset,
            size: needle.size(),
            flag: Flag::Normal,
        },
        // A tombstone marks the key dead but keeps pointing at the last
        // live record, if any.
        Flag::Deleted => match mem.get(&needle.key) {
            Some(prev) => IndexEntry {
                flag: Flag::Deleted,
                ..*prev
            },
            None => IndexEntry {
                offset,
                size: 0,
                flag: Flag::Deleted,
            },
        },
    };
    mem.insert(needle.key, entry);
    entry
}

/// Sequential record reader over a byte range of a container file.
///
/// Decodes record after record; a body-level corruption (checksum or
/// footer) advances past the frame so the caller may continue, while a
/// header-level failure leaves the scanner stuck at the bad offset since
/// no later record boundary can be computed.
pub(crate) struct RecordScanner {
    reader: BufReader<File>,
    offset: u64,
    good_end: u64,
    end: u64,
    frame: Vec<u8>,
    needle: Needle,
}

impl RecordScanner {
    pub(crate) fn new(file: File, start: u64, end: u64) -> std::io::Result<Self> {
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(start))?;
        Ok(Self {
            reader,
            offset: start,
            good_end: start,
            end,
            frame: Vec::new(),
            needle: Needle::default(),
        })
    }

    /// Current scan position.
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// End of the cleanly decoded prefix.
    pub(crate) fn good_end(&self) -> u64 {
        self.good_end
    }

    /// Decode the next record; `Ok(None)` on reaching the range end.
    pub(crate) fn next_record(&mut self) -> VolumeResult<Option<(u64, &Needle)>> {
        if self.offset >= self.end {
            return Ok(None);
        }

        let mut header = [0u8; HEADER_SIZE];
        let got = fill(&mut self.reader, &mut header)?;
        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_SIZE {
            return Err(NeedleError::Truncated {
                need: HEADER_SIZE,
                have: got,
            }
            .into());
        }

        let frame_len = Needle::frame_len(&header)?;
        if self.offset + frame_len as u64 > self.end {
            return Err(NeedleError::Truncated {
                need: frame_len,
                have: (self.end - self.offset) as usize,
            }
            .into());
        }

        self.frame.clear();
        self.frame.extend_from_slice(&header);
        self.frame.resize(frame_len, 0);
        self.reader.read_exact(&mut self.frame[HEADER_SIZE..])?;

        let offset = self.offset;
        self.offset += frame_len as u64;
        match self.needle.decode_into(&self.frame) {
            Ok(_) => {
                self.good_end = self.offset;
                Ok(Some((offset, &self.needle)))
            }
            Err(err) => Err(err.into()),
        }
    }
}

/// Read up to `buf.len()` bytes, returning how many were available.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
