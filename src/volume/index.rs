//! In-memory needle index with an on-disk mirror.
//!
//! The index maps a needle key to its location and liveness inside one
//! container file. It is the single source of truth for the read path: a
//! key absent here is absent from the volume.
//!
//! The mirror file holds the same information as fixed 21-byte entries
//! (key u64, offset u64, size u32, flag u8, all LE) appended on every
//! write and delete. Loading applies entries in file order, last write
//! wins; a truncated trailing entry is ignored so a crash mid-append
//! cannot poison the load. The mirror may lag the container (it is not
//! fsynced per entry); the volume catches up by scanning the container
//! tail after loading it.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom, Write};

use crate::needle::Flag;

use super::superblock::SUPERBLOCK_SIZE;

/// Mirror entry length: key (8) + offset (8) + size (4) + flag (1).
pub const ENTRY_SIZE: usize = 21;

/// Location and liveness of one needle within the container file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Container offset of the most recent live record for the key. Kept
    /// in place when the key is deleted; liveness is carried by `flag`.
    pub offset: u64,
    /// Payload size of that record.
    pub size: u32,
    /// Liveness of the key.
    pub flag: Flag,
}

/// The in-memory mapping.
pub type MemIndex = HashMap<u64, IndexEntry>;

/// Serialize one mirror entry.
pub fn encode_entry(key: u64, entry: &IndexEntry) -> [u8; ENTRY_SIZE] {
    let mut buf = [0u8; ENTRY_SIZE];
    buf[..8].copy_from_slice(&key.to_le_bytes());
    buf[8..16].copy_from_slice(&entry.offset.to_le_bytes());
    buf[16..20].copy_from_slice(&entry.size.to_le_bytes());
    buf[20] = entry.flag.as_byte();
    buf
}

/// Append one entry to the mirror file.
pub fn append_entry(file: &mut File, key: u64, entry: &IndexEntry) -> std::io::Result<()> {
    file.write_all(&encode_entry(key, entry))
}

/// Load the mirror file into a fresh in-memory index.
///
/// Returns the index and the highest container end-offset any entry
/// refers to; the caller resumes its container scan from there. Entries
/// with an unknown flag byte and a truncated trailing entry are skipped.
pub fn load(file: &File) -> std::io::Result<(MemIndex, u64)> {
    let mut index = MemIndex::new();
    let mut max_end = SUPERBLOCK_SIZE;

    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(SUPERBLOCK_SIZE))?;

    let mut buf = [0u8; ENTRY_SIZE];
    loop {
        if !read_exact_or_eof(&mut reader, &mut buf)? {
            break;
        }

        let key = u64::from_le_bytes(buf[..8].try_into().unwrap());
        let offset = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let size = u32::from_le_bytes(buf[16..20].try_into().unwrap());
        let flag = match Flag::from_byte(buf[20]) {
            Ok(flag) => flag,
            Err(_) => continue,
        };

        let end = offset + crate::needle::Needle::encoded_len(size) as u64;
        if end > max_end {
            max_end = end;
        }
        index.insert(key, IndexEntry { offset, size, flag });
    }

    Ok((index, max_end))
}

/// Read a full entry, or return false on a clean or mid-entry EOF.
fn read_exact_or_eof<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => return Ok(false),
            n => filled += n,
        }
    }
    Ok(true)
}
