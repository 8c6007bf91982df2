//! Container and index file superblocks.
//!
//! Both files open with a fixed 8-byte header: 4 magic bytes, a format
//! version, and 3 reserved bytes. The header is written once at creation
//! and validated on every open; a mismatch means the file is not ours (or
//! not this format version) and the volume refuses to attach.

use std::fs::File;
use std::io::Write;
use std::os::unix::fs::FileExt;

use super::errors::{VolumeError, VolumeResult};

/// Magic bytes for a container (block) file.
pub const BLOCK_MAGIC: [u8; 4] = *b"VBLK";
/// Magic bytes for an index file.
pub const INDEX_MAGIC: [u8; 4] = *b"VIDX";
/// Current on-disk format version.
pub const VERSION: u8 = 1;
/// Superblock length; the first record starts at this offset.
pub const SUPERBLOCK_SIZE: u64 = 8;

/// Write a superblock with the given magic at the start of a new file.
pub fn write_superblock(file: &mut File, magic: [u8; 4]) -> std::io::Result<()> {
    let mut header = [0u8; SUPERBLOCK_SIZE as usize];
    header[..4].copy_from_slice(&magic);
    header[4] = VERSION;
    file.write_all(&header)?;
    file.sync_all()
}

/// Validate the superblock of an existing file.
pub fn validate_superblock(file: &File, magic: [u8; 4]) -> VolumeResult<()> {
    let mut header = [0u8; SUPERBLOCK_SIZE as usize];
    file.read_exact_at(&mut header, 0)
        .map_err(|_| VolumeError::InvalidSuperblock {
            reason: "file shorter than superblock".to_string(),
        })?;

    if header[..4] != magic {
        return Err(VolumeError::InvalidSuperblock {
            reason: format!(
                "bad magic {:02x?}, expected {:02x?}",
                &header[..4],
                magic
            ),
        });
    }
    if header[4] != VERSION {
        return Err(VolumeError::InvalidSuperblock {
            reason: format!("unsupported version {}, expected {}", header[4], VERSION),
        });
    }
    Ok(())
}
