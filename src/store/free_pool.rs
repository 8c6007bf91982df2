//! Pre-created free volumes.
//!
//! A free volume is an empty, writable container + index file pair that
//! has not yet been assigned a volume id. Keeping a pool of them makes
//! "add a new volume" a pair of renames instead of file creation in the
//! request path.
//!
//! Free files are named `free_block_<seq>` / `free_block_<seq>.idx`; on
//! assignment they are renamed to `block_<vid>` / `block_<vid>.idx` within
//! their directories.

use std::fs;
use std::path::{Path, PathBuf};

use crate::volume::VolumeResult;

/// An unassigned, pre-created container + index file pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FreeVolume {
    pub block_path: PathBuf,
    pub index_path: PathBuf,
}

/// File name of an unassigned container.
pub fn free_block_name(seq: u64) -> String {
    format!("free_block_{}", seq)
}

/// File name of an assigned container.
pub fn block_name(id: u32) -> String {
    format!("block_{}", id)
}

/// Create one free volume: both files with superblocks written.
pub fn create_free_volume(block_dir: &Path, index_dir: &Path, seq: u64) -> VolumeResult<FreeVolume> {
    let name = free_block_name(seq);
    let block_path = block_dir.join(&name);
    let index_path = index_dir.join(format!("{}.idx", name));
    crate::volume::init_volume_files(&block_path, &index_path)?;
    Ok(FreeVolume {
        block_path,
        index_path,
    })
}

/// Rename a free volume's files for assignment to `id`, in place within
/// their directories. Returns the new paths.
pub fn assign(free: &FreeVolume, id: u32) -> std::io::Result<(PathBuf, PathBuf)> {
    let block_path = sibling(&free.block_path, block_name(id));
    let index_path = sibling(&free.index_path, format!("{}.idx", block_name(id)));
    fs::rename(&free.block_path, &block_path)?;
    fs::rename(&free.index_path, &index_path)?;
    Ok((block_path, index_path))
}

fn sibling(path: &Path, name: String) -> PathBuf {
    match path.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Rediscover free volumes left on disk by a previous process.
///
/// Scans `block_dir` for `free_block_*` files and pairs each with its
/// index file in `index_dir`; unpaired leftovers are skipped.
pub fn scan_free_volumes(block_dir: &Path, index_dir: &Path) -> std::io::Result<Vec<FreeVolume>> {
    let mut found = Vec::new();
    if !block_dir.is_dir() {
        return Ok(found);
    }
    for entry in fs::read_dir(block_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !name.starts_with("free_block_") || name.ends_with(".idx") {
            continue;
        }
        let index_path = index_dir.join(format!("{}.idx", name));
        if index_path.is_file() {
            found.push(FreeVolume {
                block_path: entry.path(),
                index_path,
            });
        }
    }
    // Deterministic assignment order across restarts.
    found.sort();
    Ok(found)
}
