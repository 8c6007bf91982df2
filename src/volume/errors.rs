//! Volume error types.

use thiserror::Error;

use crate::needle::NeedleError;
use crate::volume::VolumeState;

/// Result type for volume operations
pub type VolumeResult<T> = Result<T, VolumeError>;

/// Errors surfaced by volume reads, writes, deletes and compaction.
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("needle {0} does not exist")]
    NeedleNotExist(u64),

    #[error("needle {0} is deleted")]
    NeedleDeleted(u64),

    #[error("volume full: offset {offset} + record {record_len} exceeds capacity {capacity}")]
    VolumeFull {
        offset: u64,
        record_len: u64,
        capacity: u64,
    },

    #[error("volume not writable (state: {0:?})")]
    NotWritable(VolumeState),

    #[error("compaction already running")]
    CompactionRunning,

    #[error("invalid superblock: {reason}")]
    InvalidSuperblock { reason: String },

    #[error(transparent)]
    Needle(#[from] NeedleError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
