//! Store error types.

use thiserror::Error;

use crate::volume::VolumeError;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by the volume registry and provisioning paths.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("volume {0} does not exist")]
    VolumeNotExist(u32),

    #[error("volume {0} already exists")]
    VolumeExists(u32),

    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
