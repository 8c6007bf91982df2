//! Volumes: append-only needle containers with an in-memory index.
//!
//! A volume is the unit of storage, compaction and provisioning. The
//! container file holds needle records back to back behind a validated
//! superblock; the index maps each key to its latest record.

mod compact;
mod errors;
pub(crate) mod index;
pub(crate) mod superblock;
mod volume;

pub use errors::{VolumeError, VolumeResult};
pub use index::IndexEntry;
pub use superblock::SUPERBLOCK_SIZE;
pub(crate) use volume::init_volume_files;
pub use volume::{Volume, VolumeState};
