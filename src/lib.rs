//! volstore - an append-only needle/volume blob storage node
//!
//! Fixed-framed records (needles) in large append-only container files
//! (volumes), with an in-memory key index, compaction to reclaim space
//! and an HTTP admin endpoint.

pub mod admin;
pub mod cli;
pub mod config;
pub mod needle;
pub mod observability;
pub mod store;
pub mod volume;

pub use config::{AdminConfig, StoreConfig};
pub use needle::{Flag, Needle};
pub use store::{Store, StoreError, StoreResult};
pub use volume::{Volume, VolumeError, VolumeResult, VolumeState};
