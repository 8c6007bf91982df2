//! Observability: structured logging for the storage node.
//!
//! Logging is synchronous and side-effect free; background operations
//! (compaction, bulk restore) report progress and failure exclusively
//! through these events.

mod logger;

pub use logger::{Logger, Severity};
