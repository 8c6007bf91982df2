//! Needle codec and record pool.
//!
//! A needle is one stored object: key, cookie, liveness flag, payload and
//! checksum, serialized into the fixed binary layout documented in
//! [`record`]. The pool hands out reusable record buffers so the request
//! path does not allocate per operation.

mod checksum;
mod errors;
mod pool;
mod record;

pub use checksum::{compute_checksum, compute_checksum_parts};
pub use errors::{NeedleError, NeedleResult};
pub use pool::{NeedlePool, PooledNeedle};
pub use record::{Flag, Needle, FOOTER_SIZE, HEADER_SIZE, MAX_DATA_SIZE, PADDING_ALIGN};
