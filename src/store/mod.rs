//! Volume registry and provisioning.

mod errors;
mod free_pool;
mod store;

pub use errors::{StoreError, StoreResult};
pub use store::Store;
