//! Admin HTTP layer.

mod routes;
mod server;

pub use routes::{admin_routes, AdminState};
pub use server::AdminServer;
