//! Admin HTTP server
//!
//! Binds the admin endpoint and serves the admin routes against a
//! running store.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use crate::config::AdminConfig;
use crate::observability::Logger;
use crate::store::Store;

use super::routes::{admin_routes, AdminState};

/// Admin HTTP server for a store node.
pub struct AdminServer {
    config: AdminConfig,
    router: Router,
}

impl AdminServer {
    pub fn new(config: AdminConfig, store: Arc<Store>) -> Self {
        let state = Arc::new(AdminState { store });
        let router = admin_routes(state);
        Self { config, router }
    }

    /// Get the socket address
    pub fn socket_addr(&self) -> String {
        self.config.socket_addr()
    }

    /// Get the router (for testing)
    pub fn router(self) -> Router {
        self.router
    }

    /// Bind and serve until the process exits.
    pub async fn start(self) -> Result<(), std::io::Error> {
        let addr: SocketAddr = self.config.socket_addr().parse().map_err(|err| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid admin address {}: {}", self.config.socket_addr(), err),
            )
        })?;

        let listener = TcpListener::bind(addr).await?;
        Logger::info("ADMIN_LISTENING", &[("addr", &addr.to_string())]);
        axum::serve(listener, self.router).await?;

        Ok(())
    }
}
