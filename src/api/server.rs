//! API Server
//!
//! Runs the REST server over the orchestrator with graceful shutdown.

use crate::core::Orchestrator;
use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

use super::rest::RestRouter;

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// REST API bind address
    pub rest_addr: SocketAddr,
    /// Request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            rest_addr: "0.0.0.0:8000".parse().expect("static address"),
            request_timeout_secs: 30,
        }
    }
}

// =============================================================================
// API Server
// =============================================================================

/// REST API server
pub struct ApiServer {
    config: ApiServerConfig,
    orchestrator: Arc<Orchestrator>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, orchestrator: Arc<Orchestrator>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            orchestrator,
            shutdown_tx,
        }
    }

    /// Run until shutdown is triggered or the listener fails.
    pub async fn run(&self) -> Result<()> {
        let app = RestRouter::new(self.orchestrator.clone()).build();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        info!("REST API listening on {}", self.config.rest_addr);
        let listener = tokio::net::TcpListener::bind(self.config.rest_addr)
            .await
            .map_err(|e| Error::Unrecoverable(format!("failed to bind REST server: {}", e)))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("REST server shutting down");
            })
            .await
            .map_err(|e| Error::Unrecoverable(format!("REST server error: {}", e)))?;
        Ok(())
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
