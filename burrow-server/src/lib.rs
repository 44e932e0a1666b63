//! burrow-server - HTTP API for burrow supervised tunnels
//!
//! The server owns the [`TunnelRegistry`] for the lifetime of the process and
//! drains it on shutdown, so no provider session outlives the daemon.

mod error;
pub mod http;
mod state;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use burrow_core::TunnelRegistry;
use tokio::net::TcpListener;

pub use error::{ApiError, ErrorResponse, ServerError, ValidationResponse};
pub use http::create_router;
pub use state::AppState;

/// The burrow API server
pub struct BurrowServer {
    config: ServerConfig,
    state: Arc<AppState>,
}

impl BurrowServer {
    pub fn new(config: ServerConfig, registry: Arc<TunnelRegistry>) -> Self {
        Self::with_state(config, Arc::new(AppState::new(registry)))
    }

    /// Create a server with custom state (for testing)
    pub fn with_state(config: ServerConfig, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Bind the configured address and serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.clone(),
                source: e,
            })?;

        self.run_with_listener(listener, shutdown).await
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// Every registered tunnel is stopped before this returns.
    pub async fn run_with_listener<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local = listener
            .local_addr()
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        tracing::info!("burrow server listening on {}", local);

        let router = create_router(Arc::clone(&self.state));
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()));

        let report = self
            .state
            .registry
            .shutdown(self.config.shutdown_grace)
            .await;
        if !report.forced.is_empty() {
            tracing::warn!(
                "{} tunnel(s) did not stop cleanly: {}",
                report.forced.len(),
                report.forced.join(", ")
            );
        }
        tracing::info!("burrow server stopped");

        served
    }
}

/// Server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// How long each tunnel gets to stop on shutdown
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7843,
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Create a new ServerConfig with the specified host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Returns the socket address string (e.g., "127.0.0.1:7843")
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 7843);
        assert_eq!(config.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn server_config_addr() {
        let config = ServerConfig::new("0.0.0.0", 8080);
        assert_eq!(config.addr(), "0.0.0.0:8080");
    }
}
