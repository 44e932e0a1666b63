//! Shared application state for the burrow server

use std::sync::Arc;

use burrow_core::TunnelRegistry;
use chrono::{DateTime, Utc};

/// Shared application state accessible by all handlers
#[derive(Clone)]
pub struct AppState {
    /// Table of supervised tunnels
    pub registry: Arc<TunnelRegistry>,
    /// When the server started
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: Arc<TunnelRegistry>) -> Self {
        Self {
            registry,
            started_at: Utc::now(),
        }
    }

    /// Returns how long the server has been running
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_core::{NullSink, ProviderRegistry, SupervisorConfig};

    #[tokio::test]
    async fn new_state_has_empty_registry() {
        let registry = TunnelRegistry::new(
            ProviderRegistry::new(),
            SupervisorConfig::default(),
            Arc::new(NullSink),
        );
        let state = AppState::new(Arc::new(registry));
        assert!(state.uptime_seconds() >= 0);
        assert_eq!(state.registry.count().await, 0);
    }
}
