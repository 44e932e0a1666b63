//! Error types for burrow-core

use std::time::Duration;

use thiserror::Error;

use crate::tunnel::config::ValidationErrors;
use crate::tunnel::state::TunnelState;

/// Top-level error type for tunnel operations
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Invalid tunnel configuration: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Unknown tunnel provider: {0}")]
    UnknownProvider(String),

    #[error("Tunnel not found: {0}")]
    NotFound(String),

    #[error("Stale state: expected {expected}, found {actual}")]
    StaleState {
        expected: String,
        actual: TunnelState,
    },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: TunnelState, to: TunnelState },

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Supervisor for tunnel {0} is no longer running")]
    Closed(String),
}

/// Errors raised by provider plugins
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Failed to launch provider session: {0}")]
    Launch(String),

    #[error("Provider session did not shut down: {0}")]
    Shutdown(String),

    #[error("Provider status check failed: {0}")]
    Status(String),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::config::ValidationError;

    #[test]
    fn stale_state_displays_both_states() {
        let error = TunnelError::StaleState {
            expected: "stopped or error".to_string(),
            actual: TunnelState::Running,
        };
        let msg = error.to_string();
        assert!(msg.contains("stopped or error"));
        assert!(msg.contains("running"));
    }

    #[test]
    fn provider_timeout_displays_duration() {
        let error = ProviderError::Timeout(Duration::from_secs(10));
        assert!(error.to_string().contains("10s"));
    }

    #[test]
    fn tunnel_error_converts_from_provider_error() {
        let error: TunnelError = ProviderError::Launch("binary missing".to_string()).into();
        assert!(matches!(error, TunnelError::Provider(ProviderError::Launch(_))));
        assert!(error.to_string().contains("binary missing"));
    }

    #[test]
    fn tunnel_error_converts_from_validation_errors() {
        let errors = ValidationErrors::from(vec![ValidationError::new(
            "auth_token",
            "must not be empty",
        )]);
        let error: TunnelError = errors.into();
        assert!(matches!(error, TunnelError::Validation(_)));
        assert!(error.to_string().contains("auth_token"));
    }
}
