//! Tunnel lifecycle states and provider status

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a supervised tunnel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelState {
    /// Not running; initial state of every instance
    #[default]
    Stopped,
    /// Provider launch initiated, waiting for confirmation
    Starting,
    /// Provider confirmed the tunnel is up
    Running,
    /// Provider shutdown in progress
    Stopping,
    /// Failed; waits for a retry or an explicit start
    Error,
}

impl TunnelState {
    pub const ALL: [TunnelState; 5] = [
        Self::Stopped,
        Self::Starting,
        Self::Running,
        Self::Stopping,
        Self::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: TunnelState) -> bool {
        use TunnelState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Error)
                | (Error, Starting)
                | (Running, Error)
                | (Running | Starting | Error, Stopping)
                | (Stopping, Stopped)
                | (Stopping, Error)
        )
    }

    /// Whether a cached provider status agrees with this state
    ///
    /// Transient states keep whatever was last observed.
    pub fn admits(&self, status: ProviderStatus) -> bool {
        match self {
            Self::Stopped => status == ProviderStatus::Stopped,
            Self::Running => status == ProviderStatus::Running,
            Self::Error => status == ProviderStatus::Error,
            Self::Starting | Self::Stopping => true,
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Starting | Self::Stopping)
    }
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session status as reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    #[default]
    Stopped,
    Running,
    Error,
}

/// Point-in-time status read from a provider
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub status: ProviderStatus,
    /// Process id of the provider session, 0 if not process-backed
    pub pid: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Public URL announced by the provider, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
}

impl RuntimeStatus {
    pub fn stopped() -> Self {
        Self::default()
    }

    pub fn running(pid: u32) -> Self {
        Self {
            status: ProviderStatus::Running,
            pid,
            ..Self::default()
        }
    }

    pub fn error(pid: u32, message: impl Into<String>) -> Self {
        Self {
            status: ProviderStatus::Error,
            pid,
            error: Some(message.into()),
            public_url: None,
        }
    }

    pub fn with_public_url(mut self, url: impl Into<String>) -> Self {
        self.public_url = Some(url.into());
        self
    }

    pub fn is_running(&self) -> bool {
        self.status == ProviderStatus::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tunnel_state_default_is_stopped() {
        assert_eq!(TunnelState::default(), TunnelState::Stopped);
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        use TunnelState::*;
        let allowed = [
            (Stopped, Starting),
            (Starting, Running),
            (Starting, Error),
            (Error, Starting),
            (Running, Error),
            (Running, Stopping),
            (Starting, Stopping),
            (Error, Stopping),
            (Stopping, Stopped),
            (Stopping, Error),
        ];
        for from in TunnelState::ALL {
            for to in TunnelState::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn stopped_never_admits_running_status() {
        assert!(!TunnelState::Stopped.admits(ProviderStatus::Running));
        assert!(TunnelState::Running.admits(ProviderStatus::Running));
        assert!(TunnelState::Starting.admits(ProviderStatus::Error));
    }

    #[test]
    fn tunnel_state_serializes_snake_case() {
        let json = serde_json::to_string(&TunnelState::Running).unwrap();
        assert_eq!(json, "\"running\"");
    }

    #[test]
    fn runtime_status_error_carries_message() {
        let status = RuntimeStatus::error(42, "auth rejected");
        assert_eq!(status.status, ProviderStatus::Error);
        assert_eq!(status.pid, 42);
        assert_eq!(status.error.as_deref(), Some("auth rejected"));
    }

    #[test]
    fn runtime_status_omits_empty_fields() {
        let json = serde_json::to_string(&RuntimeStatus::running(7)).unwrap();
        assert!(!json.contains("error"));
        assert!(!json.contains("public_url"));
    }
}
