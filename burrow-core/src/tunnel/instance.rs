//! Tunnel instance snapshots and the record the supervisor mutates

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::ValidConfig;
use super::state::{RuntimeStatus, TunnelState};
use crate::error::TunnelError;

/// Identifier of a supervised tunnel
pub type TunnelId = String;

/// The non-secret part of a tunnel's configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelTarget {
    pub public_hostname: String,
    pub local_addr: String,
}

impl From<&ValidConfig> for TunnelTarget {
    fn from(config: &ValidConfig) -> Self {
        Self {
            public_hostname: config.public_hostname().to_string(),
            local_addr: config.local_addr().to_string(),
        }
    }
}

/// Read-only view of one tunnel, as published by its supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelInstance {
    pub id: TunnelId,
    pub provider: String,
    pub config: TunnelTarget,
    pub state: TunnelState,
    pub last_status: RuntimeStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_transition_at: DateTime<Utc>,
}

impl TunnelInstance {
    /// Error detail from the last observation, if any
    pub fn last_error(&self) -> Option<&str> {
        self.last_status.error.as_deref()
    }
}

/// Mutable lifecycle record, owned by exactly one supervisor task
///
/// Every state change goes through [`InstanceRecord::transition`], which
/// checks the expected source state before applying.
#[derive(Debug)]
pub struct InstanceRecord {
    instance: TunnelInstance,
    last_observation: Option<u64>,
}

impl InstanceRecord {
    pub fn new(id: TunnelId, provider: impl Into<String>, config: &ValidConfig) -> Self {
        let now = Utc::now();
        Self {
            instance: TunnelInstance {
                id,
                provider: provider.into(),
                config: TunnelTarget::from(config),
                state: TunnelState::Stopped,
                last_status: RuntimeStatus::stopped(),
                retry_count: 0,
                created_at: now,
                last_transition_at: now,
            },
            last_observation: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.instance.id
    }

    pub fn state(&self) -> TunnelState {
        self.instance.state
    }

    pub fn retry_count(&self) -> u32 {
        self.instance.retry_count
    }

    pub fn snapshot(&self) -> TunnelInstance {
        self.instance.clone()
    }

    /// Compare-and-set transition
    ///
    /// Fails with [`TunnelError::StaleState`] when the record is no longer in
    /// `from`, and with [`TunnelError::InvalidTransition`] for moves outside
    /// the lifecycle table.
    pub fn transition(&mut self, from: TunnelState, to: TunnelState) -> Result<(), TunnelError> {
        if self.instance.state != from {
            return Err(TunnelError::StaleState {
                expected: from.to_string(),
                actual: self.instance.state,
            });
        }
        if !from.can_transition_to(to) {
            return Err(TunnelError::InvalidTransition { from, to });
        }
        self.instance.state = to;
        self.instance.last_transition_at = Utc::now();
        Ok(())
    }

    /// Apply a provider observation tagged with sequence number `seq`
    ///
    /// Observations at or below the last applied sequence are discarded.
    /// Returns whether the observation was applied.
    pub fn observe(&mut self, seq: u64, status: RuntimeStatus) -> bool {
        if self.last_observation.is_some_and(|last| seq <= last) {
            return false;
        }
        self.last_observation = Some(seq);
        self.instance.last_status = status;
        true
    }

    /// Record a status the supervisor derived itself (launch or shutdown failure,
    /// or the cleared status after a stop)
    pub fn record_status(&mut self, status: RuntimeStatus) {
        self.instance.last_status = status;
    }

    pub fn increment_retries(&mut self) {
        self.instance.retry_count += 1;
    }

    pub fn reset_retries(&mut self) {
        self.instance.retry_count = 0;
    }

    /// Whether the cached status agrees with the current state
    pub fn is_consistent(&self) -> bool {
        self.instance
            .state
            .admits(self.instance.last_status.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::config::{StartConfig, validate};

    fn record() -> InstanceRecord {
        let config =
            validate(&StartConfig::new("a.example.com", "http://localhost:9000", "t")).unwrap();
        InstanceRecord::new("t1".to_string(), "mock", &config)
    }

    #[test]
    fn new_record_is_stopped_and_consistent() {
        let record = record();
        assert_eq!(record.state(), TunnelState::Stopped);
        assert_eq!(record.retry_count(), 0);
        assert!(record.is_consistent());
    }

    #[test]
    fn snapshot_hides_token() {
        let json = serde_json::to_string(&record().snapshot()).unwrap();
        assert!(json.contains("a.example.com"));
        assert!(json.contains("http://localhost:9000"));
        assert!(!json.contains("auth_token"));
    }

    #[test]
    fn transition_updates_timestamp() {
        let mut record = record();
        let before = record.snapshot().last_transition_at;
        record
            .transition(TunnelState::Stopped, TunnelState::Starting)
            .unwrap();
        assert_eq!(record.state(), TunnelState::Starting);
        assert!(record.snapshot().last_transition_at >= before);
    }

    #[test]
    fn transition_from_wrong_state_is_stale() {
        let mut record = record();
        let err = record
            .transition(TunnelState::Running, TunnelState::Error)
            .unwrap_err();
        assert!(matches!(
            err,
            TunnelError::StaleState {
                actual: TunnelState::Stopped,
                ..
            }
        ));
        assert_eq!(record.state(), TunnelState::Stopped);
    }

    #[test]
    fn transition_outside_table_is_rejected() {
        let mut record = record();
        let err = record
            .transition(TunnelState::Stopped, TunnelState::Running)
            .unwrap_err();
        assert!(matches!(err, TunnelError::InvalidTransition { .. }));
    }

    #[test]
    fn stale_observation_is_discarded() {
        let mut record = record();
        assert!(record.observe(2, RuntimeStatus::running(10)));
        assert!(!record.observe(1, RuntimeStatus::error(10, "old")));
        assert!(!record.observe(2, RuntimeStatus::error(10, "dup")));
        assert!(record.snapshot().last_status.is_running());
        assert!(record.observe(3, RuntimeStatus::stopped()));
    }
}
