//! Tunnel events and the sink they are published to

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::instance::TunnelId;
use super::state::TunnelState;

/// Events emitted by supervisors and providers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TunnelEvent {
    /// A lifecycle transition was applied
    Transition {
        id: TunnelId,
        from: TunnelState,
        to: TunnelState,
        at: DateTime<Utc>,
        retry_count: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Log line from a provider session
    Log {
        id: TunnelId,
        level: LogLevel,
        message: String,
    },
}

impl TunnelEvent {
    pub fn tunnel_id(&self) -> &str {
        match self {
            Self::Transition { id, .. } | Self::Log { id, .. } => id,
        }
    }
}

/// Log levels for provider output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Destination for tunnel events
///
/// `publish` must not block; it is called while a transition is applied.
pub trait TransitionSink: Send + Sync {
    fn publish(&self, event: TunnelEvent);
}

/// Sink that fans events out over a broadcast channel
///
/// Slow subscribers lag and lose events; publishers never wait.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<TunnelEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(256)
    }
}

impl TransitionSink for BroadcastSink {
    fn publish(&self, event: TunnelEvent) {
        // No receivers is fine
        let _ = self.tx.send(event);
    }
}

/// Sink that drops everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl TransitionSink for NullSink {
    fn publish(&self, _event: TunnelEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transition(id: &str) -> TunnelEvent {
        TunnelEvent::Transition {
            id: id.to_string(),
            from: TunnelState::Stopped,
            to: TunnelState::Starting,
            at: Utc::now(),
            retry_count: 0,
            error: None,
        }
    }

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        sink.publish(transition("t1"));
        let event = rx.recv().await.unwrap();
        assert_eq!(event.tunnel_id(), "t1");
    }

    #[test]
    fn broadcast_sink_without_subscribers_does_not_fail() {
        let sink = BroadcastSink::new(1);
        sink.publish(transition("t1"));
        sink.publish(transition("t2"));
    }

    #[test]
    fn tunnel_event_serializes_with_type_tag() {
        let json = serde_json::to_string(&transition("t1")).unwrap();
        assert!(json.contains("\"type\":\"transition\""));
        assert!(json.contains("\"to\":\"starting\""));
    }
}
