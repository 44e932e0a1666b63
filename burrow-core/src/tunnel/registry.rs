//! Process-wide table of supervised tunnels

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{info, warn};
use uuid::Uuid;

use super::config::{StartConfig, ValidationError, ValidationErrors, validate};
use super::events::TransitionSink;
use super::instance::{TunnelId, TunnelInstance};
use super::provider::{ProviderContext, ProviderRegistry};
use super::state::TunnelState;
use super::supervisor::{self, SupervisorConfig, TunnelHandle};
use crate::error::TunnelError;

/// Outcome of [`TunnelRegistry::shutdown`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Tunnels that reached `stopped` within the grace period
    pub stopped: Vec<TunnelId>,
    /// Tunnels forced into `error`
    pub forced: Vec<TunnelId>,
}

/// Owns the handles of every active tunnel
///
/// Empty at startup, drained by [`shutdown`](Self::shutdown).
pub struct TunnelRegistry {
    providers: ProviderRegistry,
    settings: SupervisorConfig,
    events: Arc<dyn TransitionSink>,
    tunnels: RwLock<HashMap<TunnelId, TunnelHandle>>,
}

impl TunnelRegistry {
    pub fn new(
        providers: ProviderRegistry,
        settings: SupervisorConfig,
        events: Arc<dyn TransitionSink>,
    ) -> Self {
        Self {
            providers,
            settings,
            events,
            tunnels: RwLock::new(HashMap::new()),
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub fn settings(&self) -> &SupervisorConfig {
        &self.settings
    }

    /// Validate `config`, spawn a supervisor on `provider` and start it
    ///
    /// A blank provider name is reported alongside the config's field errors.
    /// Launch failures do not fail creation; the instance is registered and
    /// reports them through its state.
    pub async fn create(
        &self,
        provider: &str,
        config: &StartConfig,
    ) -> Result<TunnelHandle, TunnelError> {
        let checked = validate(config);
        if provider.trim().is_empty() {
            let mut errors = vec![ValidationError::new("provider", "must not be empty")];
            if let Err(ValidationErrors(rest)) = checked {
                errors.extend(rest);
            }
            return Err(TunnelError::Validation(errors.into()));
        }
        let valid = checked?;
        let factory = self
            .providers
            .get(provider)
            .ok_or_else(|| TunnelError::UnknownProvider(provider.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let session = factory.create(ProviderContext::new(id.clone(), Arc::clone(&self.events)));
        let handle = supervisor::spawn(
            id.clone(),
            valid,
            session,
            self.settings.clone(),
            Arc::clone(&self.events),
        );

        self.register(handle.clone()).await;
        info!(tunnel = %id, provider, "Tunnel created");

        handle.request_start().await?;
        Ok(handle)
    }

    /// Add a supervised tunnel to the table
    pub async fn register(&self, handle: TunnelHandle) -> TunnelId {
        let id = handle.id().to_string();
        self.tunnels.write().await.insert(id.clone(), handle);
        id
    }

    pub async fn lookup(&self, id: &str) -> Result<TunnelHandle, TunnelError> {
        self.tunnels
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| TunnelError::NotFound(id.to_string()))
    }

    /// Snapshots of every registered tunnel, oldest first
    pub async fn list(&self) -> Vec<TunnelInstance> {
        let mut tunnels: Vec<_> = self
            .tunnels
            .read()
            .await
            .values()
            .map(TunnelHandle::snapshot)
            .collect();
        tunnels.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tunnels
    }

    pub async fn count(&self) -> usize {
        self.tunnels.read().await.len()
    }

    /// Stop a tunnel and remove it from the table
    ///
    /// A tunnel that fails to stop stays registered in `error` and the shutdown
    /// error is returned.
    pub async fn unregister(&self, id: &str) -> Result<TunnelInstance, TunnelError> {
        let handle = self.lookup(id).await?;
        handle.request_stop().await?;

        let snapshot = handle.snapshot();
        if snapshot.state == TunnelState::Stopped {
            self.tunnels.write().await.remove(id);
            info!(tunnel = %id, "Tunnel removed");
        }
        Ok(snapshot)
    }

    /// Stop every tunnel, waiting at most `grace` for each
    ///
    /// The table is drained. Tunnels that do not reach `stopped` in time are
    /// aborted and left in `error`.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let handles: Vec<TunnelHandle> = self.tunnels.write().await.drain().map(|(_, h)| h).collect();
        if handles.is_empty() {
            return ShutdownReport::default();
        }
        info!(count = handles.len(), "Stopping all tunnels");

        let mut pending = JoinSet::new();
        for handle in handles {
            pending.spawn(async move {
                let outcome = tokio::time::timeout(grace, handle.request_stop()).await;
                let reason = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e.to_string()),
                    Err(_) => Some(format!("did not stop within {grace:?}")),
                };
                if let Some(reason) = reason.as_deref() {
                    warn!(tunnel = %handle.id(), "Forcing tunnel down: {}", reason);
                    handle.abort_with_error(reason).await;
                }
                (handle.id().to_string(), reason.is_none())
            });
        }

        let mut report = ShutdownReport::default();
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((id, true)) => report.stopped.push(id),
                Ok((id, false)) => report.forced.push(id),
                Err(e) => warn!("Shutdown task failed: {}", e),
            }
        }
        report.stopped.sort();
        report.forced.sort();
        info!(
            stopped = report.stopped.len(),
            forced = report.forced.len(),
            "Tunnel shutdown complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::events::BroadcastSink;
    use crate::tunnel::providers::MockProviderFactory;
    use crate::tunnel::restart::RetryPolicy;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_settings() -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: Duration::from_millis(10),
            call_timeout: Duration::from_millis(200),
            start_timeout: Duration::from_millis(300),
            stop_attempts: 2,
            retry: RetryPolicy::new(Duration::from_millis(5), Duration::from_millis(20), 5),
        }
    }

    fn registry_with(factory: MockProviderFactory) -> TunnelRegistry {
        TunnelRegistry::new(
            ProviderRegistry::new().with(Arc::new(factory)),
            fast_settings(),
            Arc::new(BroadcastSink::default()),
        )
    }

    fn sample() -> StartConfig {
        StartConfig::new("a.example.com", "http://localhost:9000", "t")
    }

    #[tokio::test]
    async fn registry_starts_empty() {
        let registry = registry_with(MockProviderFactory::new());
        assert_eq!(registry.count().await, 0);
        assert!(registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn create_registers_and_starts() {
        let registry = registry_with(MockProviderFactory::new());
        let handle = registry.create("mock", &sample()).await.unwrap();

        assert_eq!(registry.count().await, 1);
        let found = registry.lookup(handle.id()).await.unwrap();
        let snapshot = found
            .wait_for(WAIT, |s| s.state == TunnelState::Running)
            .await
            .unwrap();
        assert_eq!(snapshot.config.public_hostname, "a.example.com");
        assert_eq!(snapshot.retry_count, 0);
    }

    #[tokio::test]
    async fn create_rejects_invalid_config() {
        let registry = registry_with(MockProviderFactory::new());
        let config = StartConfig::new("a.example.com", "http://localhost:9000", " ");
        let err = registry.create("mock", &config).await.unwrap_err();
        match err {
            TunnelError::Validation(errors) => assert!(errors.has_field("auth_token")),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn create_reports_blank_provider_with_config_errors() {
        let registry = registry_with(MockProviderFactory::new());
        let config = StartConfig::new("a.example.com", "http://localhost:9000", "");
        let err = registry.create("  ", &config).await.unwrap_err();
        match err {
            TunnelError::Validation(errors) => {
                assert!(errors.has_field("provider"));
                assert!(errors.has_field("auth_token"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn tunnel_left_in_error_by_failed_stop_is_restartable() {
        let factory = MockProviderFactory::new().failing_stop();
        let registry = registry_with(factory.clone());
        let created = registry.create("mock", &sample()).await.unwrap();
        created
            .wait_for(WAIT, |s| s.state == TunnelState::Running)
            .await
            .unwrap();

        let handle = registry.lookup(created.id()).await.unwrap();
        assert!(handle.request_stop().await.is_err());
        assert_eq!(handle.snapshot().state, TunnelState::Error);

        handle.request_start().await.unwrap();
        handle
            .wait_for(WAIT, |s| s.state == TunnelState::Running)
            .await
            .expect("tunnel in error should restart");
        assert_eq!(factory.calls().starts, 2);
    }

    #[tokio::test]
    async fn create_rejects_unknown_provider() {
        let registry = registry_with(MockProviderFactory::new());
        let err = registry.create("ngrok", &sample()).await.unwrap_err();
        assert!(matches!(err, TunnelError::UnknownProvider(name) if name == "ngrok"));
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn lookup_unknown_is_not_found() {
        let registry = registry_with(MockProviderFactory::new());
        assert!(matches!(
            registry.lookup("nope").await,
            Err(TunnelError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_returns_every_snapshot() {
        let registry = registry_with(MockProviderFactory::new());
        let first = registry.create("mock", &sample()).await.unwrap();
        let second = registry
            .create(
                "mock",
                &StartConfig::new("b.example.com", "http://localhost:9001", "t"),
            )
            .await
            .unwrap();

        let ids: Vec<_> = registry.list().await.into_iter().map(|t| t.id).collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&first.id().to_string()));
        assert!(ids.contains(&second.id().to_string()));
    }

    #[tokio::test]
    async fn failed_start_stays_registered() {
        let registry = registry_with(MockProviderFactory::new().failing_start());
        let handle = registry.create("mock", &sample()).await.unwrap();
        handle
            .wait_for(WAIT, |s| s.state == TunnelState::Error && s.retry_count == 5)
            .await
            .unwrap();

        let snapshot = registry.lookup(handle.id()).await.unwrap().snapshot();
        assert_eq!(snapshot.state, TunnelState::Error);
        assert!(snapshot.last_error().is_some());
    }

    #[tokio::test]
    async fn unregister_stops_and_removes() {
        let factory = MockProviderFactory::new();
        let registry = registry_with(factory.clone());
        let handle = registry.create("mock", &sample()).await.unwrap();

        let snapshot = registry.unregister(handle.id()).await.unwrap();
        assert_eq!(snapshot.state, TunnelState::Stopped);
        assert_eq!(registry.count().await, 0);
        assert!(factory.calls().stops >= 1);
    }

    #[tokio::test]
    async fn unregister_keeps_tunnel_that_would_not_stop() {
        let registry = registry_with(MockProviderFactory::new().failing_stop());
        let handle = registry.create("mock", &sample()).await.unwrap();

        let err = registry.unregister(handle.id()).await.unwrap_err();
        assert!(matches!(err, TunnelError::Provider(_)));
        assert_eq!(registry.count().await, 1);
        assert_eq!(
            registry.lookup(handle.id()).await.unwrap().snapshot().state,
            TunnelState::Error
        );
    }

    #[tokio::test]
    async fn unregister_unknown_is_not_found() {
        let registry = registry_with(MockProviderFactory::new());
        assert!(matches!(
            registry.unregister("nope").await,
            Err(TunnelError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn shutdown_stops_everything_and_drains() {
        let registry = registry_with(MockProviderFactory::new());
        let a = registry.create("mock", &sample()).await.unwrap();
        let b = registry
            .create(
                "mock",
                &StartConfig::new("b.example.com", "http://localhost:9001", "t"),
            )
            .await
            .unwrap();

        let report = registry.shutdown(Duration::from_secs(2)).await;

        assert_eq!(report.stopped.len(), 2);
        assert!(report.forced.is_empty());
        assert_eq!(registry.count().await, 0);
        assert_eq!(a.snapshot().state, TunnelState::Stopped);
        assert_eq!(b.snapshot().state, TunnelState::Stopped);
    }

    #[tokio::test]
    async fn shutdown_forces_stragglers_into_error() {
        let settings = SupervisorConfig {
            call_timeout: Duration::from_secs(30),
            ..fast_settings()
        };
        let registry = TunnelRegistry::new(
            ProviderRegistry::new()
                .with(Arc::new(MockProviderFactory::new().stop_delay(Duration::from_secs(10)))),
            settings,
            Arc::new(BroadcastSink::default()),
        );
        let handle = registry.create("mock", &sample()).await.unwrap();

        let report = registry.shutdown(Duration::from_millis(50)).await;

        assert_eq!(report.forced, vec![handle.id().to_string()]);
        assert!(report.stopped.is_empty());
        let snapshot = handle.snapshot();
        assert_eq!(snapshot.state, TunnelState::Error);
        assert!(snapshot.last_error().unwrap().contains("did not stop"));
    }
}
