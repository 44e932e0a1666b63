//! Provider plugin contract and the name-keyed provider table
//!
//! A provider backs tunnels with some external session (a subprocess, an SDK
//! connection). The supervisor only talks to it through [`TunnelProvider`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::config::ValidConfig;
use super::events::{LogLevel, TransitionSink, TunnelEvent};
use super::instance::TunnelId;
use super::state::RuntimeStatus;
use crate::error::ProviderError;

/// One provider session, owned by a single tunnel supervisor
///
/// Calls on one session are never concurrent. The supervisor applies its own
/// deadline to every call.
#[async_trait]
pub trait TunnelProvider: Send {
    /// Stable provider identifier, e.g. "cloudflare"
    fn name(&self) -> &str;

    /// Initiate the external session
    ///
    /// Returns once the launch has been initiated, not once the tunnel is up.
    /// Fails with [`ProviderError::Launch`] when the session cannot be spawned.
    async fn start(&mut self, config: &ValidConfig) -> Result<(), ProviderError>;

    /// Terminate the session
    ///
    /// Idempotent: stopping a stopped session succeeds. Fails with
    /// [`ProviderError::Shutdown`] only when termination cannot be confirmed.
    async fn stop(&mut self) -> Result<(), ProviderError>;

    /// Read the current session status
    async fn status(&mut self) -> Result<RuntimeStatus, ProviderError>;
}

/// What a provider session gets to know about the tunnel it serves
#[derive(Clone)]
pub struct ProviderContext {
    pub tunnel_id: TunnelId,
    pub events: Arc<dyn TransitionSink>,
}

impl ProviderContext {
    pub fn new(tunnel_id: impl Into<TunnelId>, events: Arc<dyn TransitionSink>) -> Self {
        Self {
            tunnel_id: tunnel_id.into(),
            events,
        }
    }

    /// Forward a provider log line to the event sink
    pub fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.events.publish(TunnelEvent::Log {
            id: self.tunnel_id.clone(),
            level,
            message: message.into(),
        });
    }
}

impl fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContext")
            .field("tunnel_id", &self.tunnel_id)
            .finish_non_exhaustive()
    }
}

/// Creates provider sessions for one backend
pub trait ProviderFactory: Send + Sync {
    /// Name the factory is registered under
    fn name(&self) -> &str;

    /// Create a fresh, not yet started session
    fn create(&self, context: ProviderContext) -> Box<dyn TunnelProvider>;
}

/// Lookup table of provider factories keyed by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: HashMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing any previous one with the same name
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(factory.name().to_string(), factory);
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
        self.register(factory);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderFactory>> {
        self.factories.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered provider names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
