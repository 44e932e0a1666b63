//! Scriptable provider for tests and local experiments
//!
//! All sessions created by one [`MockProviderFactory`] share its behavior and
//! call counters, so tests can script failures and then inspect what the
//! supervisor did.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::tunnel::config::ValidConfig;
use crate::tunnel::events::LogLevel;
use crate::tunnel::provider::{ProviderContext, ProviderFactory, TunnelProvider};
use crate::tunnel::state::{ProviderStatus, RuntimeStatus};

/// Calls observed across all sessions of a mock factory
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockCalls {
    pub starts: u32,
    pub stops: u32,
    pub polls: u32,
}

#[derive(Debug, Default)]
struct MockShared {
    /// Number of leading starts that fail; `None` means none do
    failing_starts: Option<u32>,
    fail_stop: bool,
    start_delay: Duration,
    stop_delay: Duration,
    status_delay: Duration,
    polls_until_running: u32,
    reported_error: Option<String>,
    calls: MockCalls,
}

/// Factory for [`MockProvider`] sessions
#[derive(Debug, Clone)]
pub struct MockProviderFactory {
    name: String,
    shared: Arc<Mutex<MockShared>>,
}

impl MockProviderFactory {
    /// Mock registered as "mock", healthy on the first poll
    pub fn new() -> Self {
        Self::named("mock")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Mutex::new(MockShared::default())),
        }
    }

    /// Every start fails with a launch error
    pub fn failing_start(self) -> Self {
        self.lock().failing_starts = Some(u32::MAX);
        self
    }

    /// The first `count` starts fail, later ones succeed
    pub fn failing_first_starts(self, count: u32) -> Self {
        self.lock().failing_starts = Some(count);
        self
    }

    /// Every stop fails with a shutdown error
    pub fn failing_stop(self) -> Self {
        self.lock().fail_stop = true;
        self
    }

    /// Delay each start by `delay`
    pub fn start_delay(self, delay: Duration) -> Self {
        self.lock().start_delay = delay;
        self
    }

    /// Delay each stop by `delay`
    pub fn stop_delay(self, delay: Duration) -> Self {
        self.lock().stop_delay = delay;
        self
    }

    /// Delay every status check by `delay`; may be changed while sessions run
    pub fn set_status_delay(&self, delay: Duration) {
        self.lock().status_delay = delay;
    }

    /// Report `stopped` for `polls` polls after a start before reporting `running`
    pub fn running_after_polls(self, polls: u32) -> Self {
        self.lock().polls_until_running = polls;
        self
    }

    /// Make every live session report an error from now on
    pub fn report_error(&self, message: impl Into<String>) {
        self.lock().reported_error = Some(message.into());
    }

    pub fn clear_error(&self) {
        self.lock().reported_error = None;
    }

    pub fn calls(&self) -> MockCalls {
        self.lock().calls
    }

    fn lock(&self) -> MutexGuard<'_, MockShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockProviderFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderFactory for MockProviderFactory {
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self, context: ProviderContext) -> Box<dyn TunnelProvider> {
        Box::new(MockProvider {
            name: self.name.clone(),
            shared: Arc::clone(&self.shared),
            context,
            session: None,
        })
    }
}

#[derive(Debug)]
struct MockSession {
    pid: u32,
    hostname: String,
    polls: u32,
}

/// In-memory provider session driven by its factory's script
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    shared: Arc<Mutex<MockShared>>,
    context: ProviderContext,
    session: Option<MockSession>,
}

impl MockProvider {
    fn lock(&self) -> MutexGuard<'_, MockShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TunnelProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&mut self, config: &ValidConfig) -> Result<(), ProviderError> {
        let (attempt, fails, delay) = {
            let mut shared = self.lock();
            shared.calls.starts += 1;
            let attempt = shared.calls.starts;
            let fails = shared.failing_starts.is_some_and(|n| attempt <= n);
            (attempt, fails, shared.start_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if fails {
            self.context
                .log(LogLevel::Error, format!("mock launch #{attempt} refused"));
            return Err(ProviderError::Launch(format!(
                "mock launch #{attempt} refused"
            )));
        }

        self.session = Some(MockSession {
            pid: 1000 + attempt,
            hostname: config.public_hostname().to_string(),
            polls: 0,
        });
        self.context
            .log(LogLevel::Info, format!("mock session {} launched", 1000 + attempt));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ProviderError> {
        let (fails, delay) = {
            let mut shared = self.lock();
            shared.calls.stops += 1;
            (shared.fail_stop, shared.stop_delay)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if fails {
            return Err(ProviderError::Shutdown(
                "mock session refused to exit".to_string(),
            ));
        }

        self.session = None;
        Ok(())
    }

    async fn status(&mut self) -> Result<RuntimeStatus, ProviderError> {
        let (reported_error, polls_until_running, delay) = {
            let mut shared = self.lock();
            shared.calls.polls += 1;
            (
                shared.reported_error.clone(),
                shared.polls_until_running,
                shared.status_delay,
            )
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let Some(session) = self.session.as_mut() else {
            return Ok(RuntimeStatus::stopped());
        };

        if let Some(message) = reported_error {
            return Ok(RuntimeStatus::error(session.pid, message));
        }

        session.polls += 1;
        if session.polls > polls_until_running {
            Ok(RuntimeStatus::running(session.pid)
                .with_public_url(format!("https://{}", session.hostname)))
        } else {
            Ok(RuntimeStatus {
                status: ProviderStatus::Stopped,
                pid: session.pid,
                ..RuntimeStatus::default()
            })
        }
    }
}
