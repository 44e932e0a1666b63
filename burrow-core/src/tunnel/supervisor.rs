//! Per-tunnel supervisor task
//!
//! Every tunnel is driven by one task that owns its provider session and its
//! [`InstanceRecord`]. Requests reach the task over a channel, so start, stop
//! and the periodic status poll for one tunnel are strictly serialized.
//! Readers get whole snapshots through a `watch` channel.
//!
//! ```text
//!   TunnelHandle ──commands──▶ Supervisor task ──▶ TunnelProvider
//!        ▲                          │
//!        └───────watch snapshot─────┘──▶ TransitionSink
//! ```

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::config::ValidConfig;
use super::events::{TransitionSink, TunnelEvent};
use super::instance::{InstanceRecord, TunnelId, TunnelInstance};
use super::provider::TunnelProvider;
use super::restart::RetryPolicy;
use super::state::{ProviderStatus, RuntimeStatus, TunnelState};
use crate::error::{ProviderError, TunnelError};

const COMMAND_BUFFER: usize = 16;

/// Timing and retry settings for supervisors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Interval between status polls while starting or running
    pub poll_interval: Duration,
    /// Deadline applied to every provider call
    pub call_timeout: Duration,
    /// How long a launched session may take to report `running`
    pub start_timeout: Duration,
    /// Stop attempts before the instance is forced into `error`
    pub stop_attempts: u32,
    pub retry: RetryPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            call_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(30),
            stop_attempts: 3,
            retry: RetryPolicy::default_policy(),
        }
    }
}

type Reply = oneshot::Sender<Result<(), TunnelError>>;

enum Command {
    Start(Reply),
    Stop(Reply),
}

/// State shared between a supervisor task and its handles
struct Shared {
    publisher: watch::Sender<TunnelInstance>,
    events: Arc<dyn TransitionSink>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Cheap, cloneable access to one supervised tunnel
///
/// Handles can request transitions and read snapshots; they cannot change
/// instance state directly. Forcing a tunnel into `error` is reserved for
/// [`TunnelRegistry::shutdown`](super::TunnelRegistry::shutdown):
///
/// ```compile_fail,E0624
/// # async fn force(registry: &burrow_core::TunnelRegistry) -> Result<(), burrow_core::TunnelError> {
/// let handle = registry.lookup("some-id").await?;
/// handle.abort_with_error("forced").await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TunnelHandle {
    id: TunnelId,
    commands: mpsc::Sender<Command>,
    shared: Arc<Shared>,
}

impl TunnelHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current snapshot of the instance
    pub fn snapshot(&self) -> TunnelInstance {
        self.shared.publisher.borrow().clone()
    }

    /// Receiver that observes every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<TunnelInstance> {
        self.shared.publisher.subscribe()
    }

    /// Ask the supervisor to start the tunnel
    ///
    /// Accepted from `stopped` and `error`; resets the retry count. Launch
    /// failures do not fail the request, they show up in the instance state.
    pub async fn request_start(&self) -> Result<(), TunnelError> {
        self.send(Command::Start).await
    }

    /// Ask the supervisor to stop the tunnel
    ///
    /// A no-op on a stopped tunnel. Fails with a shutdown error when the
    /// provider could not be stopped; the instance is then in `error`.
    pub async fn request_stop(&self) -> Result<(), TunnelError> {
        self.send(Command::Stop).await
    }

    /// Wait until a snapshot satisfies `predicate`, or `limit` passes
    pub async fn wait_for<F>(&self, limit: Duration, predicate: F) -> Option<TunnelInstance>
    where
        F: FnMut(&TunnelInstance) -> bool,
    {
        let mut rx = self.subscribe();
        match tokio::time::timeout(limit, rx.wait_for(predicate)).await {
            Ok(Ok(snapshot)) => Some(snapshot.clone()),
            _ => None,
        }
    }

    /// Kill the supervisor task and mark the instance failed
    ///
    /// Only for tunnels that did not stop within a shutdown grace period,
    /// after the registry has dropped them. The provider session is dropped
    /// with the task.
    pub(crate) async fn abort_with_error(&self, reason: &str) {
        let task = self
            .shared
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }

        let mut forced = None;
        self.shared.publisher.send_modify(|instance| {
            if instance.state == TunnelState::Error || instance.state == TunnelState::Stopped {
                return;
            }
            let from = instance.state;
            instance.state = TunnelState::Error;
            instance.last_status = RuntimeStatus::error(instance.last_status.pid, reason);
            instance.last_transition_at = Utc::now();
            forced = Some(TunnelEvent::Transition {
                id: instance.id.clone(),
                from,
                to: TunnelState::Error,
                at: instance.last_transition_at,
                retry_count: instance.retry_count,
                error: Some(reason.to_string()),
            });
        });

        if let Some(event) = forced {
            error!(tunnel = %self.id, "Tunnel forced into error: {}", reason);
            self.shared.events.publish(event);
        }
    }

    async fn send(&self, command: fn(Reply) -> Command) -> Result<(), TunnelError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| TunnelError::Closed(self.id.clone()))?;
        rx.await.map_err(|_| TunnelError::Closed(self.id.clone()))?
    }
}

impl fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("id", &self.id)
            .field("state", &self.shared.publisher.borrow().state)
            .finish()
    }
}

/// Spawn the supervisor task for one tunnel
///
/// The instance starts in `stopped`; call [`TunnelHandle::request_start`] to
/// launch it. Must be called from within a tokio runtime.
pub fn spawn(
    id: TunnelId,
    config: ValidConfig,
    provider: Box<dyn TunnelProvider>,
    settings: SupervisorConfig,
    events: Arc<dyn TransitionSink>,
) -> TunnelHandle {
    let record = InstanceRecord::new(id.clone(), provider.name(), &config);
    let (publisher, _) = watch::channel(record.snapshot());
    let shared = Arc::new(Shared {
        publisher,
        events,
        task: Mutex::new(None),
    });
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);

    let supervisor = Supervisor {
        record,
        config,
        provider,
        settings,
        shared: Arc::clone(&shared),
        commands: rx,
        next_poll: None,
        next_retry: None,
        start_deadline: None,
        observations: 0,
    };
    let task = tokio::spawn(supervisor.run());
    *shared.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);

    TunnelHandle {
        id,
        commands: tx,
        shared,
    }
}

struct Supervisor {
    record: InstanceRecord,
    config: ValidConfig,
    provider: Box<dyn TunnelProvider>,
    settings: SupervisorConfig,
    shared: Arc<Shared>,
    commands: mpsc::Receiver<Command>,
    next_poll: Option<Instant>,
    next_retry: Option<Instant>,
    start_deadline: Option<Instant>,
    observations: u64,
}

impl Supervisor {
    async fn run(mut self) {
        debug!(tunnel = %self.record.id(), "Supervisor started");

        loop {
            let wake = self.next_wake();
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Start(reply)) => {
                        let _ = reply.send(self.request_start().await);
                    }
                    Some(Command::Stop(reply)) => {
                        let _ = reply.send(self.request_stop().await);
                    }
                    None => break,
                },
                () = sleep_until(wake) => self.on_timer().await,
            }
        }

        // Every handle is gone; do not leave the session running
        if self.record.state() != TunnelState::Stopped {
            self.stop_quietly().await;
        }
        debug!(tunnel = %self.record.id(), "Supervisor exited");
    }

    fn next_wake(&self) -> Option<Instant> {
        [self.next_retry, self.next_poll].into_iter().flatten().min()
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();
        if self.next_retry.is_some_and(|at| at <= now) {
            self.next_retry = None;
            self.retry().await;
        } else if self.next_poll.is_some_and(|at| at <= now) {
            self.next_poll = None;
            self.poll().await;
        }
    }

    async fn request_start(&mut self) -> Result<(), TunnelError> {
        let from = self.record.state();
        if !matches!(from, TunnelState::Stopped | TunnelState::Error) {
            return Err(TunnelError::StaleState {
                expected: "stopped or error".to_string(),
                actual: from,
            });
        }

        self.clear_timers();
        self.record.reset_retries();
        if from == TunnelState::Error {
            self.stop_quietly().await;
        }

        self.transition(from, TunnelState::Starting, None)?;
        info!(
            tunnel = %self.record.id(),
            provider = self.provider.name(),
            "Starting tunnel for {} -> {}",
            self.config.public_hostname(),
            self.config.local_addr()
        );
        self.launch().await;
        Ok(())
    }

    async fn request_stop(&mut self) -> Result<(), TunnelError> {
        let from = self.record.state();
        match from {
            TunnelState::Stopped => return Ok(()),
            TunnelState::Stopping => {
                return Err(TunnelError::StaleState {
                    expected: "running, starting or error".to_string(),
                    actual: from,
                });
            }
            _ => {}
        }

        self.clear_timers();
        self.transition(from, TunnelState::Stopping, None)?;
        info!(tunnel = %self.record.id(), "Stopping tunnel");

        let limit = self.settings.call_timeout;
        let attempts = self.settings.stop_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            match with_deadline(limit, self.provider.stop()).await {
                Ok(()) => {
                    self.record.record_status(RuntimeStatus::stopped());
                    self.transition(TunnelState::Stopping, TunnelState::Stopped, None)?;
                    info!(tunnel = %self.record.id(), "Tunnel stopped");
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        tunnel = %self.record.id(),
                        attempt,
                        attempts,
                        "Stop attempt failed: {}",
                        e
                    );
                    last_error = Some(e);
                }
            }
        }

        let err = match last_error {
            Some(ProviderError::Shutdown(detail)) => ProviderError::Shutdown(detail),
            Some(other) => ProviderError::Shutdown(other.to_string()),
            None => ProviderError::Shutdown("no stop attempt was made".to_string()),
        };
        error!(tunnel = %self.record.id(), "Tunnel could not be stopped: {}", err);

        let pid = self.record.snapshot().last_status.pid;
        self.record
            .record_status(RuntimeStatus::error(pid, format!("shutdown failed: {err}")));
        self.transition(
            TunnelState::Stopping,
            TunnelState::Error,
            Some(err.to_string()),
        )?;
        Err(err.into())
    }

    /// Re-launch after a failure; runs when the retry timer fires
    async fn retry(&mut self) {
        if self.record.state() != TunnelState::Error {
            return;
        }

        self.stop_quietly().await;
        self.record.increment_retries();
        if let Err(e) = self.transition(TunnelState::Error, TunnelState::Starting, None) {
            error!(tunnel = %self.record.id(), "Retry dropped: {}", e);
            return;
        }

        info!(
            tunnel = %self.record.id(),
            retry = self.record.retry_count(),
            max = self.settings.retry.max_retries(),
            "Retrying tunnel start"
        );
        self.launch().await;
    }

    async fn launch(&mut self) {
        let limit = self.settings.call_timeout;
        match with_deadline(limit, self.provider.start(&self.config)).await {
            Ok(()) => {
                let now = Instant::now();
                self.start_deadline = Some(now + self.settings.start_timeout);
                self.next_poll = Some(now + self.settings.poll_interval);
                debug!(tunnel = %self.record.id(), "Provider launch initiated");
            }
            Err(e) => self.fail(TunnelState::Starting, RuntimeStatus::error(0, e.to_string())),
        }
    }

    async fn poll(&mut self) {
        let state = self.record.state();
        if !matches!(state, TunnelState::Starting | TunnelState::Running) {
            return;
        }

        let limit = self.settings.call_timeout;
        let result = with_deadline(limit, self.provider.status()).await;
        self.observations += 1;
        let seq = self.observations;

        let status = match result {
            Ok(status) => status,
            Err(e) => {
                let pid = self.record.snapshot().last_status.pid;
                self.fail(state, RuntimeStatus::error(pid, e.to_string()));
                return;
            }
        };

        if !self.record.observe(seq, status.clone()) {
            debug!(tunnel = %self.record.id(), seq, "Discarding stale status observation");
            self.schedule_poll();
            return;
        }

        match (state, status.status) {
            (_, ProviderStatus::Error) => {
                let detail = status
                    .error
                    .clone()
                    .unwrap_or_else(|| "provider reported an error".to_string());
                self.fail(state, RuntimeStatus::error(status.pid, detail));
            }
            (TunnelState::Starting, ProviderStatus::Running) => {
                self.start_deadline = None;
                self.record.reset_retries();
                if self
                    .transition(TunnelState::Starting, TunnelState::Running, None)
                    .is_ok()
                {
                    info!(
                        tunnel = %self.record.id(),
                        pid = status.pid,
                        "Tunnel running at {}",
                        status.public_url.as_deref().unwrap_or(self.config.public_hostname())
                    );
                }
                self.schedule_poll();
            }
            (TunnelState::Starting, ProviderStatus::Stopped) => {
                if self.start_deadline.is_some_and(|at| Instant::now() >= at) {
                    let detail = format!(
                        "provider did not confirm the tunnel within {:?}",
                        self.settings.start_timeout
                    );
                    self.fail(state, RuntimeStatus::error(status.pid, detail));
                } else {
                    self.publish();
                    self.schedule_poll();
                }
            }
            (TunnelState::Running, ProviderStatus::Stopped) => {
                let detail = status
                    .error
                    .clone()
                    .unwrap_or_else(|| "provider session stopped unexpectedly".to_string());
                self.fail(state, RuntimeStatus::error(status.pid, detail));
            }
            _ => {
                self.publish();
                self.schedule_poll();
            }
        }
    }

    /// Move to `error`, recording `status`, and schedule a retry if allowed
    fn fail(&mut self, from: TunnelState, status: RuntimeStatus) {
        let message = status
            .error
            .clone()
            .unwrap_or_else(|| "provider failure".to_string());
        self.clear_timers();
        self.record.record_status(status);

        if let Err(e) = self.transition(from, TunnelState::Error, Some(message.clone())) {
            error!(tunnel = %self.record.id(), "Failure not applied: {}", e);
            return;
        }

        let retries = self.record.retry_count();
        match self.settings.retry.next_delay(retries) {
            Some(delay) => {
                warn!(
                    tunnel = %self.record.id(),
                    retry = retries + 1,
                    "Tunnel failed: {}; retrying in {:?}",
                    message,
                    delay
                );
                self.next_retry = Some(Instant::now() + delay);
            }
            None => {
                error!(
                    tunnel = %self.record.id(),
                    retries,
                    "Tunnel failed: {}; giving up until restarted",
                    message
                );
            }
        }
    }

    fn transition(
        &mut self,
        from: TunnelState,
        to: TunnelState,
        error: Option<String>,
    ) -> Result<(), TunnelError> {
        self.record.transition(from, to)?;
        let snapshot = self.record.snapshot();
        debug!(tunnel = %snapshot.id, "Tunnel state: {} -> {}", from, to);

        self.shared.events.publish(TunnelEvent::Transition {
            id: snapshot.id.clone(),
            from,
            to,
            at: snapshot.last_transition_at,
            retry_count: snapshot.retry_count,
            error,
        });
        self.shared.publisher.send_replace(snapshot);
        Ok(())
    }

    fn publish(&self) {
        self.shared.publisher.send_replace(self.record.snapshot());
    }

    fn schedule_poll(&mut self) {
        self.next_poll = Some(Instant::now() + self.settings.poll_interval);
    }

    fn clear_timers(&mut self) {
        self.next_poll = None;
        self.next_retry = None;
        self.start_deadline = None;
    }

    /// Best-effort stop of whatever the provider still holds
    async fn stop_quietly(&mut self) {
        let limit = self.settings.call_timeout;
        if let Err(e) = with_deadline(limit, self.provider.stop()).await {
            warn!(tunnel = %self.record.id(), "Cleanup of provider session failed: {}", e);
        }
    }
}

/// Run a provider call under a deadline; expiry becomes [`ProviderError::Timeout`]
async fn with_deadline<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, ProviderError>>,
) -> Result<T, ProviderError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(ProviderError::Timeout(limit)))
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
