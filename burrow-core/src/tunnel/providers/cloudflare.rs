//! Cloudflare Tunnel provider backed by the `cloudflared` binary

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ProviderError;
use crate::tunnel::cloudflared;
use crate::tunnel::config::ValidConfig;
use crate::tunnel::events::LogLevel;
use crate::tunnel::provider::{ProviderContext, ProviderFactory, TunnelProvider};
use crate::tunnel::state::{ProviderStatus, RuntimeStatus};

/// Name the provider registers under
pub const CLOUDFLARE: &str = "cloudflare";

/// Settings shared by all cloudflare sessions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudflareSettings {
    /// cloudflared executable name or path
    pub binary: String,
    /// How long to wait for the process to exit after kill
    pub stop_timeout: Duration,
}

impl Default for CloudflareSettings {
    fn default() -> Self {
        Self {
            binary: "cloudflared".to_string(),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

/// Factory for [`CloudflareProvider`] sessions
#[derive(Debug, Clone, Default)]
pub struct CloudflareFactory {
    settings: CloudflareSettings,
}

impl CloudflareFactory {
    pub fn new(settings: CloudflareSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CloudflareSettings {
        &self.settings
    }
}

impl ProviderFactory for CloudflareFactory {
    fn name(&self) -> &str {
        CLOUDFLARE
    }

    fn create(&self, context: ProviderContext) -> Box<dyn TunnelProvider> {
        Box::new(CloudflareProvider {
            settings: self.settings.clone(),
            context,
            session: None,
        })
    }
}

/// What the output watcher has learned about the session
#[derive(Debug, Default)]
struct Monitor {
    registered: bool,
    auth_failed: bool,
    last_error: Option<String>,
    quick_url: Option<String>,
}

struct Session {
    child: Child,
    monitor: Arc<Mutex<Monitor>>,
    watcher: JoinHandle<()>,
    public_url: String,
}

impl Session {
    fn monitor(&self) -> MutexGuard<'_, Monitor> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One cloudflared process
pub struct CloudflareProvider {
    settings: CloudflareSettings,
    context: ProviderContext,
    session: Option<Session>,
}

#[async_trait]
impl TunnelProvider for CloudflareProvider {
    fn name(&self) -> &str {
        CLOUDFLARE
    }

    async fn start(&mut self, config: &ValidConfig) -> Result<(), ProviderError> {
        if let Some(session) = self.session.as_mut() {
            if matches!(session.child.try_wait(), Ok(None)) {
                return Err(ProviderError::Launch(
                    "cloudflared session already running".to_string(),
                ));
            }
            if let Some(old) = self.session.take() {
                old.watcher.abort();
            }
        }

        let binary = &self.settings.binary;
        let mut child = cloudflared::spawn_tunnel(binary, config).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ProviderError::Launch(format!("{binary} not found. Is cloudflared installed?"))
            } else {
                ProviderError::Launch(format!("failed to spawn {binary}: {e}"))
            }
        })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProviderError::Launch("cloudflared stderr not captured".to_string()))?;

        let monitor = Arc::new(Mutex::new(Monitor::default()));
        let watcher = tokio::spawn(watch_output(
            stderr,
            Arc::clone(&monitor),
            self.context.clone(),
        ));

        info!(
            tunnel = %self.context.tunnel_id,
            pid = child.id().unwrap_or(0),
            "Launched cloudflared for {}",
            config.public_hostname()
        );

        self.session = Some(Session {
            child,
            monitor,
            watcher,
            public_url: format!("https://{}", config.public_hostname()),
        });
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ProviderError> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };

        if let Ok(Some(_)) = session.child.try_wait() {
            session.watcher.abort();
            return Ok(());
        }

        if let Err(e) = session.child.start_kill() {
            debug!("cloudflared kill signal failed: {}", e);
        }

        match tokio::time::timeout(self.settings.stop_timeout, session.child.wait()).await {
            Ok(Ok(exit)) => {
                info!(tunnel = %self.context.tunnel_id, "cloudflared exited with {}", exit);
                session.watcher.abort();
                Ok(())
            }
            Ok(Err(e)) => {
                self.session = Some(session);
                Err(ProviderError::Shutdown(e.to_string()))
            }
            Err(_) => {
                warn!(tunnel = %self.context.tunnel_id, "cloudflared did not exit in time");
                self.session = Some(session);
                Err(ProviderError::Shutdown(format!(
                    "cloudflared did not exit within {:?}",
                    self.settings.stop_timeout
                )))
            }
        }
    }

    async fn status(&mut self) -> Result<RuntimeStatus, ProviderError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(RuntimeStatus::stopped());
        };

        match session.child.try_wait() {
            Ok(Some(exit)) => {
                let detail = session
                    .monitor()
                    .last_error
                    .clone()
                    .unwrap_or_else(|| format!("cloudflared exited with {exit}"));
                Ok(RuntimeStatus::error(0, detail))
            }
            Ok(None) => {
                let pid = session.child.id().unwrap_or(0);
                let monitor = session.monitor();
                if monitor.auth_failed {
                    let detail = monitor
                        .last_error
                        .clone()
                        .unwrap_or_else(|| "authentication rejected".to_string());
                    Ok(RuntimeStatus::error(pid, detail))
                } else if monitor.registered {
                    let url = monitor
                        .quick_url
                        .clone()
                        .unwrap_or_else(|| session.public_url.clone());
                    Ok(RuntimeStatus::running(pid).with_public_url(url))
                } else {
                    Ok(RuntimeStatus {
                        status: ProviderStatus::Stopped,
                        pid,
                        error: monitor.last_error.clone(),
                        public_url: None,
                    })
                }
            }
            Err(e) => Err(ProviderError::Status(e.to_string())),
        }
    }
}

/// Follow cloudflared's log output and track connection state
async fn watch_output(stderr: ChildStderr, monitor: Arc<Mutex<Monitor>>, context: ProviderContext) {
    let mut lines = BufReader::new(stderr).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let (level, message) =
            cloudflared::parse_log_line(&line).unwrap_or((LogLevel::Info, line.trim()));

        {
            let mut state = monitor.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(url) = cloudflared::extract_tunnel_url(&line) {
                state.quick_url = Some(url);
            }
            if cloudflared::is_auth_failure(&line) {
                state.auth_failed = true;
                state.last_error = Some(message.to_string());
            } else if cloudflared::is_connection_lost(&line) {
                state.registered = false;
                state.last_error = Some(message.to_string());
            } else if cloudflared::is_connection_registered(&line) {
                state.registered = true;
                state.last_error = None;
            } else if level == LogLevel::Error {
                state.last_error = Some(message.to_string());
            }
        }

        debug!(tunnel = %context.tunnel_id, "cloudflared: {}", line);
        context.log(level, message);
    }

    debug!(tunnel = %context.tunnel_id, "cloudflared output closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::config::{StartConfig, validate};
    use crate::tunnel::events::NullSink;

    fn provider(binary: &str) -> Box<dyn TunnelProvider> {
        let factory = CloudflareFactory::new(CloudflareSettings {
            binary: binary.to_string(),
            ..CloudflareSettings::default()
        });
        factory.create(ProviderContext::new("t1", Arc::new(NullSink)))
    }

    #[test]
    fn factory_name_is_cloudflare() {
        assert_eq!(CloudflareFactory::default().name(), "cloudflare");
        assert_eq!(
            CloudflareFactory::default().settings().binary,
            "cloudflared"
        );
    }

    #[tokio::test]
    async fn status_without_session_is_stopped() {
        let mut provider = provider("cloudflared");
        assert_eq!(provider.status().await.unwrap(), RuntimeStatus::stopped());
    }

    #[tokio::test]
    async fn stop_without_session_is_noop() {
        let mut provider = provider("cloudflared");
        assert!(provider.stop().await.is_ok());
        assert!(provider.stop().await.is_ok());
    }

    #[tokio::test]
    async fn start_with_missing_binary_is_launch_error() {
        let mut provider = provider("burrow-test-no-such-cloudflared-binary");
        let config =
            validate(&StartConfig::new("a.example.com", "http://localhost:9000", "t")).unwrap();
        let err = provider.start(&config).await.unwrap_err();
        assert!(matches!(err, ProviderError::Launch(msg) if msg.contains("not found")));
    }

    #[tokio::test]
    async fn check_installation_missing_binary() {
        assert!(
            cloudflared::check_installation("burrow-test-no-such-cloudflared-binary")
                .await
                .is_none()
        );
    }
}
