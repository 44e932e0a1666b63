use std::time::Duration;

use burrow_core::providers::CloudflareSettings;
use burrow_core::{RetryPolicy, SupervisorConfig};
use serde::{Deserialize, Serialize};

/// Default host for the burrow server
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default port for the burrow server
pub const DEFAULT_PORT: u16 = 7843;

/// Configuration as stored in TOML files (with optional fields for merging)
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawBurrowConfig {
    #[serde(default)]
    pub server: RawServerConfig,
    #[serde(default)]
    pub supervisor: RawSupervisorConfig,
    #[serde(default)]
    pub retry: RawRetryConfig,
    #[serde(default)]
    pub providers: RawProvidersConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawSupervisorConfig {
    pub poll_interval_ms: Option<u64>,
    pub call_timeout_ms: Option<u64>,
    pub start_timeout_ms: Option<u64>,
    pub stop_attempts: Option<u32>,
    pub shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawRetryConfig {
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawProvidersConfig {
    #[serde(default)]
    pub cloudflare: RawCloudflareConfig,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawCloudflareConfig {
    pub binary: Option<String>,
    pub stop_timeout_ms: Option<u64>,
}

/// Final configuration with defaults applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BurrowConfig {
    pub server: ServerSection,
    pub supervisor: SupervisorSection,
    pub retry: RetrySection,
    pub providers: ProvidersSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSection {
    pub poll_interval_ms: u64,
    pub call_timeout_ms: u64,
    pub start_timeout_ms: u64,
    pub stop_attempts: u32,
    pub shutdown_grace_ms: u64,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 5_000,
            call_timeout_ms: 10_000,
            start_timeout_ms: 30_000,
            stop_attempts: 3,
            shutdown_grace_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySection {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub max_retries: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            max_retries: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProvidersSection {
    pub cloudflare: CloudflareSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudflareSection {
    pub binary: String,
    pub stop_timeout_ms: u64,
}

impl Default for CloudflareSection {
    fn default() -> Self {
        Self {
            binary: "cloudflared".to_string(),
            stop_timeout_ms: 5_000,
        }
    }
}

impl BurrowConfig {
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            poll_interval: Duration::from_millis(self.supervisor.poll_interval_ms),
            call_timeout: Duration::from_millis(self.supervisor.call_timeout_ms),
            start_timeout: Duration::from_millis(self.supervisor.start_timeout_ms),
            stop_attempts: self.supervisor.stop_attempts,
            retry: RetryPolicy::new(
                Duration::from_millis(self.retry.initial_backoff_ms),
                Duration::from_millis(self.retry.max_backoff_ms),
                self.retry.max_retries,
            ),
        }
    }

    pub fn server_config(&self) -> burrow_server::ServerConfig {
        burrow_server::ServerConfig {
            host: self.server.host.clone(),
            port: self.server.port,
            shutdown_grace: Duration::from_millis(self.supervisor.shutdown_grace_ms),
        }
    }

    pub fn cloudflare_settings(&self) -> CloudflareSettings {
        CloudflareSettings {
            binary: self.providers.cloudflare.binary.clone(),
            stop_timeout: Duration::from_millis(self.providers.cloudflare.stop_timeout_ms),
        }
    }

    /// Base URL clients use to reach the configured server
    pub fn server_url(&self) -> String {
        let host = match self.server.host.as_str() {
            "0.0.0.0" => "127.0.0.1",
            "::" => "[::1]",
            other => other,
        };
        format!("http://{}:{}", host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = BurrowConfig::default();
        assert_eq!(config.server.port, DEFAULT_PORT);
        assert_eq!(config.supervisor.poll_interval_ms, 5_000);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.providers.cloudflare.binary, "cloudflared");
    }

    #[test]
    fn default_supervisor_config_matches_core_defaults() {
        assert_eq!(
            BurrowConfig::default().supervisor_config(),
            SupervisorConfig::default()
        );
    }

    #[test]
    fn raw_config_partial_parsing() {
        let raw: RawBurrowConfig = toml::from_str(
            r#"
[supervisor]
poll_interval_ms = 250

[providers.cloudflare]
binary = "/opt/bin/cloudflared"
"#,
        )
        .unwrap();

        assert_eq!(raw.supervisor.poll_interval_ms, Some(250));
        assert!(raw.supervisor.call_timeout_ms.is_none());
        assert!(raw.server.port.is_none());
        assert_eq!(
            raw.providers.cloudflare.binary.as_deref(),
            Some("/opt/bin/cloudflared")
        );
    }

    #[test]
    fn server_url_maps_wildcard_to_loopback() {
        let mut config = BurrowConfig::default();
        config.server.host = "0.0.0.0".to_string();
        config.server.port = 9000;
        assert_eq!(config.server_url(), "http://127.0.0.1:9000");
    }
}
