use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};

use super::types::{
    BurrowConfig, CloudflareSection, DEFAULT_HOST, DEFAULT_PORT, ProvidersSection,
    RawBurrowConfig, RawCloudflareConfig, RawProvidersConfig, RawRetryConfig, RawServerConfig,
    RawSupervisorConfig, RetrySection, ServerSection, SupervisorSection,
};

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load merged configuration (user + project)
    pub fn load() -> Result<BurrowConfig> {
        Self::load_from(&[Self::user_config_path(), Self::project_config_path()])
    }

    /// Load and merge `paths` in order; later files override earlier ones
    ///
    /// Missing files are skipped.
    pub fn load_from(paths: &[PathBuf]) -> Result<BurrowConfig> {
        let mut raw = RawBurrowConfig::default();
        for path in paths {
            if let Some(layer) = Self::read_raw(path)? {
                raw = Self::merge_raw(raw, layer);
            }
        }

        let config = Self::finalize(raw);
        Self::check(&config)?;
        Ok(config)
    }

    pub fn user_config_path() -> PathBuf {
        burrow_paths::user_config_file()
    }

    /// Project config path, overridable with `BURROW_PROJECT_CONFIG_DIR`
    pub fn project_config_path() -> PathBuf {
        burrow_paths::project_config_file()
    }

    fn read_raw(path: &Path) -> Result<Option<RawBurrowConfig>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let raw = toml::from_str(&contents)
            .with_context(|| format!("Invalid config in {}", path.display()))?;
        Ok(Some(raw))
    }

    /// Merge two raw configs (overlay values override base only if explicitly set)
    fn merge_raw(base: RawBurrowConfig, overlay: RawBurrowConfig) -> RawBurrowConfig {
        RawBurrowConfig {
            server: RawServerConfig {
                host: overlay.server.host.or(base.server.host),
                port: overlay.server.port.or(base.server.port),
            },
            supervisor: RawSupervisorConfig {
                poll_interval_ms: overlay
                    .supervisor
                    .poll_interval_ms
                    .or(base.supervisor.poll_interval_ms),
                call_timeout_ms: overlay
                    .supervisor
                    .call_timeout_ms
                    .or(base.supervisor.call_timeout_ms),
                start_timeout_ms: overlay
                    .supervisor
                    .start_timeout_ms
                    .or(base.supervisor.start_timeout_ms),
                stop_attempts: overlay
                    .supervisor
                    .stop_attempts
                    .or(base.supervisor.stop_attempts),
                shutdown_grace_ms: overlay
                    .supervisor
                    .shutdown_grace_ms
                    .or(base.supervisor.shutdown_grace_ms),
            },
            retry: RawRetryConfig {
                initial_backoff_ms: overlay
                    .retry
                    .initial_backoff_ms
                    .or(base.retry.initial_backoff_ms),
                max_backoff_ms: overlay.retry.max_backoff_ms.or(base.retry.max_backoff_ms),
                max_retries: overlay.retry.max_retries.or(base.retry.max_retries),
            },
            providers: RawProvidersConfig {
                cloudflare: RawCloudflareConfig {
                    binary: overlay
                        .providers
                        .cloudflare
                        .binary
                        .or(base.providers.cloudflare.binary),
                    stop_timeout_ms: overlay
                        .providers
                        .cloudflare
                        .stop_timeout_ms
                        .or(base.providers.cloudflare.stop_timeout_ms),
                },
            },
        }
    }

    /// Convert raw config to final config with defaults applied
    fn finalize(raw: RawBurrowConfig) -> BurrowConfig {
        let supervisor = SupervisorSection::default();
        let retry = RetrySection::default();
        let cloudflare = CloudflareSection::default();

        BurrowConfig {
            server: ServerSection {
                host: raw.server.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
                port: raw.server.port.unwrap_or(DEFAULT_PORT),
            },
            supervisor: SupervisorSection {
                poll_interval_ms: raw
                    .supervisor
                    .poll_interval_ms
                    .unwrap_or(supervisor.poll_interval_ms),
                call_timeout_ms: raw
                    .supervisor
                    .call_timeout_ms
                    .unwrap_or(supervisor.call_timeout_ms),
                start_timeout_ms: raw
                    .supervisor
                    .start_timeout_ms
                    .unwrap_or(supervisor.start_timeout_ms),
                stop_attempts: raw
                    .supervisor
                    .stop_attempts
                    .unwrap_or(supervisor.stop_attempts),
                shutdown_grace_ms: raw
                    .supervisor
                    .shutdown_grace_ms
                    .unwrap_or(supervisor.shutdown_grace_ms),
            },
            retry: RetrySection {
                initial_backoff_ms: raw
                    .retry
                    .initial_backoff_ms
                    .unwrap_or(retry.initial_backoff_ms),
                max_backoff_ms: raw.retry.max_backoff_ms.unwrap_or(retry.max_backoff_ms),
                max_retries: raw.retry.max_retries.unwrap_or(retry.max_retries),
            },
            providers: ProvidersSection {
                cloudflare: CloudflareSection {
                    binary: raw
                        .providers
                        .cloudflare
                        .binary
                        .unwrap_or(cloudflare.binary),
                    stop_timeout_ms: raw
                        .providers
                        .cloudflare
                        .stop_timeout_ms
                        .unwrap_or(cloudflare.stop_timeout_ms),
                },
            },
        }
    }

    fn check(config: &BurrowConfig) -> Result<()> {
        ensure!(
            config.supervisor.poll_interval_ms > 0,
            "supervisor.poll_interval_ms must be greater than 0"
        );
        ensure!(
            config.supervisor.call_timeout_ms > 0,
            "supervisor.call_timeout_ms must be greater than 0"
        );
        ensure!(
            config.supervisor.stop_attempts > 0,
            "supervisor.stop_attempts must be at least 1"
        );
        ensure!(
            config.retry.initial_backoff_ms <= config.retry.max_backoff_ms,
            "retry.initial_backoff_ms must not exceed retry.max_backoff_ms"
        );
        ensure!(
            !config.providers.cloudflare.binary.trim().is_empty(),
            "providers.cloudflare.binary must not be empty"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_files_give_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigLoader::load_from(&[dir.path().join("nope.toml")]).unwrap();
        assert_eq!(config, BurrowConfig::default());
    }

    #[test]
    fn project_layer_overrides_user_layer() {
        let dir = TempDir::new().unwrap();
        let user = write(
            &dir,
            "user.toml",
            "[server]\nport = 9000\nhost = \"0.0.0.0\"\n\n[retry]\nmax_retries = 2\n",
        );
        let project = write(&dir, "project.toml", "[server]\nport = 9100\n");

        let config = ConfigLoader::load_from(&[user, project]).unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.retry.max_retries, 2);
        assert_eq!(config.supervisor.poll_interval_ms, 5_000);
    }

    #[test]
    fn provider_binary_is_configurable() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "config.toml",
            "[providers.cloudflare]\nbinary = \"/usr/local/bin/cloudflared\"\n",
        );

        let config = ConfigLoader::load_from(&[path]).unwrap();
        assert_eq!(
            config.cloudflare_settings().binary,
            "/usr/local/bin/cloudflared"
        );
    }

    #[test]
    fn invalid_toml_names_the_file() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "broken.toml", "[server\nport = ");

        let err = ConfigLoader::load_from(&[path]).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "config.toml", "[supervisor]\npoll_interval_ms = 0\n");

        let err = ConfigLoader::load_from(&[path]).unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "config.toml",
            "[retry]\ninitial_backoff_ms = 5000\nmax_backoff_ms = 1000\n",
        );

        assert!(ConfigLoader::load_from(&[path]).is_err());
    }

    #[test]
    fn finalized_config_round_trips_through_toml() {
        let config = BurrowConfig::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        assert!(rendered.contains("poll_interval_ms = 5000"));
        let parsed: BurrowConfig = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
