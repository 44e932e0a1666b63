//! Run the burrow API server with its tunnel supervisor

use std::sync::Arc;

use anyhow::Result;
use burrow_core::providers::{CloudflareFactory, MockProviderFactory};
use burrow_core::{BroadcastSink, LogLevel, ProviderRegistry, TunnelEvent, TunnelRegistry};
use burrow_server::BurrowServer;
use clap::Args;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::config::{BurrowConfig, ConfigLoader};

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Port to listen on (overrides config)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Host to bind to (overrides config)
    #[arg(long)]
    pub host: Option<String>,

    /// Also register the in-memory `mock` provider
    #[arg(long)]
    pub mock: bool,
}

pub async fn run(args: ServeArgs) -> Result<()> {
    let mut config = ConfigLoader::load()?;
    apply_overrides(&mut config, &args);

    let mut providers =
        ProviderRegistry::new().with(Arc::new(CloudflareFactory::new(config.cloudflare_settings())));
    if args.mock {
        providers.register(Arc::new(MockProviderFactory::new()));
    }

    let sink = Arc::new(BroadcastSink::default());
    forward_events(&sink);

    let registry = Arc::new(TunnelRegistry::new(
        providers,
        config.supervisor_config(),
        sink,
    ));
    info!(
        "Starting burrow server on {}:{} (providers: {})",
        config.server.host,
        config.server.port,
        registry.providers().names().join(", ")
    );

    let server = BurrowServer::new(config.server_config(), registry);
    server.run(shutdown_signal()).await?;
    Ok(())
}

fn apply_overrides(config: &mut BurrowConfig, args: &ServeArgs) {
    if let Some(host) = &args.host {
        config.server.host = host.clone();
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
}

/// Mirror provider log lines into the process log
fn forward_events(sink: &BroadcastSink) {
    let mut rx = sink.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(TunnelEvent::Log { id, level, message }) => match level {
                    LogLevel::Debug | LogLevel::Info => debug!(tunnel = %id, "{}", message),
                    LogLevel::Warn => warn!(tunnel = %id, "{}", message),
                    LogLevel::Error => error!(tunnel = %id, "{}", message),
                },
                Ok(TunnelEvent::Transition { .. }) => {}
                Err(RecvError::Lagged(count)) => {
                    warn!("Event forwarding lagged by {} events", count);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down, stopping all tunnels");
}
