//! Provider listing and installation checks

use anyhow::Result;
use burrow_core::check_installation;
use burrow_core::providers::CLOUDFLARE;
use clap::Args;

use crate::client::ApiClient;
use crate::config::ConfigLoader;

#[derive(Debug, Args)]
pub struct ProvidersArgs {
    /// Also query a running server for its health and registered providers
    #[arg(long)]
    pub remote: bool,

    /// Server URL (defaults to the configured host and port)
    #[arg(long, env = "BURROW_SERVER")]
    pub server: Option<String>,
}

pub async fn run(args: ProvidersArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let binary = &config.providers.cloudflare.binary;

    match check_installation(binary).await {
        Some(info) => println!(
            "{CLOUDFLARE}: cloudflared {} at {}",
            info.version, info.path
        ),
        None => {
            println!("{CLOUDFLARE}: {binary} not found");
            println!("  Install: https://developers.cloudflare.com/cloudflare-one/connections/connect-networks/downloads/");
        }
    }

    if args.remote {
        let base = args.server.unwrap_or_else(|| config.server_url());
        let client = ApiClient::new(base);
        let health = client.health().await?;
        let providers = client.providers().await?;
        println!();
        println!(
            "Server {} ({}, up {}s, {} tunnel(s))",
            health.version, health.status, health.uptime_seconds, health.tunnel_count
        );
        println!("Registered on server: {}", providers.providers.join(", "));
    }
    Ok(())
}
