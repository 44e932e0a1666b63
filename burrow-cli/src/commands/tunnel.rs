//! Tunnel management commands

use std::time::Duration;

use anyhow::{Result, bail};
use burrow_core::TunnelState;
use burrow_core::providers::CLOUDFLARE;
use burrow_server::http::{CreateTunnelRequest, TunnelView};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};

use crate::client::ApiClient;
use crate::config::ConfigLoader;

const WAIT_POLL: Duration = Duration::from_millis(500);

/// Arguments for the tunnel command
#[derive(Debug, Args)]
pub struct TunnelArgs {
    /// Server URL (defaults to the configured host and port)
    #[arg(long, global = true, env = "BURROW_SERVER")]
    pub server: Option<String>,

    #[command(subcommand)]
    pub command: TunnelCommand,
}

/// Tunnel subcommands
#[derive(Debug, Subcommand)]
pub enum TunnelCommand {
    /// Create and start a tunnel
    Start(StartArgs),
    /// Stop a tunnel and remove it
    Stop { id: String },
    /// Show one tunnel
    Status {
        id: String,
        /// Print the raw JSON snapshot
        #[arg(long)]
        json: bool,
    },
    /// List all tunnels
    List {
        #[arg(long)]
        json: bool,
    },
    /// Restart a stopped or failed tunnel
    Restart { id: String },
}

#[derive(Debug, Args)]
pub struct StartArgs {
    /// Public hostname, e.g. app.example.com
    #[arg(long)]
    pub hostname: String,

    /// Local service URL, e.g. http://localhost:3000
    #[arg(long)]
    pub local: String,

    /// Provider credential
    #[arg(long, env = "BURROW_AUTH_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Tunnel provider
    #[arg(long, default_value = CLOUDFLARE)]
    pub provider: String,

    /// Wait up to this many seconds for the tunnel to be running
    #[arg(long, value_name = "SECS")]
    pub wait: Option<u64>,
}

/// Run the tunnel command
pub async fn run(args: TunnelArgs) -> Result<()> {
    let base = match args.server {
        Some(url) => url,
        None => ConfigLoader::load()?.server_url(),
    };
    let client = ApiClient::new(base);

    match args.command {
        TunnelCommand::Start(start) => run_start(&client, start).await,
        TunnelCommand::Stop { id } => run_stop(&client, &id).await,
        TunnelCommand::Status { id, json } => run_status(&client, &id, json).await,
        TunnelCommand::List { json } => run_list(&client, json).await,
        TunnelCommand::Restart { id } => run_restart(&client, &id).await,
    }
}

async fn run_start(client: &ApiClient, args: StartArgs) -> Result<()> {
    let request = CreateTunnelRequest {
        provider: args.provider,
        public_hostname: args.hostname,
        local_addr: args.local,
        auth_token: args.token,
    };
    let created = client.create_tunnel(&request).await?;
    println!("Tunnel {} created", created.tunnel_id);

    if let Some(secs) = args.wait {
        let view = wait_until_running(client, &created.tunnel_id, Duration::from_secs(secs)).await?;
        print_tunnel(&view);
    }
    Ok(())
}

async fn wait_until_running(client: &ApiClient, id: &str, limit: Duration) -> Result<TunnelView> {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let view = client.get_tunnel(id).await?;
        if view.state == TunnelState::Running {
            return Ok(view);
        }
        if tokio::time::Instant::now() >= deadline {
            let detail = view
                .status
                .error
                .map(|e| format!(": {e}"))
                .unwrap_or_default();
            bail!(
                "Tunnel {} is still {} after {:?}{}",
                id,
                view.state,
                limit,
                detail
            );
        }
        tokio::time::sleep(WAIT_POLL).await;
    }
}

async fn run_stop(client: &ApiClient, id: &str) -> Result<()> {
    let accepted = client.delete_tunnel(id).await?;
    println!(
        "Stopping tunnel {} (was {})",
        accepted.tunnel_id, accepted.state
    );
    Ok(())
}

async fn run_status(client: &ApiClient, id: &str, json: bool) -> Result<()> {
    let view = client.get_tunnel(id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print_tunnel(&view);
    }
    Ok(())
}

async fn run_list(client: &ApiClient, json: bool) -> Result<()> {
    let list = client.list_tunnels().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }
    if list.tunnels.is_empty() {
        println!("No tunnels.");
        return Ok(());
    }
    println!("{}", tunnel_table(&list.tunnels));
    Ok(())
}

async fn run_restart(client: &ApiClient, id: &str) -> Result<()> {
    let accepted = client.restart_tunnel(id).await?;
    println!("Tunnel {} is {}", accepted.tunnel_id, accepted.state);
    Ok(())
}

fn print_tunnel(view: &TunnelView) {
    println!("Tunnel:     {}", view.id);
    println!("Provider:   {}", view.provider);
    println!("Hostname:   {}", view.public_hostname);
    println!("Local:      {}", view.local_addr);
    println!("State:      {}", view.state);
    if let Some(url) = &view.status.public_url {
        println!("URL:        {url}");
    }
    if view.status.pid != 0 {
        println!("PID:        {}", view.status.pid);
    }
    if view.retry_count > 0 {
        println!("Retries:    {}", view.retry_count);
    }
    if let Some(error) = &view.status.error {
        println!("Error:      {error}");
    }
    println!("Since:      {}", view.last_transition_at.to_rfc3339());
}

fn state_color(state: TunnelState) -> Color {
    match state {
        TunnelState::Running => Color::Green,
        TunnelState::Starting | TunnelState::Stopping => Color::Yellow,
        TunnelState::Error => Color::Red,
        TunnelState::Stopped => Color::Grey,
    }
}

fn tunnel_table(tunnels: &[TunnelView]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::Cyan),
        Cell::new("Provider").fg(Color::Cyan),
        Cell::new("Hostname").fg(Color::Cyan),
        Cell::new("Local").fg(Color::Cyan),
        Cell::new("State").fg(Color::Cyan),
        Cell::new("Retries").fg(Color::Cyan),
    ]);

    for tunnel in tunnels {
        table.add_row(vec![
            Cell::new(&tunnel.id),
            Cell::new(&tunnel.provider),
            Cell::new(&tunnel.public_hostname),
            Cell::new(&tunnel.local_addr),
            Cell::new(tunnel.state).fg(state_color(tunnel.state)),
            Cell::new(tunnel.retry_count),
        ]);
    }
    table
}
