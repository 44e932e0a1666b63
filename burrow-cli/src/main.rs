use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod client;
mod commands;
mod config;

#[derive(Parser)]
#[command(name = "burrow", about = "Supervised public tunnels for local services")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config(commands::config::ConfigArgs),
    /// List tunnel providers and check their installation
    Providers(commands::providers::ProvidersArgs),
    /// Run the burrow API server
    Serve(commands::serve::ServeArgs),
    /// Manage tunnels on a running server
    Tunnel(commands::tunnel::TunnelArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose when set
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Config(args) => commands::config::run(args),
        Commands::Providers(args) => commands::providers::run(args).await,
        Commands::Serve(args) => commands::serve::run(args).await,
        Commands::Tunnel(args) => commands::tunnel::run(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn verbose_is_global() {
        let cli = Cli::parse_from(["burrow", "config", "show", "--verbose"]);
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Config(_)));
    }
}
