//! gantry: deploy web applications to a single VPS over SSH

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Deploy and manage applications on a remote host")]
#[command(version)]
struct Cli {
    /// Server name from the configuration (default server if omitted)
    #[arg(short, long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage servers
    Server {
        #[command(subcommand)]
        command: commands::server::ServerCommands,
    },

    /// View client configuration
    Config {
        #[command(subcommand)]
        command: commands::config::ConfigCommands,
    },

    /// Deploy an application
    Deploy(commands::deploy::DeployArgs),

    /// Manage deployed applications
    Apps {
        #[command(subcommand)]
        command: commands::apps::AppsCommands,
    },

    /// Inspect project environments
    Env {
        #[command(subcommand)]
        command: commands::env::EnvCommands,
    },

    /// Expose a local port through the server
    Tunnel {
        #[command(subcommand)]
        command: commands::tunnel::TunnelCommands,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    smol::block_on(async {
        let cli = Cli::parse();
        let server = cli.server.as_deref();

        match cli.command {
            Commands::Server { command } => commands::server::run(command, server).await,
            Commands::Config { command } => commands::config::run(command).await,
            Commands::Deploy(args) => commands::deploy::run(args, server).await,
            Commands::Apps { command } => commands::apps::run(command, server).await,
            Commands::Env { command } => commands::env::run(command).await,
            Commands::Tunnel { command } => commands::tunnel::run(command, server).await,
        }
    })
}
