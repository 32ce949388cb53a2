//! `gantry tunnel`: expose a local port through the server

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::Table;
use gantry_core::TunnelManager;

use super::connect;

/// Tunnel subcommands
#[derive(Subcommand)]
pub enum TunnelCommands {
    /// Open a tunnel and block until interrupted
    Open {
        /// Local port to expose
        local_port: u16,
        /// Public URL (subdomain) to serve it under
        url: String,
    },

    /// Close a tunnel by id (remote cleanup only)
    Close {
        /// Tunnel id
        id: String,
    },

    /// List active tunnels
    List,

    /// Clean up tunnels whose connections are dead
    Cleanup,
}

/// Entry point for `gantry tunnel`
pub async fn run(command: TunnelCommands, server: Option<&str>) -> Result<()> {
    let config = connect::load_config()?;
    let (_, srv, session) = connect::connect(&config, server).await?;
    let manager = TunnelManager::new(&session, connect::remote_context(&srv));

    let result = dispatch(command, &manager, &srv).await;
    session.close().await;
    result
}

async fn dispatch(
    command: TunnelCommands,
    manager: &TunnelManager<'_>,
    srv: &gantry_config::ServerConfig,
) -> Result<()> {
    match command {
        TunnelCommands::Open { local_port, url } => {
            // Interrupts flip the flag; the manager tears the tunnel down
            let stop = Arc::new(AtomicBool::new(false));
            signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))
                .context("Failed to install SIGINT handler")?;
            signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))
                .context("Failed to install SIGTERM handler")?;

            println!("Opening tunnel: https://{} -> localhost:{}", url, local_port);
            println!("Press Ctrl+C to close.");
            let info = manager
                .open(&connect::ssh_config(srv), local_port, &url, stop)
                .await?;
            println!("Tunnel '{}' closed.", info.id);
            Ok(())
        }

        TunnelCommands::Close { id } => {
            manager.close(&id).await?;
            println!("Tunnel '{}' closed.", id);
            Ok(())
        }

        TunnelCommands::List => {
            let tunnels = manager.list().await?;
            if tunnels.is_empty() {
                println!("No active tunnels.");
                return Ok(());
            }
            let mut table = Table::new();
            table.set_header(["Id", "URL", "Local", "Remote", "Opened"]);
            for tunnel in tunnels {
                table.add_row([
                    tunnel.id,
                    tunnel.url,
                    tunnel.local_port.to_string(),
                    tunnel.remote_port.to_string(),
                    tunnel.created_at.to_rfc3339(),
                ]);
            }
            println!("{}", table);
            Ok(())
        }

        TunnelCommands::Cleanup => {
            let cleaned = manager.cleanup_stale().await?;
            if cleaned.is_empty() {
                println!("No stale tunnels.");
            } else {
                for id in cleaned {
                    println!("Cleaned up '{}'.", id);
                }
            }
            Ok(())
        }
    }
}
