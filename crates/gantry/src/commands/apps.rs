//! `gantry apps`: manage deployed applications

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::Table;
use gantry_core::{DefaultSourceTransfer, Orchestrator};

use super::connect;

/// Application management subcommands
#[derive(Subcommand)]
pub enum AppsCommands {
    /// List deployed applications with live status
    List,

    /// Show detailed status for an application
    Status {
        /// Application name
        name: String,
    },

    /// Start an application
    Start {
        /// Application name
        name: String,
    },

    /// Stop an application
    Stop {
        /// Application name
        name: String,
    },

    /// Restart an application
    Restart {
        /// Application name
        name: String,
    },

    /// Show recent application logs
    Logs {
        /// Application name
        name: String,
        /// Number of log lines
        #[arg(short = 'n', long, default_value_t = 50)]
        lines: u32,
    },

    /// Redeploy an application from its recorded source
    Redeploy {
        /// Application name
        name: String,
    },

    /// Remove an application and its resources
    Remove {
        /// Application name
        name: String,
        /// Keep the app's data/ directory
        #[arg(long)]
        keep_data: bool,
    },
}

/// Entry point for `gantry apps`
pub async fn run(command: AppsCommands, server: Option<&str>) -> Result<()> {
    let config = connect::load_config()?;
    let (_, srv, session) = connect::connect(&config, server).await?;
    let transfer = DefaultSourceTransfer::new(&session, connect::ssh_config(&srv));
    let orchestrator = Orchestrator::new(&session, &transfer, connect::remote_context(&srv));

    let result = dispatch(command, &orchestrator).await;
    session.close().await;
    result
}

async fn dispatch(command: AppsCommands, orchestrator: &Orchestrator<'_>) -> Result<()> {
    match command {
        AppsCommands::List => {
            let apps = orchestrator.list_with_status().await?;
            if apps.is_empty() {
                println!("No applications deployed.");
                return Ok(());
            }
            let mut table = Table::new();
            table.set_header(["Name", "Method", "URL", "Port", "Status"]);
            for app in apps {
                table.add_row([
                    app.name,
                    app.method.to_string(),
                    app.url,
                    app.port.map(|p| p.to_string()).unwrap_or_default(),
                    app.status.unwrap_or_default(),
                ]);
            }
            println!("{}", table);
            Ok(())
        }

        AppsCommands::Status { name } => {
            let status = orchestrator.status(&name).await?;
            println!("{}", status.name);
            println!("  method:  {}", status.method);
            println!("  url:     https://{}", status.url);
            if let Some(port) = status.port {
                println!("  port:    {}", port);
            }
            println!("  status:  {}", status.status);
            if let Some(source) = &status.source {
                println!("  source:  {}", source);
            }
            println!("  created: {}", status.created_at.to_rfc3339());
            println!("  updated: {}", status.updated_at.to_rfc3339());
            Ok(())
        }

        AppsCommands::Start { name } => {
            orchestrator.start(&name).await?;
            println!("Started '{}'.", name);
            Ok(())
        }

        AppsCommands::Stop { name } => {
            orchestrator.stop(&name).await?;
            println!("Stopped '{}'.", name);
            Ok(())
        }

        AppsCommands::Restart { name } => {
            orchestrator.restart(&name).await?;
            println!("Restarted '{}'.", name);
            Ok(())
        }

        AppsCommands::Logs { name, lines } => {
            let logs = orchestrator
                .logs(&name, lines)
                .await
                .context("Failed to fetch logs")?;
            print!("{}", logs);
            Ok(())
        }

        AppsCommands::Redeploy { name } => {
            println!("Redeploying '{}'...", name);
            let record = orchestrator.redeploy(&name).await?;
            println!("Redeployed '{}' at https://{}", record.name, record.url);
            Ok(())
        }

        AppsCommands::Remove { name, keep_data } => {
            orchestrator.remove(&name, keep_data).await?;
            if keep_data {
                println!("Removed '{}' (data/ kept).", name);
            } else {
                println!("Removed '{}'.", name);
            }
            Ok(())
        }
    }
}
