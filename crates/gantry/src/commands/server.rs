//! `gantry server`: manage server entries and bootstrap hosts

use anyhow::{bail, Result};
use clap::Subcommand;
use comfy_table::Table;
use gantry_config::{save_client_config, InitConfig, ServerConfig};
use gantry_core::{init_server, ping, InitOptions};

use super::connect;

/// Server management subcommands
#[derive(Subcommand)]
pub enum ServerCommands {
    /// Add a server to the configuration
    Add {
        /// Name for this server
        name: String,
        /// Server IP or hostname
        #[arg(long)]
        host: String,
        /// Base domain for applications
        #[arg(long)]
        domain: String,
        /// SSH user
        #[arg(long, default_value = "root")]
        ssh_user: String,
        /// Path to the SSH private key
        #[arg(long, default_value = "~/.ssh/id_ed25519")]
        ssh_key: String,
        /// SSH port
        #[arg(long)]
        ssh_port: Option<u16>,
        /// Remote state root
        #[arg(long)]
        app_root: Option<String>,
    },

    /// List configured servers
    List,

    /// Remove a server from the configuration
    Remove {
        /// Name of the server to remove
        name: String,
    },

    /// Set the default server
    Default {
        /// Name of the server to set as default
        name: String,
    },

    /// Initialise a host for gantry (packages, Caddy, state files)
    Init {
        /// Bootstrap steps to skip
        #[arg(long = "skip")]
        skip: Vec<String>,
    },

    /// Test SSH connectivity to a server
    Ping,
}

/// Entry point for `gantry server`
pub async fn run(command: ServerCommands, server: Option<&str>) -> Result<()> {
    match command {
        ServerCommands::Add {
            name,
            host,
            domain,
            ssh_user,
            ssh_key,
            ssh_port,
            app_root,
        } => {
            let mut config = connect::load_config()?;
            config.servers.insert(
                name.clone(),
                ServerConfig {
                    host,
                    ssh_user,
                    ssh_key,
                    domain,
                    ssh_port,
                    app_root,
                    init: InitConfig::default(),
                },
            );
            if config.default_server.is_none() {
                config.default_server = Some(name.clone());
            }
            save_client_config(&config, &gantry_config::config_path())?;
            println!("Server '{}' added.", name);
            Ok(())
        }

        ServerCommands::List => {
            let config = connect::load_config()?;
            if config.servers.is_empty() {
                println!("No servers configured.");
                return Ok(());
            }
            let mut table = Table::new();
            table.set_header(["Name", "Host", "Domain", "Default"]);
            for (name, srv) in &config.servers {
                let default = if config.default_server.as_deref() == Some(name) {
                    "*"
                } else {
                    ""
                };
                table.add_row([name.as_str(), srv.host.as_str(), srv.domain.as_str(), default]);
            }
            println!("{}", table);
            Ok(())
        }

        ServerCommands::Remove { name } => {
            let mut config = connect::load_config()?;
            if config.servers.remove(&name).is_none() {
                bail!("Server '{}' not found.", name);
            }
            if config.default_server.as_deref() == Some(name.as_str()) {
                config.default_server = config.servers.keys().next().cloned();
            }
            save_client_config(&config, &gantry_config::config_path())?;
            println!("Server '{}' removed.", name);
            Ok(())
        }

        ServerCommands::Default { name } => {
            let mut config = connect::load_config()?;
            if !config.servers.contains_key(&name) {
                bail!("Server '{}' not found.", name);
            }
            config.default_server = Some(name.clone());
            save_client_config(&config, &gantry_config::config_path())?;
            println!("Default server set to '{}'.", name);
            Ok(())
        }

        ServerCommands::Init { skip } => {
            let config = connect::load_config()?;
            let (name, srv, session) = connect::connect(&config, server).await?;
            let ctx = connect::remote_context(&srv);
            let mut opts = InitOptions { skip };
            opts.skip.extend(srv.init.skip.iter().cloned());
            println!("Initialising server '{}' ({})...", name, srv.host);
            let result = init_server(&session, &ctx, &opts).await;
            session.close().await;
            result?;
            println!("Server '{}' initialised.", name);
            Ok(())
        }

        ServerCommands::Ping => {
            let config = connect::load_config()?;
            let (name, _, session) = connect::connect(&config, server).await?;
            let reachable = ping(&session).await;
            session.close().await;
            if reachable {
                println!("Server '{}' is reachable.", name);
                Ok(())
            } else {
                bail!("Server '{}' is not reachable.", name);
            }
        }
    }
}
