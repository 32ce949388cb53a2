//! `gantry env`: inspect project environments

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use super::connect;

/// Environment subcommands
#[derive(Subcommand)]
pub enum EnvCommands {
    /// List environments defined in the project manifest
    List {
        /// Project directory or manifest file
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },

    /// Show the resolved configuration for an environment
    Show {
        /// Environment name
        name: String,
        /// Project directory or manifest file
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },
}

/// Entry point for `gantry env`
pub async fn run(command: EnvCommands) -> Result<()> {
    match command {
        EnvCommands::List { project } => {
            let manifest = gantry_config::load_project_config(&project)?;
            let names = gantry_config::list_environments(&manifest);
            if names.is_empty() {
                println!("No environments defined in gantry.toml.");
                return Ok(());
            }
            for name in names {
                let marker = if name == "production" { " (default)" } else { "" };
                println!("{}{}", name, marker);
            }
            Ok(())
        }

        EnvCommands::Show { name, project } => {
            let manifest = gantry_config::load_project_config(&project)?;
            let config = connect::load_config()?;
            let env = gantry_config::resolve_environment(&manifest, &name, &config.defaults)?;

            println!("environment: {}", env.name);
            println!("app name:    {}", env.app_name);
            let fields = [
                ("server", env.server.as_deref()),
                ("method", env.method.as_deref()),
                ("url", env.url.as_deref()),
                ("source", env.source.as_deref()),
                ("command", env.command.as_deref()),
                ("branch", env.branch.as_deref()),
            ];
            for (label, value) in fields {
                if let Some(value) = value {
                    println!("{}:{}{}", label, " ".repeat(12 - label.len()), value);
                }
            }
            if let Some(port) = env.port {
                println!("port:        {}", port);
            }
            if let Some(port) = env.container_port {
                println!("container:   {}", port);
            }
            if !env.env.is_empty() {
                println!("env:");
                for (key, value) in &env.env {
                    println!("  {}={}", key, value);
                }
            }
            if !env.exclude.is_empty() {
                println!("exclude:     {}", env.exclude.join(", "));
            }
            if !env.volumes.is_empty() {
                println!("volumes:     {}", env.volumes.join(", "));
            }
            Ok(())
        }
    }
}
