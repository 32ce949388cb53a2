//! `gantry config`: view the client configuration

use anyhow::Result;
use clap::Subcommand;

/// Configuration subcommands
#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Print the current configuration file
    Show,
}

/// Entry point for `gantry config`
pub async fn run(command: ConfigCommands) -> Result<()> {
    match command {
        ConfigCommands::Show => {
            let path = gantry_config::config_path();
            if !path.exists() {
                println!("No configuration file found at {}.", path.display());
                return Ok(());
            }
            print!("{}", std::fs::read_to_string(&path)?);
            Ok(())
        }
    }
}
