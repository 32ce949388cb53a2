//! Shared connection plumbing for the subcommands

use anyhow::{Context, Result};
use gantry_config::{load_client_config, ClientConfig, ServerConfig};
use gantry_core::RemoteContext;
use remote_exec::{SshConfig, SshSession};

/// Load the client configuration from its default location
pub fn load_config() -> Result<ClientConfig> {
    let path = gantry_config::config_path();
    load_client_config(&path).context("Failed to load client configuration")
}

/// Resolve a server by name (or the default) from the client config
pub fn resolve_server(config: &ClientConfig, name: Option<&str>) -> Result<(String, ServerConfig)> {
    let (name, server) = config.get_server(name)?;
    Ok((name.to_string(), server.clone()))
}

/// Build the SSH settings for a configured server
pub fn ssh_config(server: &ServerConfig) -> SshConfig {
    let mut config = SshConfig::new(&server.host)
        .with_user(&server.ssh_user)
        .with_identity_file(server.ssh_key_path());
    if let Some(port) = server.ssh_port {
        config = config.with_port(port);
    }
    config
}

/// The remote context a server's operations run under
pub fn remote_context(server: &ServerConfig) -> RemoteContext {
    RemoteContext::for_user(&server.ssh_user, server.app_root.as_deref())
}

/// Open a session to the named (or default) server
pub async fn connect(
    config: &ClientConfig,
    name: Option<&str>,
) -> Result<(String, ServerConfig, SshSession)> {
    let (name, server) = resolve_server(config, name)?;
    let session = SshSession::connect(ssh_config(&server))
        .await
        .with_context(|| format!("Failed to connect to server '{}'", name))?;
    Ok((name, server, session))
}
