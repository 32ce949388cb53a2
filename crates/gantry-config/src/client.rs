//! Client-side configuration
//!
//! Server definitions and cross-project defaults live in
//! `~/.config/gantry/config.toml`, saved with mode 0600 since server
//! entries reference private key paths.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Per-server bootstrap step configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InitConfig {
    /// Bootstrap step names to skip for this server
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip: Vec<String>,
}

/// Configuration for a single server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Hostname or IP address
    pub host: String,
    /// SSH user
    pub ssh_user: String,
    /// Path to the SSH private key, `~` expanded on use
    pub ssh_key: String,
    /// Base domain for applications on this server
    pub domain: String,
    /// SSH port, when not 22
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_port: Option<u16>,
    /// Remote state root, when not the default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_root: Option<String>,
    /// Bootstrap step configuration
    #[serde(default, skip_serializing_if = "is_default_init")]
    pub init: InitConfig,
}

fn is_default_init(init: &InitConfig) -> bool {
    init.skip.is_empty()
}

impl ServerConfig {
    /// Whether remote privileged operations need sudo on this server
    pub fn needs_sudo(&self) -> bool {
        self.ssh_user != "root"
    }

    /// The SSH key path with a leading `~` expanded
    pub fn ssh_key_path(&self) -> PathBuf {
        if let Some(rest) = self.ssh_key.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        PathBuf::from(&self.ssh_key)
    }
}

/// Top-level client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name of the server used when none is specified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_server: Option<String>,
    /// Configured servers by name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub servers: BTreeMap<String, ServerConfig>,
    /// Cross-project deployment defaults, the global cascade layer
    #[serde(default, skip_serializing_if = "toml::value::Table::is_empty")]
    pub defaults: toml::value::Table,
}

impl ClientConfig {
    /// Look up a server by name, falling back to the default server
    pub fn get_server(&self, name: Option<&str>) -> Result<(&str, &ServerConfig)> {
        let name = match name.or(self.default_server.as_deref()) {
            Some(n) => n,
            None => return Err(ConfigError::NoDefaultServer),
        };
        match self.servers.get_key_value(name) {
            Some((key, server)) => Ok((key.as_str(), server)),
            None => Err(ConfigError::ServerNotFound(name.to_string())),
        }
    }
}

/// Return the path to the client config file
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("gantry")
        .join("config.toml")
}

/// Load the client configuration; a missing file yields the empty config
pub fn load_client_config(path: &Path) -> Result<ClientConfig> {
    if !path.exists() {
        return Ok(ClientConfig::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    toml::from_str(&raw).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        source: e,
    })
}

/// Write the client configuration with restrictive permissions
pub fn save_client_config(config: &ClientConfig, path: &Path) -> Result<()> {
    let io_err = |e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    let raw = toml::to_string_pretty(config)?;
    std::fs::write(path, raw).map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(io_err)?;
    }
    Ok(())
}
