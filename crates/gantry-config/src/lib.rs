//! Client configuration and project manifest handling for gantry
//!
//! Two distinct configuration surfaces live here:
//!
//! - the client config (`~/.config/gantry/config.toml`): server entries,
//!   the default server, and global deployment defaults
//! - the project manifest (`gantry.toml`): per-application defaults and
//!   named environments, resolved through a layered cascade

#![warn(missing_docs)]

pub mod client;
pub mod environment;
pub mod manifest;

pub use client::{
    config_path, load_client_config, save_client_config, ClientConfig, InitConfig, ServerConfig,
};
pub use environment::{
    derive_app_name, list_environments, resolve_all_environments, resolve_environment,
    EnvironmentConfig, Overrides,
};
pub use manifest::{load_project_config, ProjectConfig, MANIFEST_FILE};

/// Error types for configuration handling
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read or written
    #[error("config I/O error at {path}: {source}")]
    Io {
        /// The file involved
        path: String,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// TOML could not be parsed
    #[error("failed to parse {path}: {source}")]
    Parse {
        /// The file that failed to parse
        path: String,
        /// The underlying TOML error
        #[source]
        source: toml::de::Error,
    },

    /// TOML could not be serialized
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No server was specified and no default is configured
    #[error("no server specified and no default server configured")]
    NoDefaultServer,

    /// The named server does not exist
    #[error("server '{0}' not found in configuration")]
    ServerNotFound(String),

    /// No project manifest was found
    #[error("no {MANIFEST_FILE} found in {0}")]
    ManifestNotFound(String),

    /// The manifest is structurally invalid
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// The named environment is not defined in the manifest
    #[error("environment '{name}' not found in {MANIFEST_FILE}. Available: {available}")]
    EnvironmentNotFound {
        /// The environment that was requested
        name: String,
        /// Comma-separated list of defined environment names
        available: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ConfigError>;
