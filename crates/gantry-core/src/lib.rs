//! # Gantry orchestration core
//!
//! The stateful engine behind the gantry CLI: a locked remote state store,
//! the port allocator, the Caddy routing generator, the per-application
//! deploy/redeploy/remove/status lifecycle, and the ephemeral tunnel
//! manager. Everything talks to the host through the narrow
//! [`RemoteChannel`](remote_exec::RemoteChannel) contract, so the engine
//! is transport-agnostic and testable without a server.

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod apps;
mod context;
mod deploy;
mod ports;
mod registry;
mod routing;
mod runtime;
mod server;
mod source;
mod store;
mod systemd;
mod tunnel;
mod validate;

pub use apps::{AppInfo, AppStatusReport};
pub use context::RemoteContext;
pub use deploy::{DeployRequest, Orchestrator};
pub use ports::{allocate, port_of, register, release, PORT_RANGE_START};
pub use registry::{
    AppRecord, AppRegistry, DeployMethod, PortRegistry, RoutingKind, SourceKind, TunnelRecord,
    TunnelRegistry,
};
pub use routing::{parse_url, RoutingConfigBuilder};
pub use runtime::{detect_runtime, generate_dockerfile, Runtime, RUNTIMES};
pub use server::{init_server, ping, InitOptions, INIT_STEPS};
pub use source::{is_git_url, DefaultSourceTransfer, SourceTransfer, TransferOptions};
pub use store::{RemoteStateStore, StateGuard, LOCK_TIMEOUT};
pub use systemd::Systemd;
pub use tunnel::{TunnelInfo, TunnelManager};
pub use validate::{validate_app_name, validate_branch, validate_domain, validate_path_segment};

/// Error types for orchestration operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The remote state lock could not be acquired in time
    #[error(
        "timed out after {seconds}s waiting for the state lock at {path}; \
         if no other gantry invocation is running, remove that directory on the host and retry"
    )]
    LockTimeout {
        /// The remote lock directory
        path: String,
        /// How long acquisition waited
        seconds: u64,
    },

    /// A state document exists but cannot be parsed
    #[error(
        "state document {path} is corrupted: {source}; \
         re-run `gantry server init` to re-initialize the host state (existing records are lost)"
    )]
    CorruptedState {
        /// The unparseable document
        path: String,
        /// The underlying parse error
        #[source]
        source: serde_json::Error,
    },

    /// The named application is not registered
    #[error("app '{0}' not found")]
    AppNotFound(String),

    /// The named tunnel is not registered
    #[error("tunnel '{0}' not found")]
    TunnelNotFound(String),

    /// No port is allocated for the given owner
    #[error("no port allocated for '{0}'")]
    PortNotFound(String),

    /// The port is already owned by another application
    #[error("port {port} already allocated to '{owner}'")]
    PortConflict {
        /// The contested port
        port: u16,
        /// The application that owns it
        owner: String,
    },

    /// A name, domain, path, or branch failed validation
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Which input was malformed
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// A required deployment parameter is missing
    #[error("method '{method}' requires {what}")]
    MissingParameter {
        /// The deployment method
        method: String,
        /// The missing parameter
        what: &'static str,
    },

    /// Failure in the remote execution channel
    #[error(transparent)]
    Remote(#[from] remote_exec::Error),

    /// A document failed to serialize
    #[error("failed to encode state document: {0}")]
    Encode(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a validation error
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
