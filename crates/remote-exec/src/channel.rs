//! The narrow remote-execution contract the rest of gantry depends on

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Default deadline for a remote command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-call options for [`RemoteChannel::run`]
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Deadline for the command; elapsing it is a hard failure
    pub timeout: Duration,
    /// Run the command with privilege elevation (sudo)
    pub elevate: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            elevate: false,
        }
    }
}

impl RunOptions {
    /// Options with privilege elevation enabled
    pub fn elevated() -> Self {
        Self {
            elevate: true,
            ..Self::default()
        }
    }

    /// Override the command deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A connected execution channel to a single remote host
///
/// The orchestration core depends only on this contract, not on any
/// specific transport. The production implementation is
/// [`SshSession`](crate::SshSession); tests substitute an in-memory double.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Run a shell command on the remote host and return its stdout
    ///
    /// A non-zero exit status or an elapsed deadline fails the call.
    async fn run(&self, command: &str, opts: RunOptions) -> Result<String>;

    /// Read a file from the remote host
    async fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Write a file on the remote host, optionally with elevation
    async fn write_file(&self, path: &str, contents: &[u8], elevate: bool) -> Result<()>;
}
