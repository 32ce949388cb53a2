//! Error types for the remote execution channel

use thiserror::Error;

/// Unified error type for remote execution
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to establish the SSH connection
    #[error("connection to {host} failed: {reason}")]
    ConnectionFailed {
        /// The hostname or IP address that failed to connect
        host: String,
        /// The detailed reason for the connection failure
        reason: String,
    },

    /// Remote command exited with a non-zero status
    #[error("remote command failed: {command}\n{stderr}")]
    CommandFailed {
        /// The command that failed
        command: String,
        /// Exit status, if the process exited normally
        status: Option<i32>,
        /// Captured standard error output
        stderr: String,
    },

    /// Remote command did not complete within its deadline
    #[error("remote command timed out after {seconds}s: {command}")]
    Timeout {
        /// The command that timed out
        command: String,
        /// The deadline that elapsed
        seconds: u64,
    },

    /// Failed to spawn a local helper process (ssh, rsync)
    #[error("failed to spawn {program}: {reason}")]
    SpawnFailed {
        /// The program that could not be spawned
        program: String,
        /// The reason for the spawn failure
        reason: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a command-failed error from captured output
    pub fn command_failed(
        command: impl Into<String>,
        status: Option<i32>,
        stderr: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            command: command.into(),
            status,
            stderr: stderr.into(),
        }
    }

    /// Exit status carried by a `CommandFailed` error, if any
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            Error::CommandFailed { status, .. } => *status,
            _ => None,
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
