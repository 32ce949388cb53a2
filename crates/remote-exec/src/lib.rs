//! Remote execution channel for gantry
//!
//! This crate provides the narrow transport contract the orchestration
//! core depends on (run a command, read a file, write a file, each with a
//! deadline and optional privilege elevation) and its production
//! implementation over the OpenSSH CLI with ControlMaster multiplexing.

#![warn(missing_docs)]

pub mod channel;
pub mod command;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod session;
pub mod sync;

pub use channel::{RemoteChannel, RunOptions, DEFAULT_TIMEOUT};
pub use command::{shell_escape, RemoteCommand};
pub use error::{Error, Result};
pub use session::{SshConfig, SshSession};
pub use sync::{sync_directory, SyncOptions};
