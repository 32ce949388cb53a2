//! Directory upload via rsync
//!
//! rsync runs locally and uses the session's ssh configuration as its
//! transport, so key and port settings apply to file sync as well.

use std::path::Path;
use std::time::Duration;

use async_process::Command;
use tracing::debug;

use crate::error::{Error, Result};
use crate::session::SshConfig;

/// Deadline for a full directory sync
const SYNC_TIMEOUT: Duration = Duration::from_secs(300);

/// Options controlling what gets uploaded
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Patterns passed to rsync as `--exclude`
    pub exclude: Vec<String>,
    /// Honor the source tree's `.gitignore` files
    pub gitignore: bool,
}

/// Upload a local directory tree to `remote_path` on the host
///
/// The remote side receives an exact mirror of the local tree (deletions
/// included), minus excluded patterns.
pub async fn sync_directory(
    config: &SshConfig,
    local_path: &Path,
    remote_path: &str,
    opts: &SyncOptions,
) -> Result<()> {
    let mut local = local_path.to_string_lossy().into_owned();
    if !local.ends_with('/') {
        local.push('/');
    }

    let mut cmd = Command::new("rsync");
    cmd.arg("-az").arg("--delete");
    if opts.gitignore {
        cmd.arg("--filter=:- .gitignore");
    }
    for pattern in &opts.exclude {
        cmd.arg(format!("--exclude={}", pattern));
    }
    cmd.arg("-e")
        .arg(config.transport_command())
        .arg(&local)
        .arg(format!("{}:{}/", config.host_string(), remote_path));

    debug!(local = %local, remote = %remote_path, "syncing directory");
    let output = crate::session::exec_for_sync(cmd, SYNC_TIMEOUT).await?;
    if !output.0.success() {
        return Err(Error::command_failed(
            format!("rsync {} -> {}", local, remote_path),
            output.0.code(),
            output.1,
        ));
    }
    Ok(())
}
