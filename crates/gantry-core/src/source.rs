//! Source transfer
//!
//! Gets application code onto the host: git URLs are cloned remotely,
//! local directories are uploaded with rsync. The orchestrator only sees
//! the [`SourceTransfer`] contract and the `git`/`local` outcome tag.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use remote_exec::{
    shell_escape, sync_directory, RemoteChannel, RemoteCommand, RunOptions, SshConfig, SyncOptions,
};
use tracing::info;

use crate::registry::SourceKind;
use crate::validate::validate_branch;
use crate::{Error, Result};

/// Deadline for git clone and pull
const GIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Upload filters for local sources
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Patterns excluded from upload
    pub exclude: Vec<String>,
    /// Honor `.gitignore` files in the source tree
    pub gitignore: bool,
}

/// Moves source trees onto the host
#[async_trait]
pub trait SourceTransfer: Send + Sync {
    /// Put `source` at `dest` on the host, returning how it got there
    async fn transfer(
        &self,
        source: &str,
        dest: &str,
        branch: Option<&str>,
        opts: &TransferOptions,
    ) -> Result<SourceKind>;

    /// Refresh an existing checkout for a redeploy
    async fn update(
        &self,
        kind: SourceKind,
        source: &str,
        dest: &str,
        branch: Option<&str>,
        opts: &TransferOptions,
    ) -> Result<()>;
}

/// Return true if `source` looks like a git URL
pub fn is_git_url(source: &str) -> bool {
    source.starts_with("https://")
        || source.starts_with("http://")
        || source.starts_with("git@")
        || source.starts_with("git://")
        || source.ends_with(".git")
}

/// Production transfer: remote `git clone`/`git pull` or local rsync
pub struct DefaultSourceTransfer<'a> {
    chan: &'a dyn RemoteChannel,
    ssh: SshConfig,
}

impl<'a> DefaultSourceTransfer<'a> {
    /// Create a transfer over a channel and the rsync ssh settings
    pub fn new(chan: &'a dyn RemoteChannel, ssh: SshConfig) -> Self {
        Self { chan, ssh }
    }

    async fn clone_repo(&self, source: &str, dest: &str, branch: Option<&str>) -> Result<()> {
        if let Some(branch) = branch {
            validate_branch(branch)?;
        }
        let mut clone = RemoteCommand::new("git").arg("clone");
        if let Some(branch) = branch {
            clone = clone.arg("-b").arg(branch);
        }
        let clone = clone.arg(source).arg(dest).to_shell();
        // A fresh clone replaces whatever checkout was there
        let script = format!("rm -rf {dest} && {clone}", dest = shell_escape(dest));
        self.chan
            .run(&script, RunOptions::default().with_timeout(GIT_TIMEOUT))
            .await?;
        Ok(())
    }

    async fn upload_dir(&self, source: &str, dest: &str, opts: &TransferOptions) -> Result<()> {
        let mkdir = RemoteCommand::new("mkdir").arg("-p").arg(dest).to_shell();
        self.chan.run(&mkdir, RunOptions::default()).await?;
        let sync_opts = SyncOptions {
            exclude: opts.exclude.clone(),
            gitignore: opts.gitignore,
        };
        sync_directory(&self.ssh, Path::new(source), dest, &sync_opts).await?;
        Ok(())
    }
}

#[async_trait]
impl SourceTransfer for DefaultSourceTransfer<'_> {
    async fn transfer(
        &self,
        source: &str,
        dest: &str,
        branch: Option<&str>,
        opts: &TransferOptions,
    ) -> Result<SourceKind> {
        if is_git_url(source) {
            info!(source, "cloning source");
            self.clone_repo(source, dest, branch).await?;
            Ok(SourceKind::Git)
        } else {
            info!(source, "uploading source");
            self.upload_dir(source, dest, opts).await?;
            Ok(SourceKind::Local)
        }
    }

    async fn update(
        &self,
        kind: SourceKind,
        source: &str,
        dest: &str,
        branch: Option<&str>,
        opts: &TransferOptions,
    ) -> Result<()> {
        match kind {
            SourceKind::Git => {
                let pull = match branch {
                    Some(branch) => {
                        validate_branch(branch)?;
                        RemoteCommand::new("git")
                            .arg("pull")
                            .arg("origin")
                            .arg(branch)
                            .to_shell()
                    }
                    None => "git pull".to_string(),
                };
                let script = format!("cd {} && {}", shell_escape(dest), pull);
                self.chan
                    .run(&script, RunOptions::default().with_timeout(GIT_TIMEOUT))
                    .await?;
                Ok(())
            }
            SourceKind::Local => {
                if source.is_empty() {
                    return Err(Error::validation(
                        "source",
                        "registry entry has no source path to re-upload from",
                    ));
                }
                self.upload_dir(source, dest, opts).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_exec::mock::MockChannel;

    #[test]
    fn test_is_git_url() {
        assert!(is_git_url("https://github.com/user/repo.git"));
        assert!(is_git_url("https://github.com/user/repo"));
        assert!(is_git_url("git@github.com:user/repo.git"));
        assert!(is_git_url("git://example.com/repo.git"));
        assert!(!is_git_url("/home/user/project"));
        assert!(!is_git_url("./my-site"));
        assert!(!is_git_url("../build"));
    }

    #[smol_potat::test]
    async fn test_clone_with_branch() {
        let chan = MockChannel::new();
        let transfer = DefaultSourceTransfer::new(&chan, SshConfig::new("host"));
        let kind = transfer
            .transfer(
                "https://github.com/user/site.git",
                "/srv/gantry/apps/mysite/source",
                Some("gh-pages"),
                &TransferOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(kind, SourceKind::Git);
        let clones: Vec<String> = chan
            .commands()
            .into_iter()
            .filter(|c| c.contains("git clone"))
            .collect();
        assert_eq!(clones.len(), 1);
        assert!(clones[0].contains("-b gh-pages"));
        assert!(clones[0].starts_with("rm -rf /srv/gantry/apps/mysite/source"));
    }

    #[smol_potat::test]
    async fn test_clone_rejects_bad_branch() {
        let chan = MockChannel::new();
        let transfer = DefaultSourceTransfer::new(&chan, SshConfig::new("host"));
        let err = transfer
            .transfer(
                "https://github.com/user/site.git",
                "/srv/gantry/apps/mysite/source",
                Some("evil; rm -rf /"),
                &TransferOptions::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(chan.commands().is_empty());
    }

    #[smol_potat::test]
    async fn test_git_update_pulls_branch() {
        let chan = MockChannel::new();
        let transfer = DefaultSourceTransfer::new(&chan, SshConfig::new("host"));
        transfer
            .update(
                SourceKind::Git,
                "https://github.com/user/site.git",
                "/srv/gantry/apps/mysite/source",
                Some("main"),
                &TransferOptions::default(),
            )
            .await
            .unwrap();
        assert!(chan.ran("git pull origin main"));
        assert!(chan.ran("cd /srv/gantry/apps/mysite/source"));
    }
}
