//! systemd process-supervisor driver
//!
//! Applications run as `gantry-<name>.service` units. All verbs go
//! through the remote channel, elevated when the SSH user is not root.

use remote_exec::{RemoteChannel, RemoteCommand, RunOptions};
use tracing::{debug, info};

use crate::context::RemoteContext;
use crate::validate::validate_app_name;
use crate::Result;

/// Where unit definitions are installed
pub const UNIT_DIR: &str = "/etc/systemd/system";

/// The unit name for an application
pub fn unit_name(app_name: &str) -> String {
    format!("gantry-{}.service", app_name)
}

/// Drives systemd on the remote host
pub struct Systemd<'a> {
    chan: &'a dyn RemoteChannel,
    needs_sudo: bool,
}

impl<'a> Systemd<'a> {
    /// Create a driver over a connected channel
    pub fn new(chan: &'a dyn RemoteChannel, ctx: &RemoteContext) -> Self {
        Self {
            chan,
            needs_sudo: ctx.needs_sudo(),
        }
    }

    fn opts(&self) -> RunOptions {
        if self.needs_sudo {
            RunOptions::elevated()
        } else {
            RunOptions::default()
        }
    }

    async fn systemctl(&self, verb: &str, unit: &str) -> Result<String> {
        let cmd = RemoteCommand::new("systemctl").arg(verb).arg(unit).to_shell();
        Ok(self.chan.run(&cmd, self.opts()).await?)
    }

    /// Install a unit definition and reload the daemon
    ///
    /// Returns the installed unit name.
    pub async fn install_unit(&self, app_name: &str, definition: &str) -> Result<String> {
        validate_app_name(app_name)?;
        let unit = unit_name(app_name);
        info!(unit = %unit, "installing systemd unit");
        self.chan
            .write_file(
                &format!("{}/{}", UNIT_DIR, unit),
                definition.as_bytes(),
                self.needs_sudo,
            )
            .await?;
        self.daemon_reload().await?;
        Ok(unit)
    }

    /// Delete a unit definition and reload the daemon
    pub async fn remove_unit(&self, app_name: &str) -> Result<()> {
        validate_app_name(app_name)?;
        let unit = unit_name(app_name);
        let cmd = RemoteCommand::new("rm")
            .arg("-f")
            .arg(format!("{}/{}", UNIT_DIR, unit))
            .to_shell();
        self.chan.run(&cmd, self.opts()).await?;
        self.daemon_reload().await
    }

    /// Make systemd pick up unit changes
    pub async fn daemon_reload(&self) -> Result<()> {
        self.chan.run("systemctl daemon-reload", self.opts()).await?;
        Ok(())
    }

    /// Enable an application's unit at boot
    pub async fn enable(&self, app_name: &str) -> Result<()> {
        self.systemctl("enable", &unit_name(app_name)).await.map(drop)
    }

    /// Disable an application's unit
    pub async fn disable(&self, app_name: &str) -> Result<()> {
        self.systemctl("disable", &unit_name(app_name)).await.map(drop)
    }

    /// Start an application's unit
    pub async fn start(&self, app_name: &str) -> Result<()> {
        self.systemctl("start", &unit_name(app_name)).await.map(drop)
    }

    /// Stop an application's unit
    pub async fn stop(&self, app_name: &str) -> Result<()> {
        self.systemctl("stop", &unit_name(app_name)).await.map(drop)
    }

    /// Restart an application's unit
    pub async fn restart(&self, app_name: &str) -> Result<()> {
        self.systemctl("restart", &unit_name(app_name)).await.map(drop)
    }

    /// Probe an application's live status
    ///
    /// A failed probe reports `inactive` rather than raising; a dead app
    /// must not break `status` or `list`.
    pub async fn is_active(&self, app_name: &str) -> String {
        match self.systemctl("is-active", &unit_name(app_name)).await {
            Ok(output) => {
                let status = output.trim();
                if status.is_empty() {
                    "inactive".to_string()
                } else {
                    status.to_string()
                }
            }
            Err(e) => {
                debug!(app = app_name, error = %e, "status probe failed");
                "inactive".to_string()
            }
        }
    }

    /// Fetch the last `lines` journal lines for an application
    pub async fn tail_logs(&self, app_name: &str, lines: u32) -> Result<String> {
        validate_app_name(app_name)?;
        let cmd = RemoteCommand::new("journalctl")
            .arg("-u")
            .arg(unit_name(app_name))
            .arg("--no-pager")
            .arg("-n")
            .arg(lines.to_string())
            .to_shell();
        Ok(self.chan.run(&cmd, self.opts()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_exec::mock::MockChannel;

    #[test]
    fn test_unit_name() {
        assert_eq!(unit_name("myapp"), "gantry-myapp.service");
    }

    #[smol_potat::test]
    async fn test_install_unit_writes_and_reloads() {
        let chan = MockChannel::new();
        let ctx = RemoteContext::default();
        let systemd = Systemd::new(&chan, &ctx);

        let unit = systemd.install_unit("myapp", "[Unit]\n").await.unwrap();
        assert_eq!(unit, "gantry-myapp.service");
        assert_eq!(
            chan.file("/etc/systemd/system/gantry-myapp.service").as_deref(),
            Some("[Unit]\n")
        );
        assert!(chan.ran("systemctl daemon-reload"));
    }

    #[smol_potat::test]
    async fn test_install_unit_rejects_bad_names() {
        let chan = MockChannel::new();
        let ctx = RemoteContext::default();
        let systemd = Systemd::new(&chan, &ctx);
        // Path traversal in an app name must never reach the host
        let err = systemd.install_unit("../../etc/passwd", "x").await.unwrap_err();
        assert!(matches!(err, crate::Error::Validation { .. }));
        assert!(chan.commands().is_empty());
    }

    #[smol_potat::test]
    async fn test_is_active_falls_back_to_inactive() {
        let chan = MockChannel::new();
        let ctx = RemoteContext::default();
        let systemd = Systemd::new(&chan, &ctx);

        chan.fail_on("is-active", "Unit not found");
        assert_eq!(systemd.is_active("ghost").await, "inactive");
    }

    #[smol_potat::test]
    async fn test_is_active_trims_output() {
        let chan = MockChannel::new();
        let ctx = RemoteContext::default();
        let systemd = Systemd::new(&chan, &ctx);

        chan.on("is-active", "active\n");
        assert_eq!(systemd.is_active("myapp").await, "active");
    }

    #[smol_potat::test]
    async fn test_tail_logs() {
        let chan = MockChannel::new();
        let ctx = RemoteContext::default();
        let systemd = Systemd::new(&chan, &ctx);

        chan.on("journalctl", "line1\nline2\n");
        let logs = systemd.tail_logs("myapp", 50).await.unwrap();
        assert!(logs.contains("line1"));
        assert!(chan.ran("journalctl -u gantry-myapp.service --no-pager -n 50"));
    }
}
