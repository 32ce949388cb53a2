//! Host bootstrap and connectivity
//!
//! `init` prepares a fresh Debian/Ubuntu host: packages, Caddy import
//! stanza, firewall, hardening, the gantry directory skeleton, and the
//! seeded state documents. Steps can be skipped by name via the server's
//! init configuration.

use std::time::Duration;

use remote_exec::{RemoteChannel, RunOptions};
use tracing::info;

use crate::context::RemoteContext;
use crate::registry::{AppRegistry, PortRegistry, TunnelRegistry};
use crate::Result;

/// Deadline for package installation steps
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Names of the bootstrap steps, in execution order
///
/// These are the values accepted by the per-server skip list.
pub const INIT_STEPS: [&str; 7] = [
    "update",
    "docker",
    "caddy",
    "firewall",
    "ssh-hardening",
    "fail2ban",
    "unattended-upgrades",
];

/// Root Caddyfile: import every generated snippet
fn caddyfile(ctx: &RemoteContext) -> String {
    format!(
        "import {apps}/*.caddy\nimport {tunnels}/*.caddy\n",
        apps = ctx.caddy_apps_dir(),
        tunnels = ctx.caddy_tunnels_dir(),
    )
}

const SSH_HARDENING: &str = "PasswordAuthentication no\nMaxAuthTries 3\nX11Forwarding no\n";

/// Options for [`init_server`]
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Step names to skip (see [`INIT_STEPS`])
    pub skip: Vec<String>,
}

/// Test connectivity to the host
pub async fn ping(chan: &dyn RemoteChannel) -> bool {
    chan.run("echo ok", RunOptions::default()).await.is_ok()
}

/// Initialise a host for gantry use
///
/// Re-running is the documented remediation for corrupted state: the
/// state documents are re-seeded empty.
pub async fn init_server(
    chan: &dyn RemoteChannel,
    ctx: &RemoteContext,
    opts: &InitOptions,
) -> Result<()> {
    let elevated = if ctx.needs_sudo() {
        RunOptions::elevated()
    } else {
        RunOptions::default()
    };
    let run_step = |name: &'static str, cmd: String| async move {
        if opts.skip.iter().any(|s| s == name) {
            info!(step = name, "skipped");
            return Ok(());
        }
        info!(step = name, "running bootstrap step");
        chan.run(&cmd, elevated.with_timeout(INSTALL_TIMEOUT)).await?;
        Ok::<_, crate::Error>(())
    };

    run_step(
        "update",
        "apt-get update -qq && DEBIAN_FRONTEND=noninteractive apt-get upgrade -y -qq".to_string(),
    )
    .await?;

    run_step(
        "docker",
        concat!(
            "apt-get install -y -qq ca-certificates curl gnupg && ",
            "install -m 0755 -d /etc/apt/keyrings && ",
            ". /etc/os-release && ",
            "curl -fsSL https://download.docker.com/linux/$ID/gpg -o /etc/apt/keyrings/docker.asc && ",
            "chmod a+r /etc/apt/keyrings/docker.asc && ",
            "echo \"deb [arch=$(dpkg --print-architecture) signed-by=/etc/apt/keyrings/docker.asc] ",
            "https://download.docker.com/linux/$ID $VERSION_CODENAME stable\" ",
            "> /etc/apt/sources.list.d/docker.list && ",
            "apt-get update -qq && ",
            "apt-get install -y -qq docker-ce docker-ce-cli containerd.io docker-compose-plugin"
        )
        .to_string(),
    )
    .await?;

    run_step(
        "caddy",
        concat!(
            "apt-get install -y -qq debian-keyring debian-archive-keyring apt-transport-https curl && ",
            "curl -1sLf 'https://dl.cloudsmith.io/public/caddy/stable/gpg.key' | ",
            "gpg --dearmor --yes -o /usr/share/keyrings/caddy-stable-archive-keyring.gpg && ",
            "curl -1sLf 'https://dl.cloudsmith.io/public/caddy/stable/debian.deb.txt' | ",
            "tee /etc/apt/sources.list.d/caddy-stable.list && ",
            "apt-get update -qq && ",
            "apt-get install -y -qq caddy"
        )
        .to_string(),
    )
    .await?;

    // Root Caddyfile import stanza
    chan.write_file(
        "/etc/caddy/Caddyfile",
        caddyfile(ctx).as_bytes(),
        ctx.needs_sudo(),
    )
    .await?;

    run_step(
        "firewall",
        concat!(
            "apt-get install -y -qq ufw && ",
            "ufw default deny incoming && ",
            "ufw default allow outgoing && ",
            "ufw allow ssh && ufw allow http && ufw allow https && ",
            "ufw --force enable"
        )
        .to_string(),
    )
    .await?;

    if !opts.skip.iter().any(|s| s == "ssh-hardening") {
        chan.write_file(
            "/etc/ssh/sshd_config.d/hardening.conf",
            SSH_HARDENING.as_bytes(),
            ctx.needs_sudo(),
        )
        .await?;
        chan.run("systemctl reload sshd", elevated).await?;
    }

    run_step(
        "fail2ban",
        "apt-get install -y -qq fail2ban && systemctl enable fail2ban && systemctl start fail2ban"
            .to_string(),
    )
    .await?;

    run_step(
        "unattended-upgrades",
        concat!(
            "apt-get install -y -qq unattended-upgrades && ",
            "dpkg-reconfigure -f noninteractive unattended-upgrades"
        )
        .to_string(),
    )
    .await?;

    // Directory skeleton
    let dirs = format!(
        "mkdir -p {apps} {capps} {ctunnels}",
        apps = format!("{}/apps", ctx.root()),
        capps = ctx.caddy_apps_dir(),
        ctunnels = ctx.caddy_tunnels_dir(),
    );
    chan.run(&dirs, RunOptions::default()).await?;

    // Seed the state documents
    chan.write_file(
        &ctx.apps_doc(),
        &serde_json::to_vec_pretty(&AppRegistry::empty())?,
        false,
    )
    .await?;
    chan.write_file(
        &ctx.ports_doc(),
        &serde_json::to_vec_pretty(&PortRegistry::empty())?,
        false,
    )
    .await?;
    chan.write_file(
        &ctx.tunnels_doc(),
        &serde_json::to_vec_pretty(&TunnelRegistry::empty())?,
        false,
    )
    .await?;

    chan.run("systemctl enable docker && systemctl start docker", elevated)
        .await?;
    chan.run("systemctl enable caddy && systemctl restart caddy", elevated)
        .await?;

    info!("server initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_exec::mock::MockChannel;

    #[smol_potat::test]
    async fn test_init_seeds_state_and_caddyfile() {
        let chan = MockChannel::new();
        let ctx = RemoteContext::default();
        init_server(&chan, &ctx, &InitOptions::default()).await.unwrap();

        let ports = chan.file("/srv/gantry/ports.json").unwrap();
        assert!(ports.contains("\"next_port\": 10000"));
        let apps = chan.file("/srv/gantry/apps.json").unwrap();
        assert!(apps.contains("\"apps\": {}"));
        assert!(chan.file("/srv/gantry/tunnels.json").is_some());

        let caddyfile = chan.file("/etc/caddy/Caddyfile").unwrap();
        assert!(caddyfile.contains("import /srv/gantry/caddy/apps/*.caddy"));
        assert!(caddyfile.contains("import /srv/gantry/caddy/tunnels/*.caddy"));

        assert!(chan.ran("apt-get install -y -qq caddy"));
        assert!(chan.ran("systemctl enable docker"));
    }

    #[smol_potat::test]
    async fn test_init_skips_named_steps() {
        let chan = MockChannel::new();
        let ctx = RemoteContext::default();
        let opts = InitOptions {
            skip: vec!["firewall".to_string(), "fail2ban".to_string()],
        };
        init_server(&chan, &ctx, &opts).await.unwrap();
        assert!(!chan.ran("ufw"));
        assert!(!chan.ran("fail2ban"));
    }

    #[smol_potat::test]
    async fn test_ping() {
        let chan = MockChannel::new();
        assert!(ping(&chan).await);
        chan.fail_on("echo ok", "unreachable");
        assert!(!ping(&chan).await);
    }
}
