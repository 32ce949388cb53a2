//! Ephemeral tunnels
//!
//! Exposes a locally running app through the host: an allocated remote
//! port, a Caddy proxy snippet, a registry record, and a blocking
//! `ssh -N -R` reverse tunnel. Whether the blocking section ends by
//! interrupt, crash, or the process exiting on its own, the cleanup
//! sequence runs exactly once, and each of its steps is best-effort
//! because the host may already be partially torn down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_io::Timer;
use async_process::Command;
use chrono::Utc;
use remote_exec::{RemoteChannel, RemoteCommand, RunOptions, SshConfig};
use tracing::{info, warn};
use uuid::Uuid;

use crate::context::RemoteContext;
use crate::ports;
use crate::registry::TunnelRecord;
use crate::routing::{parse_url, RoutingConfigBuilder};
use crate::store::RemoteStateStore;
use crate::validate::validate_domain;
use crate::{Error, Result};

/// A registered tunnel, as reported by [`TunnelManager::list`]
#[derive(Debug, Clone)]
pub struct TunnelInfo {
    /// Tunnel identifier
    pub id: String,
    /// Public URL
    pub url: String,
    /// Local port being exposed
    pub local_port: u16,
    /// Allocated remote port
    pub remote_port: u16,
    /// When the tunnel was opened
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Manages ephemeral reverse-tunnel resources
pub struct TunnelManager<'a> {
    chan: &'a dyn RemoteChannel,
    ctx: RemoteContext,
}

impl<'a> TunnelManager<'a> {
    /// Create a manager over a connected channel
    pub fn new(chan: &'a dyn RemoteChannel, ctx: RemoteContext) -> Self {
        Self { chan, ctx }
    }

    fn store(&self) -> RemoteStateStore<'_> {
        RemoteStateStore::new(self.chan, self.ctx.clone())
    }

    fn routing(&self) -> RoutingConfigBuilder<'_> {
        RoutingConfigBuilder::new(self.chan, &self.ctx)
    }

    /// Open a tunnel and block until it ends
    ///
    /// `stop` is polled while the local tunnel process runs; setting it
    /// (from a signal handler) terminates the process and triggers
    /// cleanup, as does the process ending on its own.
    pub async fn open(
        &self,
        ssh: &SshConfig,
        local_port: u16,
        url: &str,
        stop: Arc<AtomicBool>,
    ) -> Result<TunnelInfo> {
        let (id, remote_port) = self.register(local_port, url).await?;
        info!(tunnel = %id, url, remote_port, "tunnel open");

        let run = self.run_tunnel_process(ssh, local_port, remote_port, &stop).await;
        // Single cleanup point for every exit path of the blocking wait
        self.cleanup(&id).await;
        run?;

        Ok(TunnelInfo {
            id,
            url: url.to_string(),
            local_port,
            remote_port,
            created_at: Utc::now(),
        })
    }

    /// Allocate the port, deploy the proxy snippet, and record the tunnel
    async fn register(&self, local_port: u16, url: &str) -> Result<(String, u16)> {
        let (domain, path) = parse_url(url);
        if path.is_some() {
            return Err(Error::validation(
                "url",
                "tunnels require a subdomain URL, not a subdirectory",
            ));
        }
        validate_domain(&domain)?;

        let id = format!("tun-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let store = self.store();
        let owner = id.clone();
        let remote_port = store
            .update_ports(move |ports| Ok(ports::allocate(ports, &owner)))
            .await?;

        // From here on, a failure must give back what was taken
        let setup = async {
            let snippet = format!(
                "{domain} {{\n    reverse_proxy localhost:{remote_port}\n    encode gzip\n}}\n"
            );
            self.chan
                .write_file(&self.ctx.tunnel_caddy_file(&id), snippet.as_bytes(), false)
                .await?;
            self.routing().reload().await?;

            let record = TunnelRecord {
                url: url.to_string(),
                local_port,
                remote_port,
                created_at: Utc::now(),
            };
            let tunnel_id = id.clone();
            store
                .update_tunnels(move |tunnels| {
                    tunnels.tunnels.insert(tunnel_id, record);
                    Ok(())
                })
                .await
        }
        .await;

        if let Err(e) = setup {
            self.cleanup(&id).await;
            return Err(e);
        }
        Ok((id, remote_port))
    }

    /// Run the blocking reverse-tunnel process
    async fn run_tunnel_process(
        &self,
        ssh: &SshConfig,
        local_port: u16,
        remote_port: u16,
        stop: &AtomicBool,
    ) -> Result<()> {
        let mut cmd = Command::new("ssh");
        cmd.arg("-N")
            .arg("-R")
            .arg(format!("{}:localhost:{}", remote_port, local_port))
            .arg("-o")
            .arg("ServerAliveInterval=30")
            .arg("-o")
            .arg("ServerAliveCountMax=3")
            .args(ssh.client_args())
            .arg(ssh.host_string());

        let mut child = cmd.spawn().map_err(|e| remote_exec::Error::SpawnFailed {
            program: "ssh".to_string(),
            reason: e.to_string(),
        })?;

        loop {
            if stop.load(Ordering::Relaxed) {
                info!("closing tunnel");
                if let Err(e) = child.kill() {
                    warn!(error = %e, "failed to terminate tunnel process");
                }
                let _ = child.status().await;
                return Ok(());
            }
            match child.try_status().map_err(remote_exec::Error::from)? {
                Some(status) => {
                    info!(%status, "tunnel process ended");
                    return Ok(());
                }
                None => Timer::after(Duration::from_millis(200)).await,
            };
        }
    }

    /// Close a tunnel administratively, without a local process
    pub async fn close(&self, tunnel_id: &str) -> Result<()> {
        let tunnels = self.store().read_tunnels().await?;
        if !tunnels.tunnels.contains_key(tunnel_id) {
            return Err(Error::TunnelNotFound(tunnel_id.to_string()));
        }
        self.cleanup(tunnel_id).await;
        Ok(())
    }

    /// List registered tunnels
    pub async fn list(&self) -> Result<Vec<TunnelInfo>> {
        let tunnels = self.store().read_tunnels().await?;
        Ok(tunnels
            .tunnels
            .into_iter()
            .map(|(id, record)| TunnelInfo {
                id,
                url: record.url,
                local_port: record.local_port,
                remote_port: record.remote_port,
                created_at: record.created_at,
            })
            .collect())
    }

    /// Clean up tunnels whose remote ports have no listener
    ///
    /// A probe that errors counts as a dead tunnel: reclaiming resources
    /// beats leaving dangling state. Returns the cleaned tunnel ids.
    pub async fn cleanup_stale(&self) -> Result<Vec<String>> {
        let tunnels = self.store().read_tunnels().await?;
        let mut cleaned = Vec::new();
        for (id, record) in tunnels.tunnels {
            let probe = format!(
                "ss -tln | grep -q ':{} ' && echo active || echo inactive",
                record.remote_port
            );
            let dead = match self.chan.run(&probe, RunOptions::default()).await {
                Ok(output) => output.contains("inactive"),
                Err(e) => {
                    warn!(tunnel = %id, error = %e, "liveness probe failed, treating as dead");
                    true
                }
            };
            if dead {
                self.cleanup(&id).await;
                cleaned.push(id);
            }
        }
        Ok(cleaned)
    }

    /// Remove the proxy snippet, release the port, delete the record
    ///
    /// Every step is best-effort; errors are logged and swallowed.
    async fn cleanup(&self, tunnel_id: &str) {
        let rm = RemoteCommand::new("rm")
            .arg("-f")
            .arg(self.ctx.tunnel_caddy_file(tunnel_id))
            .to_shell();
        if let Err(e) = self.chan.run(&rm, RunOptions::default()).await {
            warn!(tunnel = tunnel_id, error = %e, "failed to remove tunnel config");
        }
        if let Err(e) = self.routing().reload().await {
            warn!(tunnel = tunnel_id, error = %e, "failed to reload caddy");
        }

        let store = self.store();
        let owner = tunnel_id.to_string();
        let release = store
            .update_ports(move |ports| match ports::release(ports, &owner) {
                Ok(_) | Err(Error::PortNotFound(_)) => Ok(()),
                Err(e) => Err(e),
            })
            .await;
        if let Err(e) = release {
            warn!(tunnel = tunnel_id, error = %e, "failed to release tunnel port");
        }

        let key = tunnel_id.to_string();
        let unregister = store
            .update_tunnels(move |tunnels| {
                tunnels.tunnels.remove(&key);
                Ok(())
            })
            .await;
        if let Err(e) = unregister {
            warn!(tunnel = tunnel_id, error = %e, "failed to unregister tunnel");
        }
    }
}
