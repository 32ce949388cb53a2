//! App lifecycle operations
//!
//! Read-side queries (list, status, logs), unit control, and removal.
//! Removal is a best-effort convergence: supervisor teardown failures are
//! swallowed so the registry deletion and file cleanup always run.

use remote_exec::{shell_escape, RemoteCommand, RunOptions};
use tracing::{info, warn};

use crate::deploy::Orchestrator;
use crate::ports;
use crate::registry::DeployMethod;
use crate::routing::parse_url;
use crate::{Error, Result};

/// Summary of one deployed application
#[derive(Debug, Clone)]
pub struct AppInfo {
    /// Application name
    pub name: String,
    /// Deployment method
    pub method: DeployMethod,
    /// Public URL
    pub url: String,
    /// Allocated port, if any
    pub port: Option<u16>,
    /// Live status, when probed
    pub status: Option<String>,
}

/// Detailed status for a single application
#[derive(Debug, Clone)]
pub struct AppStatusReport {
    /// Application name
    pub name: String,
    /// Deployment method
    pub method: DeployMethod,
    /// Public URL
    pub url: String,
    /// Allocated port, if any
    pub port: Option<u16>,
    /// Live status
    pub status: String,
    /// Source origin
    pub source: Option<String>,
    /// First deploy timestamp
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// Last deploy timestamp
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl Orchestrator<'_> {
    /// List registered applications without probing live status
    pub async fn list(&self) -> Result<Vec<AppInfo>> {
        let apps = self.store().read_apps().await?;
        Ok(apps
            .apps
            .values()
            .map(|record| AppInfo {
                name: record.name.clone(),
                method: record.method,
                url: record.url.clone(),
                port: record.port,
                status: None,
            })
            .collect())
    }

    /// List registered applications with live supervisor status
    ///
    /// Static apps report `serving`; a failed probe reports `inactive`.
    pub async fn list_with_status(&self) -> Result<Vec<AppInfo>> {
        let mut infos = self.list().await?;
        let systemd = self.systemd();
        for info in &mut infos {
            info.status = Some(if info.method == DeployMethod::Static {
                "serving".to_string()
            } else {
                systemd.is_active(&info.name).await
            });
        }
        Ok(infos)
    }

    /// Detailed status for one application
    pub async fn status(&self, name: &str) -> Result<AppStatusReport> {
        let apps = self.store().read_apps().await?;
        let record = apps
            .apps
            .get(name)
            .ok_or_else(|| Error::AppNotFound(name.to_string()))?;

        let status = if record.method == DeployMethod::Static {
            "serving".to_string()
        } else {
            self.systemd().is_active(name).await
        };

        Ok(AppStatusReport {
            name: record.name.clone(),
            method: record.method,
            url: record.url.clone(),
            port: record.port,
            status,
            source: record.source.clone(),
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    /// Start an application's unit
    pub async fn start(&self, name: &str) -> Result<()> {
        self.require_unit(name).await?;
        self.systemd().start(name).await
    }

    /// Stop an application's unit
    pub async fn stop(&self, name: &str) -> Result<()> {
        self.require_unit(name).await?;
        self.systemd().stop(name).await
    }

    /// Restart an application's unit
    pub async fn restart(&self, name: &str) -> Result<()> {
        self.require_unit(name).await?;
        self.systemd().restart(name).await
    }

    /// Fetch recent logs for an application
    pub async fn logs(&self, name: &str, lines: u32) -> Result<String> {
        self.require_unit(name).await?;
        self.systemd().tail_logs(name, lines).await
    }

    /// Remove an application and its resources
    ///
    /// Teardown converges: a unit that is already stopped, a config file
    /// that is already gone, or an unallocated port never aborts the
    /// later steps. With `keep_data` the app's `data/` subtree survives.
    pub async fn remove(&self, name: &str, keep_data: bool) -> Result<()> {
        let store = self.store();
        let apps = store.read_apps().await?;
        let record = apps
            .apps
            .get(name)
            .cloned()
            .ok_or_else(|| Error::AppNotFound(name.to_string()))?;
        let (domain, path) = parse_url(&record.url);
        info!(app = name, "removing");

        // 1-3. Supervisor teardown, best-effort throughout
        if record.method.has_unit() {
            let systemd = self.systemd();
            if let Err(e) = systemd.stop(name).await {
                warn!(app = name, error = %e, "stop failed during removal");
            }
            if let Err(e) = systemd.disable(name).await {
                warn!(app = name, error = %e, "disable failed during removal");
            }
            if let Err(e) = systemd.remove_unit(name).await {
                warn!(app = name, error = %e, "unit removal failed");
            }
        }

        // 4. Registry deletion and routing regeneration commit together
        // under one lock, so a concurrent deploy on the same domain sees
        // either both or neither.
        let guard = store.lock().await?;
        let commit = async {
            let mut apps = store.read_apps_with(&guard).await?;
            apps.apps.remove(name);
            store.write_apps_with(&guard, &apps).await?;
            self.routing()
                .remove(name, &domain, path.as_deref(), &apps)
                .await
        }
        .await;
        guard.release().await;
        commit?;

        // 5. Release the port; an already-released port is fine
        if record.port.is_some() {
            let owner = name.to_string();
            let released = store
                .update_ports(move |ports| match ports::release(ports, &owner) {
                    Ok(port) => Ok(Some(port)),
                    Err(Error::PortNotFound(_)) => Ok(None),
                    Err(e) => Err(e),
                })
                .await?;
            if released.is_none() {
                warn!(app = name, "no port allocation found during removal");
            }
        }

        // 6. Remove the app directory
        let app_dir = self.ctx.app_dir(name);
        let cleanup = if keep_data {
            format!(
                "find {dir} -mindepth 1 -maxdepth 1 ! -name data -exec rm -rf {{}} +",
                dir = shell_escape(&app_dir)
            )
        } else {
            RemoteCommand::new("rm").arg("-rf").arg(&app_dir).to_shell()
        };
        self.chan.run(&cleanup, RunOptions::default()).await?;

        info!(app = name, "removed");
        Ok(())
    }

    async fn require_unit(&self, name: &str) -> Result<()> {
        let apps = self.store().read_apps().await?;
        let record = apps
            .apps
            .get(name)
            .ok_or_else(|| Error::AppNotFound(name.to_string()))?;
        if !record.method.has_unit() {
            return Err(Error::validation(
                "app name",
                format!("'{}' is a static site; it has no supervised unit", name),
            ));
        }
        Ok(())
    }
}
