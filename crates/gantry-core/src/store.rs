//! Locked remote state store
//!
//! The three state documents are read and written under one exclusive,
//! host-side advisory lock: an atomic `mkdir` of `<root>/.lock`, spun on
//! with a bounded deadline. The lock directory, not a file descriptor,
//! carries the exclusion, so a guard can span several channel round trips,
//! letting deploy and remove commit a registry write and the matching
//! routing regeneration in a single critical section.
//!
//! Writes land in a temp file and are `mv -f`ed into place, so a reader
//! never observes a partially written document.

use std::time::Duration;

use remote_exec::{shell_escape, RemoteChannel, RemoteCommand, RunOptions};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::context::RemoteContext;
use crate::registry::{AppRegistry, PortRegistry, TunnelRegistry};
use crate::{Error, Result};

/// Bounded wait for the state lock; elapsing it is a hard failure
pub const LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit status the remote acquisition loop uses to signal a timed-out wait
const LOCK_TIMEOUT_EXIT: i32 = 9;

/// Locked, atomic access to the remote state documents
pub struct RemoteStateStore<'a> {
    chan: &'a dyn RemoteChannel,
    ctx: RemoteContext,
}

/// Proof of holding the state lock
///
/// Obtained from [`RemoteStateStore::lock`]; document accessors that take
/// a guard run inside the caller's critical section. Call
/// [`release`](StateGuard::release) on every exit path; dropping an
/// unreleased guard only logs, it cannot release the remote lock.
pub struct StateGuard<'s> {
    store: &'s RemoteStateStore<'s>,
    released: bool,
}

impl<'a> RemoteStateStore<'a> {
    /// Create a store over a connected channel
    pub fn new(chan: &'a dyn RemoteChannel, ctx: RemoteContext) -> Self {
        Self { chan, ctx }
    }

    /// The context this store operates under
    pub fn context(&self) -> &RemoteContext {
        &self.ctx
    }

    /// Acquire the state lock, waiting at most [`LOCK_TIMEOUT`]
    pub async fn lock(&self) -> Result<StateGuard<'_>> {
        let lock_dir = self.ctx.lock_dir();
        let script = format!(
            "deadline=$(($(date +%s)+{wait})); \
             until mkdir {dir} 2>/dev/null; do \
             if [ $(date +%s) -ge $deadline ]; then exit {code}; fi; \
             sleep 0.2; done",
            wait = LOCK_TIMEOUT.as_secs(),
            dir = shell_escape(&lock_dir),
            code = LOCK_TIMEOUT_EXIT,
        );
        let opts = RunOptions::default().with_timeout(LOCK_TIMEOUT + Duration::from_secs(10));
        match self.chan.run(&script, opts).await {
            Ok(_) => {
                debug!(lock = %lock_dir, "state lock acquired");
                Ok(StateGuard {
                    store: self,
                    released: false,
                })
            }
            Err(remote_exec::Error::CommandFailed {
                status: Some(code), ..
            }) if code == LOCK_TIMEOUT_EXIT => Err(Error::LockTimeout {
                path: lock_dir,
                seconds: LOCK_TIMEOUT.as_secs(),
            }),
            Err(remote_exec::Error::Timeout { .. }) => Err(Error::LockTimeout {
                path: lock_dir,
                seconds: LOCK_TIMEOUT.as_secs(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Read the application registry inside the caller's critical section
    pub async fn read_apps_with(&self, _guard: &StateGuard<'_>) -> Result<AppRegistry> {
        self.read_doc(&self.ctx.apps_doc(), AppRegistry::empty).await
    }

    /// Read the port registry inside the caller's critical section
    pub async fn read_ports_with(&self, _guard: &StateGuard<'_>) -> Result<PortRegistry> {
        self.read_doc(&self.ctx.ports_doc(), PortRegistry::empty).await
    }

    /// Read the tunnel registry inside the caller's critical section
    pub async fn read_tunnels_with(&self, _guard: &StateGuard<'_>) -> Result<TunnelRegistry> {
        self.read_doc(&self.ctx.tunnels_doc(), TunnelRegistry::empty)
            .await
    }

    /// Write the application registry inside the caller's critical section
    pub async fn write_apps_with(
        &self,
        _guard: &StateGuard<'_>,
        doc: &AppRegistry,
    ) -> Result<()> {
        self.write_doc(&self.ctx.apps_doc(), doc).await
    }

    /// Write the port registry inside the caller's critical section
    pub async fn write_ports_with(
        &self,
        _guard: &StateGuard<'_>,
        doc: &PortRegistry,
    ) -> Result<()> {
        self.write_doc(&self.ctx.ports_doc(), doc).await
    }

    /// Write the tunnel registry inside the caller's critical section
    pub async fn write_tunnels_with(
        &self,
        _guard: &StateGuard<'_>,
        doc: &TunnelRegistry,
    ) -> Result<()> {
        self.write_doc(&self.ctx.tunnels_doc(), doc).await
    }

    /// Read the application registry under its own lock acquisition
    pub async fn read_apps(&self) -> Result<AppRegistry> {
        let guard = self.lock().await?;
        let result = self.read_apps_with(&guard).await;
        guard.release().await;
        result
    }

    /// Read the port registry under its own lock acquisition
    pub async fn read_ports(&self) -> Result<PortRegistry> {
        let guard = self.lock().await?;
        let result = self.read_ports_with(&guard).await;
        guard.release().await;
        result
    }

    /// Read the tunnel registry under its own lock acquisition
    pub async fn read_tunnels(&self) -> Result<TunnelRegistry> {
        let guard = self.lock().await?;
        let result = self.read_tunnels_with(&guard).await;
        guard.release().await;
        result
    }

    /// Read-transform-write the application registry under one lock
    pub async fn update_apps<R>(
        &self,
        f: impl FnOnce(&mut AppRegistry) -> Result<R> + Send,
    ) -> Result<R> {
        let guard = self.lock().await?;
        let result = async {
            let mut doc = self.read_apps_with(&guard).await?;
            let value = f(&mut doc)?;
            self.write_apps_with(&guard, &doc).await?;
            Ok(value)
        }
        .await;
        guard.release().await;
        result
    }

    /// Read-transform-write the port registry under one lock
    pub async fn update_ports<R>(
        &self,
        f: impl FnOnce(&mut PortRegistry) -> Result<R> + Send,
    ) -> Result<R> {
        let guard = self.lock().await?;
        let result = async {
            let mut doc = self.read_ports_with(&guard).await?;
            let value = f(&mut doc)?;
            self.write_ports_with(&guard, &doc).await?;
            Ok(value)
        }
        .await;
        guard.release().await;
        result
    }

    /// Read-transform-write the tunnel registry under one lock
    pub async fn update_tunnels<R>(
        &self,
        f: impl FnOnce(&mut TunnelRegistry) -> Result<R> + Send,
    ) -> Result<R> {
        let guard = self.lock().await?;
        let result = async {
            let mut doc = self.read_tunnels_with(&guard).await?;
            let value = f(&mut doc)?;
            self.write_tunnels_with(&guard, &doc).await?;
            Ok(value)
        }
        .await;
        guard.release().await;
        result
    }

    /// Read a document; missing yields the empty shape, unparseable fails
    async fn read_doc<T: DeserializeOwned>(
        &self,
        path: &str,
        empty: impl FnOnce() -> T,
    ) -> Result<T> {
        let probe = RemoteCommand::new("test").arg("-f").arg(path).to_shell();
        match self.chan.run(&probe, RunOptions::default()).await {
            Ok(_) => {}
            Err(remote_exec::Error::CommandFailed { .. }) => return Ok(empty()),
            Err(e) => return Err(e.into()),
        }
        let bytes = self.chan.read_file(path).await?;
        serde_json::from_slice(&bytes).map_err(|e| Error::CorruptedState {
            path: path.to_string(),
            source: e,
        })
    }

    /// Write a document via temp file and atomic rename
    async fn write_doc<T: Serialize>(&self, path: &str, doc: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        let tmp = format!("{}.tmp", path);
        self.chan.write_file(&tmp, &bytes, false).await?;
        let rename = RemoteCommand::new("mv").arg("-f").arg(&tmp).arg(path).to_shell();
        self.chan.run(&rename, RunOptions::default()).await?;
        Ok(())
    }
}

impl StateGuard<'_> {
    /// Release the lock; failures are logged, not raised
    ///
    /// A release that fails leaves the lock directory behind; the
    /// `LockTimeout` remediation text covers recovery.
    pub async fn release(mut self) {
        self.released = true;
        let cmd = RemoteCommand::new("rmdir")
            .arg(self.store.ctx.lock_dir())
            .to_shell();
        if let Err(e) = self.store.chan.run(&cmd, RunOptions::default()).await {
            warn!(error = %e, "failed to release state lock");
        }
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                lock = %self.store.ctx.lock_dir(),
                "state guard dropped without release; remote lock left behind"
            );
        }
    }
}
