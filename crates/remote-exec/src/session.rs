//! SSH session over the OpenSSH CLI
//!
//! A [`SshSession`] is a scoped acquisition: `connect` establishes a
//! ControlMaster socket (with bounded retries for freshly provisioned
//! hosts), every call multiplexes over it, and `close` (or `Drop`, as a
//! fallback) tears the master down.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use async_io::Timer;
use async_process::{Command, Stdio};
use async_trait::async_trait;
use futures_lite::future;
use futures_lite::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::channel::{RemoteChannel, RunOptions};
use crate::command::shell_escape;
use crate::error::{Error, Result};

/// How many times `connect` retries before giving up
const CONNECT_RETRIES: u32 = 3;
/// Pause between connection attempts
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Deadline for establishing the master connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// SSH connection configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target host (hostname or IP)
    host: String,
    /// SSH user (optional, uses system default if not specified)
    user: Option<String>,
    /// SSH port (optional, defaults to 22)
    port: Option<u16>,
    /// Path to identity file (private key)
    identity_file: Option<PathBuf>,
    /// Additional SSH arguments
    extra_args: Vec<String>,
}

impl SshConfig {
    /// Create a new SSH configuration for the given host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity_file: None,
            extra_args: Vec::new(),
        }
    }

    /// Set the SSH user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the identity file (private key)
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Add extra SSH arguments
    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Get the host string (user@host if user is specified)
    pub fn host_string(&self) -> String {
        if let Some(user) = &self.user {
            format!("{}@{}", user, self.host)
        } else {
            self.host.clone()
        }
    }

    /// Client arguments shared by every ssh invocation against this host
    pub fn client_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string_lossy().to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// The ssh invocation rsync should use as its transport (`rsync -e`)
    pub fn transport_command(&self) -> String {
        let mut parts = vec!["ssh".to_string()];
        parts.extend(self.client_args());
        parts.join(" ")
    }
}

/// Captured result of a local helper process
#[derive(Debug)]
struct ExecOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

/// A connected, multiplexed SSH session to one host
pub struct SshSession {
    config: SshConfig,
    control_path: PathBuf,
    closed: bool,
}

impl SshSession {
    /// Connect to the host, retrying for freshly provisioned servers
    pub async fn connect(config: SshConfig) -> Result<Self> {
        let control_path = std::env::temp_dir().join(format!(
            "gantry-{}-{}.ctl",
            config.host.replace(['/', ':'], "_"),
            std::process::id()
        ));

        let mut last_reason = String::new();
        for attempt in 0..CONNECT_RETRIES {
            if attempt > 0 {
                Timer::after(CONNECT_RETRY_DELAY).await;
            }
            let mut cmd = Command::new("ssh");
            cmd.arg("-M")
                .arg("-N")
                .arg("-f")
                .arg("-o")
                .arg(format!("ControlPath={}", control_path.display()))
                .arg("-o")
                .arg("ControlPersist=yes")
                .arg("-o")
                .arg(format!("ConnectTimeout={}", CONNECT_TIMEOUT.as_secs()))
                .args(config.client_args())
                .arg(config.host_string());

            match exec(cmd, "ssh", CONNECT_TIMEOUT + Duration::from_secs(5), None).await {
                Ok(output) if output.status.success() => {
                    debug!(host = %config.host, "ssh master connection established");
                    return Ok(Self {
                        config,
                        control_path,
                        closed: false,
                    });
                }
                Ok(output) => {
                    last_reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
                }
                Err(e) => {
                    last_reason = e.to_string();
                }
            }
            debug!(
                host = %config.host,
                attempt = attempt + 1,
                reason = %last_reason,
                "ssh connection attempt failed"
            );
        }

        Err(Error::ConnectionFailed {
            host: config.host.clone(),
            reason: last_reason,
        })
    }

    /// The configuration this session was built from
    pub fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Tear down the master connection
    pub async fn close(mut self) {
        self.closed = true;
        let mut cmd = Command::new("ssh");
        cmd.arg("-O")
            .arg("exit")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg(self.config.host_string());
        if let Err(e) = exec(cmd, "ssh", Duration::from_secs(10), None).await {
            warn!(host = %self.config.host, error = %e, "failed to close ssh master");
        }
    }

    fn muxed_command(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .args(self.config.client_args())
            .arg(self.config.host_string());
        cmd
    }

    fn remote_shell(command: &str, elevate: bool) -> String {
        if elevate {
            format!("sudo -n sh -c {}", shell_escape(command))
        } else {
            command.to_string()
        }
    }
}

#[async_trait]
impl RemoteChannel for SshSession {
    async fn run(&self, command: &str, opts: RunOptions) -> Result<String> {
        let mut cmd = self.muxed_command();
        cmd.arg("--").arg(Self::remote_shell(command, opts.elevate));
        let output = exec(cmd, "ssh", opts.timeout, None)
            .await
            .map_err(|e| match e {
                Error::Timeout { seconds, .. } => Error::Timeout {
                    command: command.to_string(),
                    seconds,
                },
                other => other,
            })?;
        if !output.status.success() {
            return Err(Error::command_failed(
                command,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let command = format!("cat {}", shell_escape(path));
        let mut cmd = self.muxed_command();
        cmd.arg("--").arg(&command);
        let output = exec(cmd, "ssh", RunOptions::default().timeout, None).await?;
        if !output.status.success() {
            return Err(Error::command_failed(
                command,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(output.stdout)
    }

    async fn write_file(&self, path: &str, contents: &[u8], elevate: bool) -> Result<()> {
        let command = Self::remote_shell(&format!("cat > {}", shell_escape(path)), elevate);
        let mut cmd = self.muxed_command();
        cmd.arg("--").arg(&command);
        let output = exec(cmd, "ssh", RunOptions::default().timeout, Some(contents)).await?;
        if !output.status.success() {
            return Err(Error::command_failed(
                command,
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).into_owned(),
            ));
        }
        Ok(())
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Last-resort teardown when close() was not reached
        let _ = std::process::Command::new("ssh")
            .arg("-O")
            .arg("exit")
            .arg("-o")
            .arg(format!("ControlPath={}", self.control_path.display()))
            .arg(self.config.host_string())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status();
    }
}

/// Run a helper process for the sync module, returning status and stderr
pub(crate) async fn exec_for_sync(
    cmd: Command,
    timeout: Duration,
) -> Result<(ExitStatus, String)> {
    let output = exec(cmd, "rsync", timeout, None).await?;
    Ok((
        output.status,
        String::from_utf8_lossy(&output.stderr).into_owned(),
    ))
}

/// Run a local helper process to completion with a deadline
///
/// The child is killed if the deadline elapses.
async fn exec(
    mut cmd: Command,
    program: &str,
    timeout: Duration,
    stdin: Option<&[u8]>,
) -> Result<ExecOutput> {
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });

    let mut child = cmd.spawn().map_err(|e| Error::SpawnFailed {
        program: program.to_string(),
        reason: e.to_string(),
    })?;

    if let Some(data) = stdin {
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(data).await?;
            pipe.close().await?;
        }
    }

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();
    let read_stdout = async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stdout_pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        std::io::Result::Ok(buf)
    };
    let read_stderr = async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stderr_pipe {
            pipe.read_to_end(&mut buf).await?;
        }
        std::io::Result::Ok(buf)
    };

    let work = async {
        let ((stdout, stderr), status) =
            future::try_zip(future::try_zip(read_stdout, read_stderr), child.status()).await?;
        std::io::Result::Ok(ExecOutput {
            status,
            stdout,
            stderr,
        })
    };

    let outcome = future::or(async { Some(work.await) }, async {
        Timer::after(timeout).await;
        None
    })
    .await;

    match outcome {
        Some(result) => Ok(result?),
        None => {
            if let Err(e) = child.kill() {
                warn!(program, error = %e, "failed to kill timed-out process");
            }
            Err(Error::Timeout {
                command: program.to_string(),
                seconds: timeout.as_secs(),
            })
        }
    }
}
