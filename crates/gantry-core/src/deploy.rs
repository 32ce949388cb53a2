//! Deployment orchestration
//!
//! Drives a deploy end to end: validate, transfer source, allocate a
//! port, write the environment file, build images and units as the
//! method requires, then commit routing and registry together under a
//! single state-lock acquisition so concurrent deploys to a shared
//! domain cannot interleave between the two writes.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use remote_exec::{shell_escape, RemoteChannel, RemoteCommand, RunOptions};
use tracing::info;

use crate::context::RemoteContext;
use crate::ports;
use crate::registry::{AppRecord, DeployMethod, SourceKind};
use crate::routing::{parse_url, routing_kind, RoutingConfigBuilder};
use crate::source::{SourceTransfer, TransferOptions};
use crate::store::RemoteStateStore;
use crate::systemd::Systemd;
use crate::validate::{
    validate_app_name, validate_branch, validate_domain, validate_path_segment,
};
use crate::{runtime, Error, Result};

/// Deadline for container image builds
const BUILD_TIMEOUT: Duration = Duration::from_secs(600);

/// Container port used when the caller does not specify one
const DEFAULT_CONTAINER_PORT: u16 = 3000;

/// Everything a deploy needs, resolved by the caller
#[derive(Debug, Clone, Default)]
pub struct DeployRequest {
    /// Application name
    pub name: String,
    /// Deployment method; `Static` is the all-defaults value
    pub method: Option<DeployMethod>,
    /// Public URL
    pub url: String,
    /// Source path or git URL
    pub source: Option<String>,
    /// Explicit host port; allocated when absent and needed
    pub port: Option<u16>,
    /// Container port for image-based methods
    pub container_port: Option<u16>,
    /// Start command
    pub command: Option<String>,
    /// Setup command overriding the runtime default
    pub setup_command: Option<String>,
    /// Git branch
    pub branch: Option<String>,
    /// Environment variables written to the app's `.env`
    pub env: BTreeMap<String, String>,
    /// Verbatim environment-file content, appended before `env`
    pub env_file_content: Option<String>,
    /// Free-form metadata recorded in the registry
    pub meta: BTreeMap<String, String>,
    /// Upload exclude patterns
    pub exclude: Vec<String>,
    /// Honor `.gitignore` during upload
    pub gitignore: bool,
    /// Container volume mounts
    pub volumes: Vec<String>,
    /// Explicit creation timestamp, replacing the clock's
    pub created_at: Option<chrono::DateTime<Utc>>,
    /// Explicit update timestamp, replacing the clock's
    pub updated_at: Option<chrono::DateTime<Utc>>,
    /// Arbitrary extra fields recorded verbatim on the registry entry
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DeployRequest {
    fn method(&self) -> DeployMethod {
        self.method.unwrap_or(DeployMethod::Static)
    }

    fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            exclude: self.exclude.clone(),
            gitignore: self.gitignore,
        }
    }
}

/// The per-application lifecycle state machine
pub struct Orchestrator<'a> {
    pub(crate) chan: &'a dyn RemoteChannel,
    pub(crate) transfer: &'a dyn SourceTransfer,
    pub(crate) ctx: RemoteContext,
}

impl<'a> Orchestrator<'a> {
    /// Create an orchestrator over a connected channel
    pub fn new(
        chan: &'a dyn RemoteChannel,
        transfer: &'a dyn SourceTransfer,
        ctx: RemoteContext,
    ) -> Self {
        Self {
            chan,
            transfer,
            ctx,
        }
    }

    pub(crate) fn store(&self) -> RemoteStateStore<'_> {
        RemoteStateStore::new(self.chan, self.ctx.clone())
    }

    pub(crate) fn systemd(&self) -> Systemd<'_> {
        Systemd::new(self.chan, &self.ctx)
    }

    pub(crate) fn routing(&self) -> RoutingConfigBuilder<'_> {
        RoutingConfigBuilder::new(self.chan, &self.ctx)
    }

    /// Deploy an application
    ///
    /// Fails fast on validation and forward-path remote errors; nothing
    /// is registered unless every step succeeded.
    pub async fn deploy(&self, req: &DeployRequest) -> Result<AppRecord> {
        let method = req.method();
        let (domain, path) = validate_request(req)?;
        info!(app = %req.name, %method, url = %req.url, "deploying");

        // Source transfer (every method except a bare command needs one)
        let app_dir = self.ctx.app_dir(&req.name);
        let source_dir = self.ctx.source_dir(&req.name);
        let mkdir = RemoteCommand::new("mkdir").arg("-p").arg(&app_dir).to_shell();
        self.chan.run(&mkdir, RunOptions::default()).await?;

        let mut source_type = None;
        if let Some(source) = &req.source {
            source_type = Some(
                self.transfer
                    .transfer(source, &source_dir, req.branch.as_deref(), &req.transfer_options())
                    .await?,
            );
        }

        // Port allocation, idempotent per app name
        let store = self.store();
        let port = if method.needs_port() {
            let name = req.name.clone();
            Some(match req.port {
                Some(explicit) => {
                    store
                        .update_ports(move |ports| {
                            ports::register(ports, explicit, &name)?;
                            Ok(explicit)
                        })
                        .await?
                }
                None => {
                    store
                        .update_ports(move |ports| Ok(ports::allocate(ports, &name)))
                        .await?
                }
            })
        } else {
            None
        };

        // Environment file with restrictive permissions
        let env_path = self
            .write_env_file(&req.name, &req.env, req.env_file_content.as_deref())
            .await?;

        // Method-specific build and supervision
        let container_port = req.container_port.unwrap_or(DEFAULT_CONTAINER_PORT);
        let mut systemd_unit = None;
        let mut detected_runtime = None;
        match method {
            DeployMethod::Static => {}
            DeployMethod::Command => {
                let command = req.command.as_deref().unwrap_or_default();
                let unit = render_unit(&UnitSpec {
                    name: &req.name,
                    working_dir: if req.source.is_some() { &source_dir } else { &app_dir },
                    exec_start: &format!("/bin/sh -c {}", shell_escape(command)),
                    exec_stop: None,
                    env_file: env_path.as_deref(),
                    port,
                    wants_docker: false,
                });
                systemd_unit = Some(self.install_and_start(&req.name, &unit).await?);
            }
            DeployMethod::DockerCompose => {
                let unit = render_unit(&UnitSpec {
                    name: &req.name,
                    working_dir: &source_dir,
                    exec_start: "/usr/bin/docker compose up",
                    exec_stop: Some("/usr/bin/docker compose down"),
                    env_file: env_path.as_deref(),
                    port,
                    wants_docker: true,
                });
                systemd_unit = Some(self.install_and_start(&req.name, &unit).await?);
            }
            DeployMethod::Dockerfile | DeployMethod::Auto => {
                if method == DeployMethod::Auto {
                    let rt = self.detect_runtime(req, &source_dir).await?;
                    detected_runtime = Some(rt.name.to_string());
                    info!(runtime = rt.name, "detected runtime");
                    let dockerfile = runtime::generate_dockerfile(
                        &rt,
                        container_port,
                        req.command.as_deref().unwrap_or_default(),
                        req.setup_command.as_deref(),
                    );
                    self.chan
                        .write_file(
                            &format!("{}/Dockerfile", source_dir),
                            dockerfile.as_bytes(),
                            false,
                        )
                        .await?;
                }
                let image = self.build_image(&req.name, &source_dir).await?;
                let compose = render_compose(
                    &image,
                    port.unwrap_or(0),
                    container_port,
                    env_path.is_some(),
                    &req.volumes,
                );
                self.chan
                    .write_file(&self.ctx.compose_file(&req.name), compose.as_bytes(), false)
                    .await?;
                let unit = render_unit(&UnitSpec {
                    name: &req.name,
                    working_dir: &app_dir,
                    exec_start: "/usr/bin/docker compose up",
                    exec_stop: Some("/usr/bin/docker compose down"),
                    env_file: None,
                    port: None,
                    wants_docker: true,
                });
                systemd_unit = Some(self.install_and_start(&req.name, &unit).await?);
            }
        }

        // Build the registry record
        let now = Utc::now();
        let created_at = req.created_at.unwrap_or(now);
        let updated_at = req.updated_at.unwrap_or(now);
        let mut record = AppRecord {
            name: req.name.clone(),
            method,
            url: req.url.clone(),
            routing: routing_kind(&req.url),
            port,
            container_port: method.builds_image().then_some(container_port),
            source: req.source.clone(),
            source_type,
            source_path: req.source.is_some().then(|| source_dir.clone()),
            branch: req.branch.clone(),
            systemd_unit,
            status: Some(
                if method == DeployMethod::Static {
                    "serving"
                } else {
                    "active"
                }
                .to_string(),
            ),
            created_at,
            updated_at,
            meta: (!req.meta.is_empty()).then(|| req.meta.clone()),
            exclude: req.exclude.clone(),
            gitignore: (!req.gitignore).then_some(false),
            volumes: req.volumes.clone(),
            extra: req.extra.clone(),
        };
        if let Some(rt) = detected_runtime {
            record
                .extra
                .insert("auto_detected_runtime".to_string(), rt.into());
        }

        // Routing and registry commit under one lock acquisition: the
        // merged subdirectory file must be generated from the registry
        // state this deploy is about to write, not a stale snapshot.
        let guard = store.lock().await?;
        let commit: Result<()> = async {
            let mut apps = store.read_apps_with(&guard).await?;
            self.routing()
                .deploy(
                    &req.name,
                    &domain,
                    path.as_deref(),
                    port,
                    method,
                    record.source_path.as_deref(),
                    &apps,
                )
                .await?;
            if req.created_at.is_none() {
                if let Some(existing) = apps.apps.get(&req.name) {
                    record.created_at = existing.created_at;
                }
            }
            apps.apps.insert(req.name.clone(), record.clone());
            store.write_apps_with(&guard, &apps).await?;
            Ok(())
        }
        .await;
        guard.release().await;
        commit?;

        // Per-app record copy, convenient for on-host inspection
        self.chan
            .write_file(
                &self.ctx.app_manifest(&req.name),
                &serde_json::to_vec_pretty(&record)?,
                false,
            )
            .await?;

        info!(app = %req.name, url = %req.url, "deployed");
        Ok(record)
    }

    /// Redeploy a registered application from its recorded source
    pub async fn redeploy(&self, name: &str) -> Result<AppRecord> {
        let store = self.store();
        let apps = store.read_apps().await?;
        let record = apps
            .apps
            .get(name)
            .cloned()
            .ok_or_else(|| Error::AppNotFound(name.to_string()))?;
        info!(app = name, "redeploying");

        let source_dir = self.ctx.source_dir(name);
        if let Some(kind) = record.source_type {
            let opts = TransferOptions {
                exclude: record.exclude.clone(),
                gitignore: record.gitignore.unwrap_or(true),
            };
            self.transfer
                .update(
                    kind,
                    record.source.as_deref().unwrap_or_default(),
                    &source_dir,
                    record.branch.as_deref(),
                    &opts,
                )
                .await?;
        }

        if record.method.builds_image() {
            self.build_image(name, &source_dir).await?;
        }

        if record.method.has_unit() {
            self.systemd().restart(name).await?;
        } else {
            // Static apps are served directly; a reload picks up changes
            self.routing().reload().await?;
        }

        store
            .update_apps(|apps| {
                let entry = apps
                    .apps
                    .get_mut(name)
                    .ok_or_else(|| Error::AppNotFound(name.to_string()))?;
                entry.updated_at = Utc::now();
                Ok(entry.clone())
            })
            .await
    }

    async fn install_and_start(&self, name: &str, unit: &str) -> Result<String> {
        let systemd = self.systemd();
        let unit_name = systemd.install_unit(name, unit).await?;
        systemd.enable(name).await?;
        systemd.start(name).await?;
        Ok(unit_name)
    }

    async fn build_image(&self, name: &str, source_dir: &str) -> Result<String> {
        let image = format!("gantry-{}", name);
        info!(%image, "building container image");
        let cmd = RemoteCommand::new("docker")
            .arg("build")
            .arg("-t")
            .arg(&image)
            .arg(source_dir)
            .to_shell();
        self.chan
            .run(&cmd, RunOptions::default().with_timeout(BUILD_TIMEOUT))
            .await?;
        Ok(image)
    }

    async fn detect_runtime(
        &self,
        req: &DeployRequest,
        source_dir: &str,
    ) -> Result<runtime::Runtime> {
        let local = req
            .source
            .as_deref()
            .filter(|s| !crate::source::is_git_url(s))
            .and_then(|s| runtime::detect_runtime(Path::new(s)));
        let detected = match local {
            Some(rt) => Some(rt),
            None => runtime::detect_runtime_remote(self.chan, source_dir).await?,
        };
        detected.ok_or_else(|| {
            Error::validation(
                "source",
                format!(
                    "could not detect a runtime for '{}'; provide a Dockerfile or use --method dockerfile",
                    req.name
                ),
            )
        })
    }

    /// Write the app's `.env` with mode 0600, returning its path
    async fn write_env_file(
        &self,
        name: &str,
        env: &BTreeMap<String, String>,
        extra_content: Option<&str>,
    ) -> Result<Option<String>> {
        if env.is_empty() && extra_content.is_none() {
            return Ok(None);
        }
        let mut content = String::new();
        if let Some(extra) = extra_content {
            content.push_str(extra);
            if !content.ends_with('\n') {
                content.push('\n');
            }
        }
        for (key, value) in env {
            content.push_str(&format!("{}=\"{}\"\n", key, value));
        }

        let dest = self.ctx.env_file(name);
        let tmp = format!("{}.tmp", dest);
        self.chan.write_file(&tmp, content.as_bytes(), false).await?;
        let install = format!(
            "install -m 600 {tmp} {dest} && rm -f {tmp}",
            tmp = shell_escape(&tmp),
            dest = shell_escape(&dest),
        );
        self.chan.run(&install, RunOptions::default()).await?;
        Ok(Some(dest))
    }
}

fn validate_request(req: &DeployRequest) -> Result<(String, Option<String>)> {
    validate_app_name(&req.name)?;
    let (domain, path) = parse_url(&req.url);
    validate_domain(&domain)?;
    if let Some(path) = &path {
        validate_path_segment(path)?;
    }
    if let Some(branch) = &req.branch {
        validate_branch(branch)?;
    }

    let method = req.method();
    match method {
        DeployMethod::Command => {
            if req.command.is_none() {
                return Err(Error::MissingParameter {
                    method: method.to_string(),
                    what: "a start command",
                });
            }
        }
        DeployMethod::Auto => {
            if req.command.is_none() {
                return Err(Error::MissingParameter {
                    method: method.to_string(),
                    what: "a start command",
                });
            }
            if req.source.is_none() {
                return Err(Error::MissingParameter {
                    method: method.to_string(),
                    what: "a source",
                });
            }
        }
        DeployMethod::Static | DeployMethod::DockerCompose | DeployMethod::Dockerfile => {
            if req.source.is_none() {
                return Err(Error::MissingParameter {
                    method: method.to_string(),
                    what: "a source",
                });
            }
        }
    }
    Ok((domain, path))
}

struct UnitSpec<'s> {
    name: &'s str,
    working_dir: &'s str,
    exec_start: &'s str,
    exec_stop: Option<&'s str>,
    env_file: Option<&'s str>,
    port: Option<u16>,
    wants_docker: bool,
}

/// Render a systemd unit definition
fn render_unit(spec: &UnitSpec<'_>) -> String {
    let mut out = String::new();
    out.push_str("[Unit]\n");
    out.push_str(&format!("Description=gantry app {}\n", spec.name));
    if spec.wants_docker {
        out.push_str("After=network.target docker.service\n");
        out.push_str("Requires=docker.service\n");
    } else {
        out.push_str("After=network.target\n");
    }
    out.push_str("\n[Service]\n");
    out.push_str(&format!("WorkingDirectory={}\n", spec.working_dir));
    if let Some(port) = spec.port {
        out.push_str(&format!("Environment=\"PORT={}\"\n", port));
    }
    if let Some(env_file) = spec.env_file {
        out.push_str(&format!("EnvironmentFile={}\n", env_file));
    }
    out.push_str(&format!("ExecStart={}\n", spec.exec_start));
    if let Some(exec_stop) = spec.exec_stop {
        out.push_str(&format!("ExecStop={}\n", exec_stop));
    }
    out.push_str("Restart=on-failure\nRestartSec=3\n");
    out.push_str("\n[Install]\nWantedBy=multi-user.target\n");
    out
}

/// Render the docker-compose file for an image-based deployment
fn render_compose(
    image: &str,
    port: u16,
    container_port: u16,
    env_file: bool,
    volumes: &[String],
) -> String {
    let mut out = String::from("services:\n  app:\n");
    out.push_str(&format!("    image: {}\n", image));
    out.push_str("    restart: unless-stopped\n");
    out.push_str("    ports:\n");
    out.push_str(&format!("      - \"{}:{}\"\n", port, container_port));
    if env_file {
        out.push_str("    env_file:\n      - .env\n");
    }
    if !volumes.is_empty() {
        out.push_str("    volumes:\n");
        for volume in volumes {
            out.push_str(&format!("      - {}\n", volume));
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::SourceKind;
    use async_trait::async_trait;
    use remote_exec::mock::MockChannel;
    use std::sync::Mutex;

    /// Transfer stub: records calls, touches nothing
    #[derive(Default)]
    pub(crate) struct StubTransfer {
        pub calls: Mutex<Vec<String>>,
        pub kind: Option<SourceKind>,
    }

    impl StubTransfer {
        pub fn git() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                kind: Some(SourceKind::Git),
            }
        }

        pub fn local() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                kind: Some(SourceKind::Local),
            }
        }
    }

    #[async_trait]
    impl SourceTransfer for StubTransfer {
        async fn transfer(
            &self,
            source: &str,
            dest: &str,
            _branch: Option<&str>,
            _opts: &TransferOptions,
        ) -> Result<SourceKind> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("transfer {} -> {}", source, dest));
            Ok(self.kind.unwrap_or(SourceKind::Local))
        }

        async fn update(
            &self,
            _kind: SourceKind,
            source: &str,
            dest: &str,
            _branch: Option<&str>,
            _opts: &TransferOptions,
        ) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("update {} -> {}", source, dest));
            Ok(())
        }
    }

    fn request(name: &str, method: DeployMethod, url: &str) -> DeployRequest {
        DeployRequest {
            name: name.to_string(),
            method: Some(method),
            url: url.to_string(),
            source: Some("/tmp/src".to_string()),
            gitignore: true,
            ..DeployRequest::default()
        }
    }

    #[test]
    fn test_render_unit_command() {
        let unit = render_unit(&UnitSpec {
            name: "myapp",
            working_dir: "/srv/gantry/apps/myapp/source",
            exec_start: "/bin/sh -c 'python app.py'",
            exec_stop: None,
            env_file: None,
            port: Some(10000),
            wants_docker: false,
        });
        assert!(unit.contains("python app.py"));
        assert!(unit.contains("Environment=\"PORT=10000\""));
        assert!(unit.contains("WorkingDirectory=/srv/gantry/apps/myapp/source"));
        assert!(unit.contains("WantedBy=multi-user.target"));
        assert!(!unit.contains("docker.service"));
    }

    #[test]
    fn test_render_unit_compose() {
        let unit = render_unit(&UnitSpec {
            name: "mystack",
            working_dir: "/srv/gantry/apps/mystack/source",
            exec_start: "/usr/bin/docker compose up",
            exec_stop: Some("/usr/bin/docker compose down"),
            env_file: None,
            port: None,
            wants_docker: true,
        });
        assert!(unit.contains("docker compose up"));
        assert!(unit.contains("docker compose down"));
        assert!(unit.contains("docker.service"));
    }

    #[test]
    fn test_render_compose() {
        let compose = render_compose(
            "gantry-webapp",
            10000,
            8080,
            false,
            &["./data:/app/data".to_string(), "/var/logs:/app/logs:ro".to_string()],
        );
        assert!(compose.contains("image: gantry-webapp"));
        assert!(compose.contains("\"10000:8080\""));
        assert!(compose.contains("- ./data:/app/data"));
        assert!(compose.contains("- /var/logs:/app/logs:ro"));
        assert!(!compose.contains("env_file"));
    }

    #[test]
    fn test_validate_missing_parameters() {
        let mut req = request("myapp", DeployMethod::Command, "myapp.example.com");
        req.command = None;
        assert!(matches!(
            validate_request(&req),
            Err(Error::MissingParameter { what: "a start command", .. })
        ));

        let mut req = request("mysite", DeployMethod::Static, "mysite.example.com");
        req.source = None;
        assert!(matches!(
            validate_request(&req),
            Err(Error::MissingParameter { what: "a source", .. })
        ));

        let req = request("Bad_Name", DeployMethod::Static, "mysite.example.com");
        assert!(matches!(validate_request(&req), Err(Error::Validation { .. })));
    }

    #[smol_potat::test]
    async fn test_deploy_static_subdomain() {
        let chan = MockChannel::new();
        let transfer = StubTransfer::local();
        let orch = Orchestrator::new(&chan, &transfer, RemoteContext::default());

        let record = orch
            .deploy(&request("mysite", DeployMethod::Static, "mysite.apps.example.com"))
            .await
            .unwrap();

        // Source was transferred
        assert_eq!(transfer.calls.lock().unwrap().len(), 1);
        // Caddy config written with a file server
        let caddy = chan.file("/srv/gantry/caddy/apps/mysite.caddy").unwrap();
        assert!(caddy.contains("mysite.apps.example.com"));
        assert!(caddy.contains("file_server"));
        // Registered with the right shape
        let apps = chan.file("/srv/gantry/apps.json").unwrap();
        assert!(apps.contains("\"mysite\""));
        assert!(apps.contains("\"method\": \"static\""));
        assert!(apps.contains("\"status\": \"serving\""));
        assert!(apps.contains("\"source_type\": \"local\""));
        // No port, no unit for static sites
        assert_eq!(record.port, None);
        assert_eq!(record.systemd_unit, None);
        assert!(!chan.ran("systemctl start"));
        // Per-app record copy written
        assert!(chan.file("/srv/gantry/apps/mysite/app.json").is_some());
    }

    #[smol_potat::test]
    async fn test_deploy_command_allocates_port_and_unit() {
        let chan = MockChannel::new();
        let transfer = StubTransfer::local();
        let orch = Orchestrator::new(&chan, &transfer, RemoteContext::default());

        let mut req = request("myapp", DeployMethod::Command, "myapp.apps.example.com");
        req.command = Some("python app.py".to_string());
        req.env.insert("SECRET".to_string(), "abc123".to_string());
        let record = orch.deploy(&req).await.unwrap();

        assert_eq!(record.port, Some(10000));
        assert_eq!(record.systemd_unit.as_deref(), Some("gantry-myapp.service"));

        let unit = chan
            .file("/etc/systemd/system/gantry-myapp.service")
            .unwrap();
        assert!(unit.contains("python app.py"));
        assert!(unit.contains("\"PORT=10000\""));
        assert!(unit.contains("EnvironmentFile=/srv/gantry/apps/myapp/.env"));

        // .env written then installed with restrictive permissions
        let env = chan.file("/srv/gantry/apps/myapp/.env").unwrap();
        assert!(env.contains("SECRET=\"abc123\""));
        assert!(chan.ran("install -m 600"));

        // Unit enabled and started, proxy configured
        assert!(chan.ran("systemctl enable gantry-myapp.service"));
        assert!(chan.ran("systemctl start gantry-myapp.service"));
        let caddy = chan.file("/srv/gantry/caddy/apps/myapp.caddy").unwrap();
        assert!(caddy.contains("reverse_proxy localhost:10000"));
    }

    #[smol_potat::test]
    async fn test_deploy_dockerfile_builds_image_and_compose() {
        let chan = MockChannel::new();
        let transfer = StubTransfer::local();
        let orch = Orchestrator::new(&chan, &transfer, RemoteContext::default());

        let mut req = request("webapp", DeployMethod::Dockerfile, "webapp.apps.example.com");
        req.container_port = Some(8080);
        req.volumes = vec!["./data:/app/data".to_string()];
        let record = orch.deploy(&req).await.unwrap();

        assert!(chan.ran("docker build -t gantry-webapp /srv/gantry/apps/webapp/source"));
        let compose = chan
            .file("/srv/gantry/apps/webapp/docker-compose.yml")
            .unwrap();
        assert!(compose.contains("image: gantry-webapp"));
        assert!(compose.contains("\"10000:8080\""));
        assert!(compose.contains("./data:/app/data"));
        assert_eq!(record.container_port, Some(8080));

        let apps = chan.file("/srv/gantry/apps.json").unwrap();
        assert!(apps.contains("\"method\": \"dockerfile\""));
        assert!(apps.contains("\"container_port\": 8080"));
    }

    #[smol_potat::test]
    async fn test_deploy_auto_detects_remote_runtime() {
        let chan = MockChannel::new();
        chan.seed_file("/srv/gantry/apps/api/source/package.json", &b"{}"[..]);
        let transfer = StubTransfer::git();
        let orch = Orchestrator::new(&chan, &transfer, RemoteContext::default());

        let mut req = request("api", DeployMethod::Auto, "api.apps.example.com");
        req.source = Some("https://github.com/user/api.git".to_string());
        req.command = Some("node server.js".to_string());
        let record = orch.deploy(&req).await.unwrap();

        let dockerfile = chan.file("/srv/gantry/apps/api/source/Dockerfile").unwrap();
        assert!(dockerfile.contains("FROM node:22"));
        assert!(dockerfile.contains("node server.js"));
        assert_eq!(
            record.extra.get("auto_detected_runtime").and_then(|v| v.as_str()),
            Some("nodejs")
        );
        assert!(chan.ran("docker build -t gantry-api"));
    }

    #[smol_potat::test]
    async fn test_deploy_explicit_port_conflict() {
        let chan = MockChannel::new();
        chan.seed_file(
            "/srv/gantry/ports.json",
            &serde_json::to_vec(&serde_json::json!({
                "next_port": 10001,
                "allocated": {"10000": "other"}
            }))
            .unwrap()[..],
        );
        let transfer = StubTransfer::local();
        let orch = Orchestrator::new(&chan, &transfer, RemoteContext::default());

        let mut req = request("myapp", DeployMethod::Command, "myapp.apps.example.com");
        req.command = Some("run".to_string());
        req.port = Some(10000);
        let err = orch.deploy(&req).await.unwrap_err();
        assert!(matches!(err, Error::PortConflict { port: 10000, .. }));
    }

    #[smol_potat::test]
    async fn test_deploy_preserves_created_at_on_overwrite() {
        let chan = MockChannel::new();
        let transfer = StubTransfer::local();
        let orch = Orchestrator::new(&chan, &transfer, RemoteContext::default());

        let req = request("mysite", DeployMethod::Static, "mysite.apps.example.com");
        let first = orch.deploy(&req).await.unwrap();
        let second = orch.deploy(&req).await.unwrap();
        assert_eq!(first.created_at, second.created_at);
    }

    #[smol_potat::test]
    async fn test_redeploy_unknown_app() {
        let chan = MockChannel::new();
        let transfer = StubTransfer::local();
        let orch = Orchestrator::new(&chan, &transfer, RemoteContext::default());
        assert!(matches!(
            orch.redeploy("ghost").await,
            Err(Error::AppNotFound(_))
        ));
    }

    #[smol_potat::test]
    async fn test_redeploy_pulls_rebuilds_restarts() {
        let chan = MockChannel::new();
        chan.seed_file("/srv/gantry/apps/api/source/package.json", &b"{}"[..]);
        let transfer = StubTransfer::git();
        let orch = Orchestrator::new(&chan, &transfer, RemoteContext::default());

        let mut req = request("api", DeployMethod::Auto, "api.apps.example.com");
        req.source = Some("https://github.com/user/api.git".to_string());
        req.command = Some("node server.js".to_string());
        let deployed = orch.deploy(&req).await.unwrap();

        let updated = orch.redeploy("api").await.unwrap();
        assert!(updated.updated_at >= deployed.updated_at);
        assert_eq!(updated.created_at, deployed.created_at);

        let calls = transfer.calls.lock().unwrap();
        assert!(calls.iter().any(|c| c.starts_with("update ")));
        drop(calls);
        assert!(chan.ran("systemctl restart gantry-api.service"));
    }
}
