//! Caddy routing configuration
//!
//! URL parsing, snippet generation, and deployment/removal of per-app
//! `.caddy` files on the host. Subdomain apps get one file each;
//! subdirectory apps sharing a domain are merged into a single file named
//! after the domain, regenerated from the registry on every change.

use std::fmt::Write as _;

use remote_exec::{RemoteChannel, RemoteCommand, RunOptions};
use tracing::{debug, info};

use crate::context::RemoteContext;
use crate::registry::{AppRegistry, DeployMethod, RoutingKind};
use crate::Result;

/// Parse a URL into `(domain, path)`
///
/// Strips an optional scheme and trailing slash. A remaining `/` means
/// subdirectory routing; the path is the first segment only.
pub fn parse_url(url: &str) -> (String, Option<String>) {
    let mut url = url.trim();
    for prefix in ["https://", "http://"] {
        if let Some(rest) = url.strip_prefix(prefix) {
            url = rest;
            break;
        }
    }
    let url = url.trim_end_matches('/');

    match url.split_once('/') {
        Some((domain, rest)) => {
            let segment = rest.split('/').next().unwrap_or(rest);
            (domain.to_string(), Some(segment.to_string()))
        }
        None => (url.to_string(), None),
    }
}

/// The routing kind a URL implies
pub fn routing_kind(url: &str) -> RoutingKind {
    match parse_url(url).1 {
        Some(_) => RoutingKind::Subdirectory,
        None => RoutingKind::Subdomain,
    }
}

/// One subdirectory app's share of a merged domain file
#[derive(Debug, Clone)]
struct SubdirApp {
    name: String,
    path: String,
    port: Option<u16>,
    method: DeployMethod,
    source_path: Option<String>,
}

/// Render the snippet for a subdomain static site
fn render_static(domain: &str, source_path: &str) -> String {
    format!(
        "{domain} {{\n    root * {source_path}\n    file_server\n    encode gzip\n}}\n"
    )
}

/// Render the snippet for a subdomain reverse proxy
fn render_proxy(domain: &str, port: u16) -> String {
    format!("{domain} {{\n    reverse_proxy localhost:{port}\n    encode gzip\n}}\n")
}

/// Render the merged snippet for every subdirectory app on a domain
fn render_subdirectory(domain: &str, apps: &[SubdirApp]) -> String {
    let mut out = format!("{domain} {{\n    encode gzip\n");
    for app in apps {
        out.push('\n');
        if app.method == DeployMethod::Static {
            let root = app.source_path.as_deref().unwrap_or("");
            let _ = write!(
                out,
                "    handle_path /{path}/* {{\n        root * {root}\n        file_server\n    }}\n",
                path = app.path,
            );
        } else {
            let _ = write!(
                out,
                "    handle_path /{path}/* {{\n        reverse_proxy localhost:{port}\n    }}\n",
                path = app.path,
                port = app.port.unwrap_or(0),
            );
        }
    }
    out.push_str("}\n");
    out
}

/// Collect every subdirectory app on `domain` from the registry
fn collect_subdirectory_apps(registry: &AppRegistry, domain: &str) -> Vec<SubdirApp> {
    let mut apps: Vec<SubdirApp> = registry
        .apps
        .values()
        .filter_map(|record| {
            let (app_domain, app_path) = parse_url(&record.url);
            let path = app_path?;
            (app_domain == domain).then(|| SubdirApp {
                name: record.name.clone(),
                path,
                port: record.port,
                method: record.method,
                source_path: record.source_path.clone(),
            })
        })
        .collect();
    apps.sort_by(|a, b| a.path.cmp(&b.path));
    apps
}

/// Generates, merges, and removes Caddy routing files
pub struct RoutingConfigBuilder<'a> {
    chan: &'a dyn RemoteChannel,
    ctx: &'a RemoteContext,
}

impl<'a> RoutingConfigBuilder<'a> {
    /// Create a builder over a connected channel
    pub fn new(chan: &'a dyn RemoteChannel, ctx: &'a RemoteContext) -> Self {
        Self { chan, ctx }
    }

    /// Write the routing config for an app and reload Caddy
    ///
    /// For subdirectory apps the registry is consulted to merge every app
    /// on the domain; `registry` must reflect the deploy in progress, so
    /// callers pass the snapshot read inside their critical section. The
    /// in-flight app is merged in even if not registered yet.
    #[allow(clippy::too_many_arguments)]
    pub async fn deploy(
        &self,
        app_name: &str,
        domain: &str,
        path: Option<&str>,
        port: Option<u16>,
        method: DeployMethod,
        source_path: Option<&str>,
        registry: &AppRegistry,
    ) -> Result<()> {
        let (config, remote_path) = if let Some(path) = path {
            let mut apps = collect_subdirectory_apps(registry, domain);
            if !apps.iter().any(|a| a.name == app_name) {
                apps.push(SubdirApp {
                    name: app_name.to_string(),
                    path: path.to_string(),
                    port,
                    method,
                    source_path: source_path.map(String::from),
                });
                apps.sort_by(|a, b| a.path.cmp(&b.path));
            }
            (
                render_subdirectory(domain, &apps),
                self.ctx.domain_caddy_file(domain),
            )
        } else if method == DeployMethod::Static {
            (
                render_static(domain, source_path.unwrap_or("")),
                self.ctx.app_caddy_file(app_name),
            )
        } else {
            (
                render_proxy(domain, port.unwrap_or(0)),
                self.ctx.app_caddy_file(app_name),
            )
        };

        debug!(app = app_name, file = %remote_path, "writing routing config");
        self.chan
            .write_file(&remote_path, config.as_bytes(), false)
            .await?;
        self.reload().await
    }

    /// Remove an app's routing config and reload Caddy
    ///
    /// For subdirectory apps the merged domain file is regenerated from
    /// `registry` (which must no longer contain the removed app) and
    /// deleted entirely once no apps remain on the domain.
    pub async fn remove(
        &self,
        app_name: &str,
        domain: &str,
        path: Option<&str>,
        registry: &AppRegistry,
    ) -> Result<()> {
        if path.is_some() {
            let apps: Vec<SubdirApp> = collect_subdirectory_apps(registry, domain)
                .into_iter()
                .filter(|a| a.name != app_name)
                .collect();
            let remote_path = self.ctx.domain_caddy_file(domain);
            if apps.is_empty() {
                self.remove_file(&remote_path).await?;
            } else {
                let config = render_subdirectory(domain, &apps);
                self.chan
                    .write_file(&remote_path, config.as_bytes(), false)
                    .await?;
            }
        } else {
            self.remove_file(&self.ctx.app_caddy_file(app_name)).await?;
        }
        self.reload().await
    }

    /// Reload the reverse proxy; cheap and idempotent
    pub async fn reload(&self) -> Result<()> {
        info!("reloading caddy");
        let opts = if self.ctx.needs_sudo() {
            RunOptions::elevated()
        } else {
            RunOptions::default()
        };
        self.chan.run("systemctl reload caddy", opts).await?;
        Ok(())
    }

    async fn remove_file(&self, path: &str) -> Result<()> {
        let cmd = RemoteCommand::new("rm").arg("-f").arg(path).to_shell();
        self.chan.run(&cmd, RunOptions::default()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{AppRecord, SourceKind};
    use remote_exec::mock::MockChannel;
    use std::collections::BTreeMap;

    #[test]
    fn test_parse_url_subdomain() {
        assert_eq!(
            parse_url("myapp.apps.example.com"),
            ("myapp.apps.example.com".to_string(), None)
        );
        assert_eq!(
            parse_url("https://myapp.apps.example.com/"),
            ("myapp.apps.example.com".to_string(), None)
        );
    }

    #[test]
    fn test_parse_url_subdirectory() {
        assert_eq!(
            parse_url("apps.example.com/myapp"),
            ("apps.example.com".to_string(), Some("myapp".to_string()))
        );
        assert_eq!(
            parse_url("http://apps.example.com/docs/"),
            ("apps.example.com".to_string(), Some("docs".to_string()))
        );
        // Only the first path segment counts
        assert_eq!(
            parse_url("apps.example.com/docs/v2"),
            ("apps.example.com".to_string(), Some("docs".to_string()))
        );
    }

    #[test]
    fn test_routing_kind() {
        assert_eq!(routing_kind("a.example.com"), RoutingKind::Subdomain);
        assert_eq!(routing_kind("example.com/a"), RoutingKind::Subdirectory);
    }

    #[test]
    fn test_render_static() {
        let config = render_static("mysite.apps.example.com", "/srv/gantry/apps/mysite/source");
        assert!(config.contains("mysite.apps.example.com {"));
        assert!(config.contains("root * /srv/gantry/apps/mysite/source"));
        assert!(config.contains("file_server"));
    }

    #[test]
    fn test_render_proxy() {
        let config = render_proxy("myapp.apps.example.com", 10000);
        assert!(config.contains("reverse_proxy localhost:10000"));
        assert!(config.contains("encode gzip"));
    }

    fn record(name: &str, url: &str, port: Option<u16>, method: DeployMethod) -> AppRecord {
        AppRecord {
            name: name.to_string(),
            method,
            url: url.to_string(),
            routing: routing_kind(url),
            port,
            container_port: None,
            source: None,
            source_type: Some(SourceKind::Local),
            source_path: Some(format!("/srv/gantry/apps/{}/source", name)),
            branch: None,
            systemd_unit: None,
            status: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            meta: None,
            exclude: Vec::new(),
            gitignore: None,
            volumes: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    fn registry(records: Vec<AppRecord>) -> AppRegistry {
        let mut registry = AppRegistry::empty();
        for r in records {
            registry.apps.insert(r.name.clone(), r);
        }
        registry
    }

    #[smol_potat::test]
    async fn test_deploy_subdomain_writes_one_file_and_reloads() {
        let chan = MockChannel::new();
        let ctx = RemoteContext::default();
        let builder = RoutingConfigBuilder::new(&chan, &ctx);

        builder
            .deploy(
                "myapp",
                "myapp.apps.example.com",
                None,
                Some(10000),
                DeployMethod::Command,
                None,
                &AppRegistry::empty(),
            )
            .await
            .unwrap();

        let config = chan
            .file("/srv/gantry/caddy/apps/myapp.caddy")
            .expect("caddy file written");
        assert!(config.contains("reverse_proxy localhost:10000"));
        assert!(chan.ran("systemctl reload caddy"));
    }

    #[smol_potat::test]
    async fn test_subdirectory_merge_and_removal() {
        let chan = MockChannel::new();
        let ctx = RemoteContext::default();
        let builder = RoutingConfigBuilder::new(&chan, &ctx);
        let merged_path = "/srv/gantry/caddy/apps/_subdir_d_com.caddy";

        // "blog" deploys first; the registry does not contain it yet
        let reg = registry(vec![record("blog", "d.com/blog", Some(10000), DeployMethod::Command)]);
        builder
            .deploy("blog", "d.com", Some("blog"), Some(10000), DeployMethod::Command, None, &AppRegistry::empty())
            .await
            .unwrap();

        // "docs" joins: one merged file referencing both
        builder
            .deploy("docs", "d.com", Some("docs"), Some(10001), DeployMethod::Command, None, &reg)
            .await
            .unwrap();
        let config = chan.file(merged_path).unwrap();
        assert!(config.contains("handle_path /blog/*"));
        assert!(config.contains("handle_path /docs/*"));
        assert!(config.contains("reverse_proxy localhost:10001"));

        // Removing "blog" regenerates the file referencing only "docs"
        let after_blog = registry(vec![record("docs", "d.com/docs", Some(10001), DeployMethod::Command)]);
        builder
            .remove("blog", "d.com", Some("blog"), &after_blog)
            .await
            .unwrap();
        let config = chan.file(merged_path).unwrap();
        assert!(!config.contains("handle_path /blog/*"));
        assert!(config.contains("handle_path /docs/*"));

        // Removing "docs" deletes the file entirely
        builder
            .remove("docs", "d.com", Some("docs"), &AppRegistry::empty())
            .await
            .unwrap();
        assert!(chan.file(merged_path).is_none());
    }

    #[smol_potat::test]
    async fn test_subdirectory_static_app_uses_file_server() {
        let chan = MockChannel::new();
        let ctx = RemoteContext::default();
        let builder = RoutingConfigBuilder::new(&chan, &ctx);

        builder
            .deploy(
                "docs",
                "apps.example.com",
                Some("docs"),
                None,
                DeployMethod::Static,
                Some("/srv/gantry/apps/docs/source"),
                &AppRegistry::empty(),
            )
            .await
            .unwrap();

        let config = chan
            .file("/srv/gantry/caddy/apps/_subdir_apps_example_com.caddy")
            .unwrap();
        assert!(config.contains("handle_path /docs/*"));
        assert!(config.contains("file_server"));
        assert!(config.contains("root * /srv/gantry/apps/docs/source"));
    }

    #[smol_potat::test]
    async fn test_remove_subdomain_deletes_app_file() {
        let chan = MockChannel::new();
        let ctx = RemoteContext::default();
        let builder = RoutingConfigBuilder::new(&chan, &ctx);
        chan.seed_file("/srv/gantry/caddy/apps/myapp.caddy", &b"stale"[..]);

        builder
            .remove("myapp", "myapp.apps.example.com", None, &AppRegistry::empty())
            .await
            .unwrap();
        assert!(chan.file("/srv/gantry/caddy/apps/myapp.caddy").is_none());
        assert!(chan.ran("systemctl reload caddy"));
    }
}
