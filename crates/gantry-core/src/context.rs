//! Per-server remote context and path layout
//!
//! Every remote path the engine touches is derived here, rooted at the
//! server's configurable app root.

/// Default remote state root
pub const DEFAULT_APP_ROOT: &str = "/srv/gantry";

/// Per-server context for remote operations
#[derive(Debug, Clone)]
pub struct RemoteContext {
    /// Remote state root directory
    root: String,
    /// Whether privileged operations need sudo (non-root SSH user)
    needs_sudo: bool,
}

impl Default for RemoteContext {
    fn default() -> Self {
        Self {
            root: DEFAULT_APP_ROOT.to_string(),
            needs_sudo: false,
        }
    }
}

impl RemoteContext {
    /// Create a context with an explicit root
    pub fn new(root: impl Into<String>, needs_sudo: bool) -> Self {
        Self {
            root: root.into(),
            needs_sudo,
        }
    }

    /// Derive a context from SSH settings: non-root users need sudo
    pub fn for_user(ssh_user: &str, app_root: Option<&str>) -> Self {
        Self {
            root: app_root.unwrap_or(DEFAULT_APP_ROOT).to_string(),
            needs_sudo: ssh_user != "root",
        }
    }

    /// The remote state root
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Whether privileged operations go through sudo
    pub fn needs_sudo(&self) -> bool {
        self.needs_sudo
    }

    /// Path of the application registry document
    pub fn apps_doc(&self) -> String {
        format!("{}/apps.json", self.root)
    }

    /// Path of the port registry document
    pub fn ports_doc(&self) -> String {
        format!("{}/ports.json", self.root)
    }

    /// Path of the tunnel registry document
    pub fn tunnels_doc(&self) -> String {
        format!("{}/tunnels.json", self.root)
    }

    /// The advisory lock directory guarding the state documents
    pub fn lock_dir(&self) -> String {
        format!("{}/.lock", self.root)
    }

    /// Directory of per-app Caddy snippets
    pub fn caddy_apps_dir(&self) -> String {
        format!("{}/caddy/apps", self.root)
    }

    /// Directory of tunnel Caddy snippets
    pub fn caddy_tunnels_dir(&self) -> String {
        format!("{}/caddy/tunnels", self.root)
    }

    /// An application's directory
    pub fn app_dir(&self, name: &str) -> String {
        format!("{}/apps/{}", self.root, name)
    }

    /// An application's source checkout
    pub fn source_dir(&self, name: &str) -> String {
        format!("{}/source", self.app_dir(name))
    }

    /// An application's environment file
    pub fn env_file(&self, name: &str) -> String {
        format!("{}/.env", self.app_dir(name))
    }

    /// An application's generated docker-compose file
    pub fn compose_file(&self, name: &str) -> String {
        format!("{}/docker-compose.yml", self.app_dir(name))
    }

    /// An application's on-host record copy
    pub fn app_manifest(&self, name: &str) -> String {
        format!("{}/app.json", self.app_dir(name))
    }

    /// Caddy snippet path for a subdomain app
    pub fn app_caddy_file(&self, name: &str) -> String {
        format!("{}/{}.caddy", self.caddy_apps_dir(), name)
    }

    /// Caddy snippet path for a domain's merged subdirectory apps
    ///
    /// Dots map to underscores; valid hostnames cannot contain
    /// underscores, so the encoding cannot collide.
    pub fn domain_caddy_file(&self, domain: &str) -> String {
        format!(
            "{}/_subdir_{}.caddy",
            self.caddy_apps_dir(),
            domain.replace('.', "_")
        )
    }

    /// Caddy snippet path for a tunnel
    pub fn tunnel_caddy_file(&self, tunnel_id: &str) -> String {
        format!("{}/{}.caddy", self.caddy_tunnels_dir(), tunnel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let ctx = RemoteContext::default();
        assert_eq!(ctx.apps_doc(), "/srv/gantry/apps.json");
        assert_eq!(ctx.ports_doc(), "/srv/gantry/ports.json");
        assert_eq!(ctx.tunnels_doc(), "/srv/gantry/tunnels.json");
        assert_eq!(ctx.caddy_apps_dir(), "/srv/gantry/caddy/apps");
        assert_eq!(ctx.caddy_tunnels_dir(), "/srv/gantry/caddy/tunnels");
        assert_eq!(ctx.app_dir("myapp"), "/srv/gantry/apps/myapp");
        assert_eq!(ctx.source_dir("myapp"), "/srv/gantry/apps/myapp/source");
    }

    #[test]
    fn test_custom_root() {
        let ctx = RemoteContext::new("/opt/paas", true);
        assert_eq!(ctx.apps_doc(), "/opt/paas/apps.json");
        assert_eq!(ctx.app_caddy_file("foo"), "/opt/paas/caddy/apps/foo.caddy");
        assert!(ctx.needs_sudo());
    }

    #[test]
    fn test_for_user() {
        assert!(!RemoteContext::for_user("root", None).needs_sudo());
        let ctx = RemoteContext::for_user("deploy", Some("/opt/paas"));
        assert!(ctx.needs_sudo());
        assert_eq!(ctx.root(), "/opt/paas");
    }

    #[test]
    fn test_domain_caddy_file_encoding() {
        let ctx = RemoteContext::default();
        assert_eq!(
            ctx.domain_caddy_file("apps.example.com"),
            "/srv/gantry/caddy/apps/_subdir_apps_example_com.caddy"
        );
    }
}
