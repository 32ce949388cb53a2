//! Persisted state documents
//!
//! Three JSON documents live on the host under the app root. They are
//! modeled as explicit records with optional fields; unknown keys are
//! preserved through a flattened extra map so older CLIs tolerate newer
//! documents.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ports::PORT_RANGE_START;

/// How an application is deployed and served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployMethod {
    /// Files served directly by Caddy, no process
    Static,
    /// A command supervised by systemd
    Command,
    /// A project-provided compose file under systemd
    DockerCompose,
    /// A project-provided Dockerfile, built and run via compose
    Dockerfile,
    /// Runtime auto-detected, Dockerfile generated
    Auto,
}

impl DeployMethod {
    /// Whether this method runs a supervised unit
    pub fn has_unit(&self) -> bool {
        !matches!(self, DeployMethod::Static)
    }

    /// Whether this method builds a container image before starting
    pub fn builds_image(&self) -> bool {
        matches!(self, DeployMethod::Dockerfile | DeployMethod::Auto)
    }

    /// Whether this method needs an allocated host port
    pub fn needs_port(&self) -> bool {
        self.has_unit()
    }
}

impl std::fmt::Display for DeployMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DeployMethod::Static => "static",
            DeployMethod::Command => "command",
            DeployMethod::DockerCompose => "docker-compose",
            DeployMethod::Dockerfile => "dockerfile",
            DeployMethod::Auto => "auto",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DeployMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "static" => Ok(DeployMethod::Static),
            "command" => Ok(DeployMethod::Command),
            "docker-compose" => Ok(DeployMethod::DockerCompose),
            "dockerfile" => Ok(DeployMethod::Dockerfile),
            "auto" => Ok(DeployMethod::Auto),
            other => Err(format!(
                "unknown method '{}' (expected static, command, docker-compose, dockerfile, or auto)",
                other
            )),
        }
    }
}

/// Subdomain vs. subdirectory routing, derived from the URL shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingKind {
    /// One app owns a full hostname
    Subdomain,
    /// Several apps share a hostname under distinct path prefixes
    Subdirectory,
}

/// Where an application's source came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Cloned from a git remote
    Git,
    /// Uploaded from a local directory
    Local,
}

/// One deployed application's registry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppRecord {
    /// Application name, the registry key
    pub name: String,
    /// Deployment method
    pub method: DeployMethod,
    /// Public URL
    pub url: String,
    /// Routing kind derived from the URL
    pub routing: RoutingKind,
    /// Allocated host port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Container-side port for image-based methods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<u16>,
    /// Source origin (path or git URL)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// How the source was transferred
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<SourceKind>,
    /// Remote source checkout path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
    /// Git branch, when one was requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Supervised unit name, absent for static apps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub systemd_unit: Option<String>,
    /// Last recorded status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// When the app was first deployed
    pub created_at: DateTime<Utc>,
    /// When the app was last deployed or redeployed
    pub updated_at: DateTime<Utc>,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<BTreeMap<String, String>>,
    /// Upload exclude patterns used for this app
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    /// Whether `.gitignore` was honored during upload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gitignore: Option<bool>,
    /// Container volume mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    /// Unknown fields from newer writers, preserved on rewrite
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// The application registry document (`apps.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppRegistry {
    /// Applications by name
    #[serde(default)]
    pub apps: BTreeMap<String, AppRecord>,
}

impl AppRegistry {
    /// The empty document written at host init
    pub fn empty() -> Self {
        Self::default()
    }
}

/// The port registry document (`ports.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortRegistry {
    /// Next port to hand out; never decreases
    pub next_port: u16,
    /// Current assignments, port number (as string key) to app name
    #[serde(default)]
    pub allocated: BTreeMap<String, String>,
}

impl PortRegistry {
    /// The empty document: counter at the range floor, nothing allocated
    pub fn empty() -> Self {
        Self {
            next_port: PORT_RANGE_START,
            allocated: BTreeMap::new(),
        }
    }
}

impl Default for PortRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

/// One active tunnel's registry entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelRecord {
    /// Public URL the tunnel is reachable under
    pub url: String,
    /// Local port being exposed
    pub local_port: u16,
    /// Allocated port on the remote host
    pub remote_port: u16,
    /// When the tunnel was opened
    pub created_at: DateTime<Utc>,
}

/// The tunnel registry document (`tunnels.json`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TunnelRegistry {
    /// Active tunnels by id
    #[serde(default)]
    pub tunnels: BTreeMap<String, TunnelRecord>,
}

impl TunnelRegistry {
    /// The empty document
    pub fn empty() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_roundtrip() {
        for (text, method) in [
            ("static", DeployMethod::Static),
            ("command", DeployMethod::Command),
            ("docker-compose", DeployMethod::DockerCompose),
            ("dockerfile", DeployMethod::Dockerfile),
            ("auto", DeployMethod::Auto),
        ] {
            assert_eq!(text.parse::<DeployMethod>().unwrap(), method);
            assert_eq!(method.to_string(), text);
            let json = serde_json::to_string(&method).unwrap();
            assert_eq!(json, format!("\"{}\"", text));
        }
        assert!("compose".parse::<DeployMethod>().is_err());
    }

    #[test]
    fn test_record_tolerates_unknown_keys() {
        let raw = r#"{
            "name": "myapp",
            "method": "command",
            "url": "myapp.example.com",
            "routing": "subdomain",
            "port": 10000,
            "created_at": "2025-06-01T10:00:00Z",
            "updated_at": "2025-06-01T10:00:00Z",
            "shiny_new_field": {"nested": true}
        }"#;
        let record: AppRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.port, Some(10000));
        assert!(record.extra.contains_key("shiny_new_field"));

        // Unknown fields survive a rewrite
        let rewritten = serde_json::to_string(&record).unwrap();
        assert!(rewritten.contains("shiny_new_field"));
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let record = AppRecord {
            name: "site".to_string(),
            method: DeployMethod::Static,
            url: "site.example.com".to_string(),
            routing: RoutingKind::Subdomain,
            port: None,
            container_port: None,
            source: None,
            source_type: Some(SourceKind::Local),
            source_path: None,
            branch: None,
            systemd_unit: None,
            status: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            meta: None,
            exclude: Vec::new(),
            gitignore: None,
            volumes: Vec::new(),
            extra: BTreeMap::new(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("\"port\""));
        assert!(!json.contains("\"meta\""));
        assert!(!json.contains("\"branch\""));
        assert!(json.contains("\"source_type\":\"local\""));
    }

    #[test]
    fn test_empty_documents() {
        let ports = PortRegistry::empty();
        assert_eq!(ports.next_port, PORT_RANGE_START);
        assert!(ports.allocated.is_empty());
        assert!(AppRegistry::empty().apps.is_empty());
        assert!(TunnelRegistry::empty().tunnels.is_empty());
    }
}
