//! Environment resolution
//!
//! A named environment resolves through a layered cascade, later layers
//! winning per key:
//!
//! built-in defaults < global `[defaults]` (client config) < `[app]`
//! defaults < `[environments.<name>]` < caller overrides
//!
//! Scalars replace, `env`/`meta` maps shallow-merge, and the
//! `exclude`/`volumes` lists concatenate across layers with duplicates
//! removed. Caller overrides are applied by the CLI after resolution via
//! [`Overrides`]; they are not part of this function.

use std::collections::BTreeMap;

use toml::value::Table;
use toml::Value;

use crate::{ConfigError, ProjectConfig, Result};

/// Keys with merge semantics other than last-layer-wins
const COLLECTION_KEYS: [&str; 4] = ["env", "meta", "exclude", "volumes"];

/// Fully resolved deployment parameters for one named environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvironmentConfig {
    /// Environment name
    pub name: String,
    /// Derived application name (base name plus environment suffix)
    pub app_name: String,
    /// Server reference
    pub server: Option<String>,
    /// Deployment method
    pub method: Option<String>,
    /// Public URL
    pub url: Option<String>,
    /// Source path or git URL
    pub source: Option<String>,
    /// Explicit host port
    pub port: Option<u16>,
    /// Container port for image-based methods
    pub container_port: Option<u16>,
    /// Start command
    pub command: Option<String>,
    /// Setup/install command
    pub setup_command: Option<String>,
    /// Git branch
    pub branch: Option<String>,
    /// Subdomain, for URL construction when `url` is unset
    pub subdomain: Option<String>,
    /// Path prefix, for subdirectory URL construction
    pub path: Option<String>,
    /// Domain override for URL construction
    pub domain: Option<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Path of a local environment file to upload
    pub env_file: Option<String>,
    /// Free-form metadata
    pub meta: BTreeMap<String, String>,
    /// Upload exclude patterns
    pub exclude: Vec<String>,
    /// Container volume mounts
    pub volumes: Vec<String>,
    /// Honor `.gitignore` during upload
    pub gitignore: bool,
    /// Explicit creation timestamp (RFC 3339) recorded instead of the clock's
    pub created_at: Option<String>,
    /// Explicit update timestamp (RFC 3339) recorded instead of the clock's
    pub updated_at: Option<String>,
}

impl EnvironmentConfig {
    /// The URL to deploy under, constructing one from the
    /// subdomain/path/domain triple when no explicit URL is configured
    pub fn effective_url(&self, server_domain: &str) -> Option<String> {
        if let Some(url) = &self.url {
            return Some(url.clone());
        }
        let base = self.domain.as_deref().unwrap_or(server_domain);
        if let Some(subdomain) = &self.subdomain {
            return Some(format!("{}.{}", subdomain, base));
        }
        self.path.as_ref().map(|path| format!("{}/{}", base, path))
    }
}

/// Caller-side overrides, the final cascade layer
///
/// Applied by the orchestrator's caller (the CLI) after
/// [`resolve_environment`]; `None` fields leave the resolved value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Override the server reference
    pub server: Option<String>,
    /// Override the deployment method
    pub method: Option<String>,
    /// Override the public URL
    pub url: Option<String>,
    /// Override the source
    pub source: Option<String>,
    /// Override the host port
    pub port: Option<u16>,
    /// Override the container port
    pub container_port: Option<u16>,
    /// Override the start command
    pub command: Option<String>,
    /// Override the setup command
    pub setup_command: Option<String>,
    /// Override the branch
    pub branch: Option<String>,
    /// Override the environment-file path
    pub env_file: Option<String>,
    /// Additional environment variables, overriding resolved keys
    pub env: BTreeMap<String, String>,
    /// Additional metadata, overriding resolved keys
    pub meta: BTreeMap<String, String>,
    /// Additional exclude patterns
    pub exclude: Vec<String>,
    /// Additional volume mounts
    pub volumes: Vec<String>,
    /// Override the gitignore flag
    pub gitignore: Option<bool>,
}

impl Overrides {
    /// Apply these overrides onto a resolved environment
    pub fn apply(&self, config: &mut EnvironmentConfig) {
        macro_rules! overlay {
            ($field:ident) => {
                if let Some(value) = &self.$field {
                    config.$field = Some(value.clone());
                }
            };
        }
        overlay!(server);
        overlay!(method);
        overlay!(url);
        overlay!(source);
        overlay!(command);
        overlay!(setup_command);
        overlay!(branch);
        overlay!(env_file);
        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if let Some(port) = self.container_port {
            config.container_port = Some(port);
        }
        if let Some(gitignore) = self.gitignore {
            config.gitignore = gitignore;
        }
        for (k, v) in &self.env {
            config.env.insert(k.clone(), v.clone());
        }
        for (k, v) in &self.meta {
            config.meta.insert(k.clone(), v.clone());
        }
        for pattern in &self.exclude {
            if !config.exclude.contains(pattern) {
                config.exclude.push(pattern.clone());
            }
        }
        for volume in &self.volumes {
            if !config.volumes.contains(volume) {
                config.volumes.push(volume.clone());
            }
        }
    }
}

/// Derive the deployed application name from base name and environment
///
/// The production environment uses the base name directly; every other
/// environment gets a suffix.
pub fn derive_app_name(base_name: &str, env_name: &str) -> String {
    if env_name == "production" {
        base_name.to_string()
    } else {
        format!("{}-{}", base_name, env_name)
    }
}

/// Resolve a named environment into a full deployment configuration
pub fn resolve_environment(
    project: &ProjectConfig,
    env_name: &str,
    global_defaults: &Table,
) -> Result<EnvironmentConfig> {
    let env_data = project.environments.get(env_name).ok_or_else(|| {
        let mut names: Vec<&str> = project.environments.keys().map(String::as_str).collect();
        names.sort_unstable();
        ConfigError::EnvironmentNotFound {
            name: env_name.to_string(),
            available: if names.is_empty() {
                "(none)".to_string()
            } else {
                names.join(", ")
            },
        }
    })?;

    let builtin = builtin_defaults();
    let layers: [&Table; 4] = [&builtin, global_defaults, &project.app_defaults, env_data];

    // Scalar fields: later layers win per key
    let mut scalars = Table::new();
    for layer in layers {
        for (key, value) in layer {
            if !COLLECTION_KEYS.contains(&key.as_str()) {
                scalars.insert(key.clone(), value.clone());
            }
        }
    }

    // env / meta maps: shallow-merge, later layer's key wins
    let mut env = BTreeMap::new();
    let mut meta = BTreeMap::new();
    for layer in layers {
        merge_string_table(layer.get("env"), &mut env, "env")?;
        merge_string_table(layer.get("meta"), &mut meta, "meta")?;
    }

    // exclude / volumes lists: concatenate, dedup preserving first occurrence
    let mut exclude = Vec::new();
    let mut volumes = Vec::new();
    for layer in layers {
        append_string_list(layer.get("exclude"), &mut exclude, "exclude")?;
        append_string_list(layer.get("volumes"), &mut volumes, "volumes")?;
    }

    let app_name = derive_app_name(&project.app_name, env_name);
    let slug = project.app_slug.as_deref().unwrap_or(&project.app_name);

    let subst = |s: &str| substitute_placeholders(s, &project.app_name, slug, env_name);
    for (_, value) in scalars.iter_mut() {
        if let Value::String(s) = value {
            *value = Value::String(subst(s));
        }
    }
    for value in env.values_mut() {
        *value = subst(value);
    }

    Ok(EnvironmentConfig {
        name: env_name.to_string(),
        app_name,
        server: get_string(&scalars, "server"),
        method: get_string(&scalars, "method"),
        url: get_string(&scalars, "url"),
        source: get_string(&scalars, "source"),
        port: get_port(&scalars, "port")?,
        container_port: get_port(&scalars, "container_port")?,
        command: get_string(&scalars, "command"),
        setup_command: get_string(&scalars, "setup_command"),
        branch: get_string(&scalars, "branch"),
        subdomain: get_string(&scalars, "subdomain"),
        path: get_string(&scalars, "path"),
        domain: get_string(&scalars, "domain"),
        env,
        env_file: get_string(&scalars, "env_file"),
        meta,
        exclude,
        volumes,
        gitignore: scalars
            .get("gitignore")
            .and_then(Value::as_bool)
            .unwrap_or(true),
        created_at: get_string(&scalars, "created_at"),
        updated_at: get_string(&scalars, "updated_at"),
    })
}

/// Return sorted environment names
pub fn list_environments(project: &ProjectConfig) -> Vec<String> {
    project.environments.keys().cloned().collect()
}

/// Resolve every environment defined in the manifest
pub fn resolve_all_environments(
    project: &ProjectConfig,
    global_defaults: &Table,
) -> Result<Vec<EnvironmentConfig>> {
    list_environments(project)
        .iter()
        .map(|name| resolve_environment(project, name, global_defaults))
        .collect()
}

fn builtin_defaults() -> Table {
    let mut table = Table::new();
    table.insert("gitignore".to_string(), Value::Boolean(true));
    table
}

/// Replace the literal `{app.name}`, `{app.slug}`, and `{env.name}`
/// tokens; a straight token replace, not a templating language.
fn substitute_placeholders(input: &str, app_name: &str, slug: &str, env_name: &str) -> String {
    input
        .replace("{app.name}", app_name)
        .replace("{app.slug}", slug)
        .replace("{env.name}", env_name)
}

fn get_string(table: &Table, key: &str) -> Option<String> {
    table.get(key).and_then(|v| v.as_str()).map(String::from)
}

fn get_port(table: &Table, key: &str) -> Result<Option<u16>> {
    match table.get(key) {
        None => Ok(None),
        Some(Value::Integer(n)) => u16::try_from(*n).map(Some).map_err(|_| {
            ConfigError::InvalidManifest(format!("{} = {} is not a valid port", key, n))
        }),
        Some(other) => Err(ConfigError::InvalidManifest(format!(
            "{} must be an integer, got {}",
            key,
            other.type_str()
        ))),
    }
}

fn merge_string_table(
    value: Option<&Value>,
    into: &mut BTreeMap<String, String>,
    key: &str,
) -> Result<()> {
    let Some(value) = value else { return Ok(()) };
    let table = value.as_table().ok_or_else(|| {
        ConfigError::InvalidManifest(format!("{} must be a table of strings", key))
    })?;
    for (k, v) in table {
        into.insert(k.clone(), scalar_to_string(v, key)?);
    }
    Ok(())
}

fn append_string_list(value: Option<&Value>, into: &mut Vec<String>, key: &str) -> Result<()> {
    let Some(value) = value else { return Ok(()) };
    let list = value
        .as_array()
        .ok_or_else(|| ConfigError::InvalidManifest(format!("{} must be an array", key)))?;
    for item in list {
        let item = scalar_to_string(item, key)?;
        if !into.contains(&item) {
            into.push(item);
        }
    }
    Ok(())
}

fn scalar_to_string(value: &Value, key: &str) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Integer(n) => Ok(n.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        other => Err(ConfigError::InvalidManifest(format!(
            "{} entries must be scalars, got {}",
            key,
            other.type_str()
        ))),
    }
}
