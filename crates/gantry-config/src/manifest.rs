//! Project manifest parsing
//!
//! A project carries its deployment description in a `gantry.toml` at the
//! repository root: an `[app]` table with the application name, optional
//! slug, and application-level defaults, plus one `[environments.<name>]`
//! table of overrides per named environment.

use std::collections::BTreeMap;
use std::path::Path;

use toml::value::Table;

use crate::{ConfigError, Result};

/// Manifest file name looked up in a project directory
pub const MANIFEST_FILE: &str = "gantry.toml";

/// Parsed project manifest
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    /// Base application name
    pub app_name: String,
    /// Optional short slug used in placeholder substitution
    pub app_slug: Option<String>,
    /// Application-level defaults (everything in `[app]` except name/slug)
    pub app_defaults: Table,
    /// Raw per-environment overrides
    pub environments: BTreeMap<String, Table>,
}

/// Load a project manifest from a directory or an explicit file path
///
/// A directory is searched for [`MANIFEST_FILE`]; a file path is used
/// as-is.
pub fn load_project_config(path: &Path) -> Result<ProjectConfig> {
    let file = if path.is_file() {
        path.to_path_buf()
    } else {
        path.join(MANIFEST_FILE)
    };
    if !file.exists() {
        return Err(ConfigError::ManifestNotFound(path.display().to_string()));
    }

    let raw = std::fs::read_to_string(&file).map_err(|e| ConfigError::Io {
        path: file.display().to_string(),
        source: e,
    })?;
    parse_manifest(&raw, &file.display().to_string())
}

fn parse_manifest(raw: &str, origin: &str) -> Result<ProjectConfig> {
    let value: Table = toml::from_str(raw).map_err(|e| ConfigError::Parse {
        path: origin.to_string(),
        source: e,
    })?;

    let app = match value.get("app").and_then(|v| v.as_table()) {
        Some(table) => table.clone(),
        None => {
            return Err(ConfigError::InvalidManifest(
                "missing [app] table".to_string(),
            ))
        }
    };

    let app_name = match app.get("name").and_then(|v| v.as_str()) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => {
            return Err(ConfigError::InvalidManifest(
                "[app] must have a non-empty name".to_string(),
            ))
        }
    };
    let app_slug = app.get("slug").and_then(|v| v.as_str()).map(String::from);

    let mut app_defaults = app;
    app_defaults.remove("name");
    app_defaults.remove("slug");

    let mut environments = BTreeMap::new();
    if let Some(envs) = value.get("environments") {
        let envs = envs.as_table().ok_or_else(|| {
            ConfigError::InvalidManifest("[environments] must be a table".to_string())
        })?;
        for (name, data) in envs {
            let table = data.as_table().ok_or_else(|| {
                ConfigError::InvalidManifest(format!(
                    "[environments.{}] must be a table",
                    name
                ))
            })?;
            environments.insert(name.clone(), table.clone());
        }
    }

    Ok(ProjectConfig {
        app_name,
        app_slug,
        app_defaults,
        environments,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[app]
name = "mywebsite"
method = "dockerfile"
source = "."
container_port = 3000
server = "myserver"

[environments.production]
url = "mywebsite.apps.example.com"
branch = "main"

[environments.staging]
url = "mywebsite-staging.apps.example.com"
branch = "staging"
"#;

    #[test]
    fn test_parse_manifest() {
        let cfg = parse_manifest(SAMPLE, "gantry.toml").unwrap();
        assert_eq!(cfg.app_name, "mywebsite");
        assert_eq!(cfg.app_slug, None);
        assert_eq!(
            cfg.app_defaults.get("method").and_then(|v| v.as_str()),
            Some("dockerfile")
        );
        assert!(!cfg.app_defaults.contains_key("name"));
        assert_eq!(cfg.environments.len(), 2);
        assert!(cfg.environments.contains_key("staging"));
    }

    #[test]
    fn test_load_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), SAMPLE).unwrap();
        let cfg = load_project_config(dir.path()).unwrap();
        assert_eq!(cfg.app_name, "mywebsite");
    }

    #[test]
    fn test_load_missing_manifest() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_project_config(dir.path()),
            Err(ConfigError::ManifestNotFound(_))
        ));
    }

    #[test]
    fn test_manifest_requires_app_name() {
        let err = parse_manifest("[app]\nmethod = \"static\"\n", "gantry.toml").unwrap_err();
        assert!(err.to_string().contains("name"));
    }
}
