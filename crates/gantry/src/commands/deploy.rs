//! `gantry deploy`: deploy an application
//!
//! Parameters come from the project manifest's resolved environment when
//! a `gantry.toml` is present, with command-line flags applied on top as
//! the final cascade layer. Without a manifest the flags stand alone.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;
use gantry_config::{resolve_environment, EnvironmentConfig, Overrides};
use gantry_core::{DefaultSourceTransfer, DeployMethod, DeployRequest, Orchestrator};

use super::connect;

/// Arguments for `gantry deploy`
#[derive(Args)]
pub struct DeployArgs {
    /// Application name (defaults to the manifest's derived name)
    pub name: Option<String>,

    /// Environment to resolve from the manifest
    #[arg(short, long, default_value = "production")]
    pub env: String,

    /// Project directory or manifest file
    #[arg(long, default_value = ".")]
    pub project: PathBuf,

    /// Deployment method: static, command, docker-compose, dockerfile, auto
    #[arg(short, long)]
    pub method: Option<String>,

    /// Public URL (subdomain or domain/path)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Source directory or git URL
    #[arg(long)]
    pub source: Option<String>,

    /// Explicit host port
    #[arg(long)]
    pub port: Option<u16>,

    /// Container port for image-based methods
    #[arg(long)]
    pub container_port: Option<u16>,

    /// Start command
    #[arg(short, long)]
    pub command: Option<String>,

    /// Setup command overriding the detected default
    #[arg(long)]
    pub setup_command: Option<String>,

    /// Git branch to deploy
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Environment variable, KEY=VALUE (repeatable)
    #[arg(long = "env-var", value_name = "KEY=VALUE")]
    pub env_vars: Vec<String>,

    /// Local environment file uploaded to the app's `.env`
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Metadata entry, KEY=VALUE (repeatable)
    #[arg(long, value_name = "KEY=VALUE")]
    pub meta: Vec<String>,

    /// Upload exclude pattern (repeatable)
    #[arg(long)]
    pub exclude: Vec<String>,

    /// Container volume mount (repeatable)
    #[arg(long)]
    pub volume: Vec<String>,

    /// Do not honor `.gitignore` during upload
    #[arg(long)]
    pub no_gitignore: bool,
}

/// Entry point for `gantry deploy`
pub async fn run(args: DeployArgs, server_flag: Option<&str>) -> Result<()> {
    let config = connect::load_config()?;

    // Resolve through the manifest when one is present; a malformed
    // manifest is an error, a missing one just means flags stand alone
    let manifest = match gantry_config::load_project_config(&args.project) {
        Ok(project) => Some(project),
        Err(gantry_config::ConfigError::ManifestNotFound(_)) => None,
        Err(e) => return Err(e.into()),
    };
    let mut resolved = match &manifest {
        Some(project) => resolve_environment(project, &args.env, &config.defaults)?,
        None => EnvironmentConfig {
            name: args.env.clone(),
            gitignore: true,
            ..EnvironmentConfig::default()
        },
    };
    overrides_from(&args)?.apply(&mut resolved);

    let name = match args.name.clone().or_else(|| {
        manifest
            .is_some()
            .then(|| resolved.app_name.clone())
            .filter(|n| !n.is_empty())
    }) {
        Some(name) => name,
        None => bail!("No application name given and no gantry.toml found."),
    };

    // The server reference resolves flag > manifest > default
    let server_name = server_flag
        .map(String::from)
        .or_else(|| resolved.server.clone());
    let (server_name, server) = connect::resolve_server(&config, server_name.as_deref())?;

    let url = match resolved.effective_url(&server.domain) {
        Some(url) => url,
        None => bail!("No URL given; pass --url or set url/subdomain/path in gantry.toml."),
    };

    let method = match &resolved.method {
        Some(m) => Some(
            m.parse::<DeployMethod>()
                .map_err(|e| anyhow::anyhow!(e))?,
        ),
        None => None,
    };

    let env_file_content = match &resolved.env_file {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read environment file {}", path))?,
        ),
        None => None,
    };

    let request = DeployRequest {
        name: name.clone(),
        method,
        url: url.clone(),
        source: resolved.source.clone(),
        port: resolved.port,
        container_port: resolved.container_port,
        command: resolved.command.clone(),
        setup_command: resolved.setup_command.clone(),
        branch: resolved.branch.clone(),
        env: resolved.env.clone(),
        env_file_content,
        meta: resolved.meta.clone(),
        exclude: resolved.exclude.clone(),
        gitignore: resolved.gitignore,
        volumes: resolved.volumes.clone(),
        created_at: parse_timestamp(resolved.created_at.as_deref(), "created_at")?,
        updated_at: parse_timestamp(resolved.updated_at.as_deref(), "updated_at")?,
        extra: Default::default(),
    };

    println!("Deploying '{}' to {} ({})...", name, server_name, url);
    let session = remote_exec::SshSession::connect(connect::ssh_config(&server))
        .await
        .with_context(|| format!("Failed to connect to server '{}'", server_name))?;
    let transfer = DefaultSourceTransfer::new(&session, connect::ssh_config(&server));
    let orchestrator = Orchestrator::new(&session, &transfer, connect::remote_context(&server));
    let result = orchestrator.deploy(&request).await;
    session.close().await;
    let record = result?;

    println!("Deployed '{}' at https://{}", record.name, record.url);
    if let Some(port) = record.port {
        println!("  port: {}", port);
    }
    Ok(())
}

fn overrides_from(args: &DeployArgs) -> Result<Overrides> {
    Ok(Overrides {
        method: args.method.clone(),
        url: args.url.clone(),
        source: args.source.clone(),
        port: args.port,
        container_port: args.container_port,
        command: args.command.clone(),
        setup_command: args.setup_command.clone(),
        branch: args.branch.clone(),
        env_file: args
            .env_file
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned()),
        env: parse_pairs(&args.env_vars, "--env-var")?,
        meta: parse_pairs(&args.meta, "--meta")?,
        exclude: args.exclude.clone(),
        volumes: args.volume.clone(),
        gitignore: args.no_gitignore.then_some(false),
        server: None,
    })
}

fn parse_timestamp(
    value: Option<&str>,
    field: &str,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    match value {
        None => Ok(None),
        Some(raw) => chrono::DateTime::parse_from_rfc3339(raw)
            .map(|t| Some(t.with_timezone(&chrono::Utc)))
            .with_context(|| format!("{} is not a valid RFC 3339 timestamp: '{}'", field, raw)),
    }
}

fn parse_pairs(pairs: &[String], flag: &str) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                map.insert(key.to_string(), value.to_string());
            }
            _ => bail!("{} expects KEY=VALUE, got '{}'", flag, pair),
        }
    }
    Ok(map)
}
