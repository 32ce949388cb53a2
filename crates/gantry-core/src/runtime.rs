//! Runtime auto-detection and Dockerfile generation
//!
//! The `auto` method inspects the source tree for a runtime indicator
//! file and generates a Dockerfile for the first match.

use std::path::Path;

use remote_exec::{RemoteChannel, RemoteCommand, RunOptions};

use crate::Result;

/// A detectable project runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Runtime {
    /// Short runtime name recorded in the registry
    pub name: &'static str,
    /// Base image the generated Dockerfile starts from
    pub base_image: &'static str,
    /// Default setup/install command
    pub setup_command: &'static str,
    /// Dependency manifest copied before the rest of the tree
    pub copy_first: Option<&'static str>,
}

/// Indicator files and their runtimes, in detection priority order
pub const RUNTIMES: [(&str, Runtime); 6] = [
    (
        "package.json",
        Runtime {
            name: "nodejs",
            base_image: "node:22",
            setup_command: "npm install",
            copy_first: Some("package*.json"),
        },
    ),
    (
        "requirements.txt",
        Runtime {
            name: "python-pip",
            base_image: "python:3.12",
            setup_command: "pip install -r requirements.txt",
            copy_first: Some("requirements.txt"),
        },
    ),
    (
        "pyproject.toml",
        Runtime {
            name: "python",
            base_image: "python:3.12",
            setup_command: "pip install .",
            copy_first: Some("pyproject.toml"),
        },
    ),
    (
        "Gemfile",
        Runtime {
            name: "ruby",
            base_image: "ruby:3.3",
            setup_command: "bundle install",
            copy_first: Some("Gemfile*"),
        },
    ),
    (
        "go.mod",
        Runtime {
            name: "go",
            base_image: "golang:1.23",
            setup_command: "go build -o /app/server .",
            copy_first: Some("go.*"),
        },
    ),
    (
        "Cargo.toml",
        Runtime {
            name: "rust",
            base_image: "rust:1.83",
            setup_command: "cargo build --release",
            copy_first: Some("Cargo.*"),
        },
    ),
];

/// Detect the runtime of a local source tree; first indicator wins
pub fn detect_runtime(source_path: &Path) -> Option<Runtime> {
    RUNTIMES
        .iter()
        .find(|(indicator, _)| source_path.join(indicator).exists())
        .map(|(_, runtime)| *runtime)
}

/// Detect the runtime of an uploaded source tree by probing the host
pub async fn detect_runtime_remote(
    chan: &dyn RemoteChannel,
    source_dir: &str,
) -> Result<Option<Runtime>> {
    for (indicator, runtime) in RUNTIMES {
        let probe = RemoteCommand::new("test")
            .arg("-f")
            .arg(format!("{}/{}", source_dir, indicator))
            .to_shell();
        match chan.run(&probe, RunOptions::default()).await {
            Ok(_) => return Ok(Some(runtime)),
            Err(remote_exec::Error::CommandFailed { .. }) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}

/// Render a Dockerfile for a detected runtime
pub fn generate_dockerfile(
    runtime: &Runtime,
    container_port: u16,
    command: &str,
    setup_command: Option<&str>,
) -> String {
    let mut out = format!("FROM {}\nWORKDIR /app\n", runtime.base_image);
    if let Some(copy_first) = runtime.copy_first {
        out.push_str(&format!("COPY {} .\n", copy_first));
    }
    out.push_str(&format!(
        "RUN {}\n",
        setup_command.unwrap_or(runtime.setup_command)
    ));
    out.push_str("COPY . .\n");
    out.push_str(&format!("EXPOSE {}\nCMD {}\n", container_port, command));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote_exec::mock::MockChannel;

    fn tree(files: &[&str]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for f in files {
            std::fs::write(dir.path().join(f), "").unwrap();
        }
        dir
    }

    #[test]
    fn test_detect_each_runtime() {
        for (indicator, runtime) in RUNTIMES {
            let dir = tree(&[indicator]);
            assert_eq!(detect_runtime(dir.path()).map(|r| r.name), Some(runtime.name));
        }
    }

    #[test]
    fn test_detect_unknown() {
        let dir = tree(&["README.md"]);
        assert_eq!(detect_runtime(dir.path()), None);
    }

    #[test]
    fn test_detect_priority() {
        // package.json outranks requirements.txt
        let dir = tree(&["requirements.txt", "package.json"]);
        assert_eq!(detect_runtime(dir.path()).map(|r| r.name), Some("nodejs"));
    }

    #[smol_potat::test]
    async fn test_detect_remote() {
        let chan = MockChannel::new();
        chan.seed_file("/srv/gantry/apps/a/source/go.mod", &b""[..]);
        let runtime = detect_runtime_remote(&chan, "/srv/gantry/apps/a/source")
            .await
            .unwrap();
        assert_eq!(runtime.map(|r| r.name), Some("go"));

        let empty = MockChannel::new();
        assert_eq!(
            detect_runtime_remote(&empty, "/srv/gantry/apps/a/source")
                .await
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_generate_dockerfile_nodejs() {
        let runtime = RUNTIMES[0].1;
        let content = generate_dockerfile(&runtime, 3000, "[\"node\", \"server.js\"]", None);
        assert!(content.contains("FROM node:22"));
        assert!(content.contains("COPY package*.json ."));
        assert!(content.contains("RUN npm install"));
        assert!(content.contains("EXPOSE 3000"));
        assert!(content.contains("[\"node\", \"server.js\"]"));
    }

    #[test]
    fn test_generate_dockerfile_custom_setup() {
        let runtime = RUNTIMES[0].1;
        let content = generate_dockerfile(&runtime, 8080, "npm start", Some("npm ci --production"));
        assert!(content.contains("RUN npm ci --production"));
        assert!(!content.contains("npm install"));
    }

    #[test]
    fn test_generate_dockerfile_python() {
        let runtime = RUNTIMES[1].1;
        let content = generate_dockerfile(&runtime, 5000, "python app.py", None);
        assert!(content.contains("FROM python:3.12"));
        assert!(content.contains("COPY requirements.txt ."));
        assert!(content.contains("RUN pip install -r requirements.txt"));
        assert!(content.contains("EXPOSE 5000"));
    }
}
