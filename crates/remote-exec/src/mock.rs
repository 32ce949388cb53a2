//! In-memory channel double for orchestration tests
//!
//! `MockChannel` keeps a remote filesystem in a map and understands the
//! handful of command shapes the orchestration core emits (`test -f`,
//! `mv -f`, `rm -f`, `mkdir`, lock acquisition). Specific commands can be
//! scripted to succeed with canned output or fail, so tests can simulate a
//! stopped unit, a dead tunnel, or a corrupt document without a host.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::channel::{RemoteChannel, RunOptions};
use crate::error::{Error, Result};

/// Scripted response for commands matching a substring
enum Rule {
    Output(String),
    Fail { status: Option<i32>, stderr: String },
}

/// An in-memory [`RemoteChannel`] implementation
#[derive(Default)]
pub struct MockChannel {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    commands: Mutex<Vec<String>>,
    rules: Mutex<Vec<(String, Rule)>>,
}

impl MockChannel {
    /// Create an empty mock host
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a remote file
    pub fn seed_file(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files
            .lock()
            .expect("mock files lock")
            .insert(path.into(), contents.into());
    }

    /// Script canned stdout for commands containing `pattern`
    pub fn on(&self, pattern: impl Into<String>, output: impl Into<String>) {
        self.rules
            .lock()
            .expect("mock rules lock")
            .push((pattern.into(), Rule::Output(output.into())));
    }

    /// Script a failure for commands containing `pattern`
    pub fn fail_on(&self, pattern: impl Into<String>, stderr: impl Into<String>) {
        self.fail_with_status(pattern, 1, stderr);
    }

    /// Script a failure with a specific exit status
    pub fn fail_with_status(
        &self,
        pattern: impl Into<String>,
        status: i32,
        stderr: impl Into<String>,
    ) {
        self.rules.lock().expect("mock rules lock").push((
            pattern.into(),
            Rule::Fail {
                status: Some(status),
                stderr: stderr.into(),
            },
        ));
    }

    /// Every command run against the mock, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().expect("mock commands lock").clone()
    }

    /// Whether any command containing `pattern` was run
    pub fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }

    /// Current contents of a mock remote file, as UTF-8
    pub fn file(&self, path: &str) -> Option<String> {
        self.files
            .lock()
            .expect("mock files lock")
            .get(path)
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Paths of every file currently present
    pub fn paths(&self) -> Vec<String> {
        self.files
            .lock()
            .expect("mock files lock")
            .keys()
            .cloned()
            .collect()
    }

    fn builtin(&self, command: &str) -> Result<String> {
        let mut files = self.files.lock().expect("mock files lock");
        let words: Vec<&str> = command.split_whitespace().map(unquote).collect();
        match words.as_slice() {
            ["test", "-f", path] => {
                if files.contains_key(*path) {
                    Ok(String::new())
                } else {
                    Err(Error::command_failed(command, Some(1), ""))
                }
            }
            ["mv", "-f", src, dst] => {
                let contents = files
                    .remove(*src)
                    .ok_or_else(|| Error::command_failed(command, Some(1), "no such file"))?;
                files.insert((*dst).to_string(), contents);
                Ok(String::new())
            }
            ["install", "-m", _mode, src, dst, ..] => {
                let contents = files
                    .remove(*src)
                    .ok_or_else(|| Error::command_failed(command, Some(1), "no such file"))?;
                files.insert((*dst).to_string(), contents);
                Ok(String::new())
            }
            ["rm", "-f", path] => {
                files.remove(*path);
                Ok(String::new())
            }
            ["rm", "-rf", path] => {
                let prefix = format!("{}/", path);
                files.retain(|k, _| k != path && !k.starts_with(&prefix));
                Ok(String::new())
            }
            _ => Ok(String::new()),
        }
    }
}

fn unquote(word: &str) -> &str {
    word.trim_matches('\'')
}

#[async_trait]
impl RemoteChannel for MockChannel {
    async fn run(&self, command: &str, _opts: RunOptions) -> Result<String> {
        self.commands
            .lock()
            .expect("mock commands lock")
            .push(command.to_string());

        let rules = self.rules.lock().expect("mock rules lock");
        for (pattern, rule) in rules.iter() {
            if command.contains(pattern.as_str()) {
                return match rule {
                    Rule::Output(out) => Ok(out.clone()),
                    Rule::Fail { status, stderr } => {
                        Err(Error::command_failed(command, *status, stderr.clone()))
                    }
                };
            }
        }
        drop(rules);

        self.builtin(command)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .expect("mock files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| Error::command_failed(format!("cat {}", path), Some(1), "no such file"))
    }

    async fn write_file(&self, path: &str, contents: &[u8], _elevate: bool) -> Result<()> {
        self.files
            .lock()
            .expect("mock files lock")
            .insert(path.to_string(), contents.to_vec());
        Ok(())
    }
}
