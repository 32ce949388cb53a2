//! Command construction and shell quoting
//!
//! Every remote command string is assembled here. Call sites never
//! concatenate untrusted values into shell text directly; they go through
//! [`RemoteCommand`] or [`shell_escape`].

/// A command to be executed on the remote host
///
/// This is a builder that renders to a single shell string with each
/// argument escaped. Unlike a raw string, it can be built up incrementally
/// and reused.
#[derive(Debug, Clone)]
pub struct RemoteCommand {
    /// The program to execute
    program: String,
    /// The arguments to pass to the program
    args: Vec<String>,
}

impl RemoteCommand {
    /// Create a new command for the given program
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Add an argument to the command
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments to the command
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self.args.push(arg.into());
        }
        self
    }

    /// Render the command as a shell string with escaped arguments
    pub fn to_shell(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            let args: Vec<String> = self.args.iter().map(|a| shell_escape(a)).collect();
            format!("{} {}", self.program, args.join(" "))
        }
    }
}

impl std::fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_shell())
    }
}

/// Escape a string for safe inclusion in a shell command
pub fn shell_escape(s: &str) -> String {
    if s.is_empty() {
        return "''".to_string();
    }
    if s.contains(|c: char| c.is_whitespace() || "\"'\\$`!*?<>|&;()[]{}~#".contains(c)) {
        // Use single quotes and escape any single quotes in the string
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("simple"), "simple");
        assert_eq!(shell_escape("with space"), "'with space'");
        assert_eq!(shell_escape("with'quote"), "'with'\"'\"'quote'");
        assert_eq!(shell_escape("$variable"), "'$variable'");
        assert_eq!(shell_escape("path/to/file"), "path/to/file");
        assert_eq!(shell_escape(""), "''");
    }

    #[test]
    fn test_to_shell_plain_args() {
        let cmd = RemoteCommand::new("systemctl").arg("restart").arg("caddy");
        assert_eq!(cmd.to_shell(), "systemctl restart caddy");
    }

    #[test]
    fn test_to_shell_escapes_args() {
        let cmd = RemoteCommand::new("rm").arg("-f").arg("/tmp/has space");
        assert_eq!(cmd.to_shell(), "rm -f '/tmp/has space'");
    }

    #[test]
    fn test_to_shell_no_args() {
        assert_eq!(RemoteCommand::new("hostname").to_shell(), "hostname");
    }
}
