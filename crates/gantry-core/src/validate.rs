//! Input validation
//!
//! Everything that ends up in a remote path, a unit name, or a shell
//! command is validated before any remote mutation happens.

use crate::{Error, Result};

/// Validate an application name
///
/// Names become directory names, unit names, and image tags: lowercase
/// alphanumerics and hyphens, starting with an alphanumeric, at most 63
/// characters.
pub fn validate_app_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 63 {
        return Err(Error::validation(
            "app name",
            format!("'{}' must be 1-63 characters", name),
        ));
    }
    let mut chars = name.chars();
    let first = chars.next().unwrap_or(' ');
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return Err(Error::validation(
            "app name",
            format!("'{}' must start with a lowercase letter or digit", name),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(Error::validation(
            "app name",
            format!("'{}' may only contain lowercase letters, digits, and hyphens", name),
        ));
    }
    Ok(())
}

/// Validate a hostname
///
/// Dot-separated labels of alphanumerics and hyphens. Underscores are
/// rejected, which keeps the dots-to-underscores merged-file encoding
/// collision-free.
pub fn validate_domain(domain: &str) -> Result<()> {
    if domain.is_empty() || domain.len() > 253 {
        return Err(Error::validation(
            "domain",
            format!("'{}' must be 1-253 characters", domain),
        ));
    }
    for label in domain.split('.') {
        if label.is_empty()
            || label.starts_with('-')
            || label.ends_with('-')
            || !label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(Error::validation(
                "domain",
                format!("'{}' is not a valid hostname", domain),
            ));
        }
    }
    Ok(())
}

/// Validate a subdirectory path segment
pub fn validate_path_segment(path: &str) -> Result<()> {
    if path.is_empty() {
        return Err(Error::validation("path", "must not be empty"));
    }
    if path == "." || path == ".." {
        return Err(Error::validation(
            "path",
            format!("'{}' is not allowed", path),
        ));
    }
    if !path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(Error::validation(
            "path",
            format!("'{}' may only contain alphanumerics, '-', '_', and '.'", path),
        ));
    }
    Ok(())
}

/// Validate a git branch name
pub fn validate_branch(branch: &str) -> Result<()> {
    if branch.is_empty() || branch.len() > 255 {
        return Err(Error::validation(
            "branch",
            format!("'{}' must be 1-255 characters", branch),
        ));
    }
    if branch.starts_with('-') || branch.contains("..") {
        return Err(Error::validation(
            "branch",
            format!("'{}' is not a valid branch name", branch),
        ));
    }
    if !branch
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'))
    {
        return Err(Error::validation(
            "branch",
            format!("'{}' contains characters not allowed in branch names", branch),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_names() {
        assert!(validate_app_name("myapp").is_ok());
        assert!(validate_app_name("my-app-2").is_ok());
        assert!(validate_app_name("2048").is_ok());
        assert!(validate_app_name("").is_err());
        assert!(validate_app_name("-leading").is_err());
        assert!(validate_app_name("UpperCase").is_err());
        assert!(validate_app_name("under_score").is_err());
        assert!(validate_app_name("dot.dot").is_err());
        assert!(validate_app_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_domains() {
        assert!(validate_domain("apps.example.com").is_ok());
        assert!(validate_domain("a-b.example.com").is_ok());
        assert!(validate_domain("").is_err());
        assert!(validate_domain("under_score.example.com").is_err());
        assert!(validate_domain("-bad.example.com").is_err());
        assert!(validate_domain("double..dot").is_err());
    }

    #[test]
    fn test_path_segments() {
        assert!(validate_path_segment("docs").is_ok());
        assert!(validate_path_segment("my_api-v2").is_ok());
        assert!(validate_path_segment("").is_err());
        assert!(validate_path_segment("..").is_err());
        assert!(validate_path_segment("a/b").is_err());
        assert!(validate_path_segment("sp ace").is_err());
    }

    #[test]
    fn test_branches() {
        assert!(validate_branch("main").is_ok());
        assert!(validate_branch("feature/login-form").is_ok());
        assert!(validate_branch("v1.2.3").is_ok());
        assert!(validate_branch("").is_err());
        assert!(validate_branch("-rf").is_err());
        assert!(validate_branch("a..b").is_err());
        assert!(validate_branch("has space").is_err());
        assert!(validate_branch("$(evil)").is_err());
    }
}
