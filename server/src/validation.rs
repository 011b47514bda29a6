//! Input validation for URL path segments.

use anyhow::{Result, bail};

/// Repository and owner names are lowercase kebab-case slugs.
pub fn validate_slug(slug: &str) -> Result<()> {
    let is_valid = !slug.is_empty()
        && !slug.starts_with('-')
        && !slug.ends_with('-')
        && !slug.contains("--")
        && slug
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if is_valid {
        Ok(())
    } else {
        bail!("name must be lowercase kebab-case")
    }
}

/// Branch names may nest (`feature/x`) but never traverse or alias refs.
pub fn validate_branch(branch: &str) -> Result<()> {
    if branch.is_empty() || branch.len() > 255 {
        bail!("branch name must be 1-255 characters");
    }
    for segment in branch.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            bail!("branch name contains an invalid segment");
        }
    }
    if branch.chars().any(|c| c.is_control() || c == ' ' || c == '\\' || c == ':') {
        bail!("branch name contains an invalid character");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs() {
        assert!(validate_slug("my-repo").is_ok());
        assert!(validate_slug("repo2").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("-repo").is_err());
        assert!(validate_slug("My-Repo").is_err());
        assert!(validate_slug("a--b").is_err());
    }

    #[test]
    fn branches() {
        assert!(validate_branch("main").is_ok());
        assert!(validate_branch("feature/login").is_ok());
        assert!(validate_branch("").is_err());
        assert!(validate_branch("a/../b").is_err());
        assert!(validate_branch("has space").is_err());
    }
}
