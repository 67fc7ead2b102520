//! Source revision lookup for image tagging.

use std::path::Path;
use std::process::Command;

use crate::domain::{RelayError, Result};

/// Env var CodeBuild sets to the revision being built.
pub const SOURCE_VERSION_ENV: &str = "CODEBUILD_RESOLVED_SOURCE_VERSION";

/// `git rev-parse HEAD` in `repo_dir`.
pub fn head_revision(repo_dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .map_err(|e| RelayError::GitError(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        return Err(RelayError::GitError(format!(
            "git rev-parse HEAD failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        return Err(RelayError::GitError("git rev-parse HEAD printed nothing".to_string()));
    }
    Ok(sha)
}

/// Revision to tag a build of `dir` with.
///
/// An explicit revision wins, then [`SOURCE_VERSION_ENV`], then the git HEAD
/// of `dir`. `None` when none is available, which tags the image `latest`.
pub fn resolve_source_version(explicit: Option<&str>, dir: &Path) -> Option<String> {
    explicit
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .or_else(|| {
            std::env::var(SOURCE_VERSION_ENV)
                .ok()
                .filter(|s| !s.trim().is_empty())
        })
        .or_else(|| head_revision(dir).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_git(dir: &Path, args: &[&str]) {
        let output = Command::new("git").args(args).current_dir(dir).output().unwrap();
        assert!(
            output.status.success(),
            "git {args:?} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
    }

    #[test]
    fn head_revision_of_fresh_repo() {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "ci"]);
        run_git(dir.path(), &["config", "user.email", "ci@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);

        let sha = head_revision(dir.path()).unwrap();
        assert_eq!(sha.len(), 40);
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn head_revision_outside_repo_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            head_revision(dir.path()).unwrap_err(),
            RelayError::GitError(_)
        ));
    }

    #[test]
    fn explicit_revision_wins() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_source_version(Some(" abcdef1234 "), dir.path()).as_deref(),
            Some("abcdef1234")
        );
    }
}
