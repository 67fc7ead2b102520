//! Source repository of an image pipeline.

use serde::{Deserialize, Serialize};

use super::error::{RelayError, Result};
use super::stage::Stage;

/// GitHub repository an image pipeline sources from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubRepository {
    /// `owner/repo`
    pub name: String,
    /// Tracked branch; `deploy/{stage}` when absent. A `{stage}` placeholder
    /// is replaced with the stage name.
    #[serde(default)]
    pub branch: Option<String>,
    /// Subdirectory holding the buildable project.
    #[serde(default)]
    pub path: Option<String>,
    /// Secret id of the OAuth token used by the source action.
    pub secret: String,
}

impl GithubRepository {
    /// Split `owner/repo`.
    pub fn owner_and_repo(&self) -> Result<(&str, &str)> {
        match self.name.split_once('/') {
            Some((owner, repo))
                if !owner.is_empty() && !repo.is_empty() && !repo.contains('/') =>
            {
                Ok((owner, repo))
            }
            _ => Err(RelayError::InvalidConfig(format!(
                "repository name must be 'owner/repo', got '{}'",
                self.name
            ))),
        }
    }

    /// Branch built for `stage`.
    pub fn branch_for(&self, stage: Stage) -> String {
        match self.branch.as_deref().filter(|b| !b.is_empty()) {
            Some(branch) => stage.expand(branch),
            None => stage.default_branch(),
        }
    }

    /// Non-empty project path, if configured.
    pub fn project_path(&self) -> Option<&str> {
        self.path.as_deref().filter(|p| !p.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(name: &str, branch: Option<&str>) -> GithubRepository {
        GithubRepository {
            name: name.to_string(),
            branch: branch.map(ToString::to_string),
            path: None,
            secret: "github-token".to_string(),
        }
    }

    #[test]
    fn owner_and_repo_split() {
        let r = repo("RedType/bg", None);
        assert_eq!(r.owner_and_repo().unwrap(), ("RedType", "bg"));
    }

    #[test]
    fn owner_and_repo_rejects_malformed_names() {
        assert!(repo("bg", None).owner_and_repo().is_err());
        assert!(repo("a/b/c", None).owner_and_repo().is_err());
        assert!(repo("/bg", None).owner_and_repo().is_err());
    }

    #[test]
    fn branch_defaults_per_stage() {
        let r = repo("RedType/bg", None);
        assert_eq!(r.branch_for(Stage::Prod), "deploy/prod");

        let r = repo("RedType/bg", Some("deploy/dev/apiFn"));
        assert_eq!(r.branch_for(Stage::Prod), "deploy/dev/apiFn");

        let r = repo("RedType/bg", Some("deploy/{stage}/apiFn"));
        assert_eq!(r.branch_for(Stage::Prod), "deploy/prod/apiFn");

        let r = repo("RedType/bg", Some(""));
        assert_eq!(r.branch_for(Stage::Dev), "deploy/dev");
    }

    #[test]
    fn empty_path_is_treated_as_absent() {
        let mut r = repo("RedType/bg", None);
        r.path = Some(String::new());
        assert!(r.project_path().is_none());
        r.path = Some("apiFn".to_string());
        assert_eq!(r.project_path(), Some("apiFn"));
    }
}
