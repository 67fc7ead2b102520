//! Deployment stages.

use serde::{Deserialize, Serialize};

use super::error::{RelayError, Result};

/// Environment an application is promoted through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Dev,
    Prod,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Dev => "dev",
            Stage::Prod => "prod",
        }
    }

    /// Branch an image pipeline tracks when none is configured.
    pub fn default_branch(&self) -> String {
        format!("deploy/{}", self.as_str())
    }

    /// Replace every `{stage}` placeholder in `template`.
    pub fn expand(&self, template: &str) -> String {
        template.replace("{stage}", self.as_str())
    }

    /// Whether promotion into this stage waits for a manual approval.
    pub fn requires_approval(&self) -> bool {
        matches!(self, Stage::Prod)
    }
}

impl std::str::FromStr for Stage {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Stage::Dev),
            "prod" => Ok(Stage::Prod),
            other => Err(RelayError::InvalidConfig(format!("unknown stage: {other}"))),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("DEV".parse::<Stage>().unwrap(), Stage::Dev);
        assert_eq!(" prod ".parse::<Stage>().unwrap(), Stage::Prod);
        assert!("staging".parse::<Stage>().is_err());
    }

    #[test]
    fn default_branch_follows_deploy_prefix() {
        assert_eq!(Stage::Dev.default_branch(), "deploy/dev");
        assert_eq!(Stage::Prod.default_branch(), "deploy/prod");
    }

    #[test]
    fn only_prod_requires_approval() {
        assert!(!Stage::Dev.requires_approval());
        assert!(Stage::Prod.requires_approval());
    }
}
