//! Build phase definitions and configuration.

use serde::{Deserialize, Serialize};
use tagrelay_core::BuildSpec;

/// Phases of a build spec, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuildPhase {
    /// Enter the project directory, install tooling.
    Install,

    /// Fetch secrets, derive the image tag, log in to registries.
    PreBuild,

    /// Build and tag the image.
    Build,

    /// Push the image (and, in shell mode, announce the tag).
    PostBuild,
}

impl BuildPhase {
    pub const ALL: [BuildPhase; 4] = [
        BuildPhase::Install,
        BuildPhase::PreBuild,
        BuildPhase::Build,
        BuildPhase::PostBuild,
    ];

    /// Get the phase name as it appears in a build spec.
    pub fn name(&self) -> &'static str {
        match self {
            BuildPhase::Install => "install",
            BuildPhase::PreBuild => "pre_build",
            BuildPhase::Build => "build",
            BuildPhase::PostBuild => "post_build",
        }
    }
}

/// Configuration for one phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseConfig {
    /// Phase name.
    pub name: String,

    /// Shell commands, run in order in one script.
    pub commands: Vec<String>,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,

    /// Whether this phase runs.
    pub enabled: bool,

    /// Extra environment, in order.
    pub env: Vec<(String, String)>,
}

impl PhaseConfig {
    /// One config per build spec phase, in order.
    ///
    /// Every phase receives `env`. Phases without commands are disabled.
    pub fn from_build_spec(
        spec: &BuildSpec,
        env: &[(String, String)],
        timeout_secs: u64,
    ) -> Vec<Self> {
        spec.phases()
            .into_iter()
            .map(|(name, phase)| Self {
                name: name.to_string(),
                commands: phase.commands.clone(),
                timeout_secs,
                enabled: !phase.commands.is_empty(),
                env: env.to_vec(),
            })
            .collect()
    }

    /// Create a custom phase configuration.
    pub fn custom(name: impl Into<String>, commands: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            commands,
            timeout_secs,
            enabled: true,
            env: Vec::new(),
        }
    }

    /// Add or replace one env entry.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.env.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.env.push((key, value)),
        }
        self
    }

    /// Disable this phase.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagrelay_core::{ImageBuildProject, PublishMode, SlotName, Stage};

    fn spec() -> BuildSpec {
        ImageBuildProject {
            stage: Stage::Dev,
            repository_uri: "123456789012.dkr.ecr.us-west-2.amazonaws.com/api".to_string(),
            path: None,
            build_env: vec![],
            build_secrets: vec![],
            docker_hub: None,
            tag_slot: SlotName::parse("/p/dev/SubPipes/Api/EcrTag").unwrap(),
            triggers: vec![],
            region: "us-west-2".to_string(),
            account: "123456789012".to_string(),
        }
        .render(PublishMode::Native)
    }

    #[test]
    fn test_phase_names_follow_build_spec() {
        let names: Vec<_> = BuildPhase::ALL.iter().map(BuildPhase::name).collect();
        assert_eq!(names, vec!["install", "pre_build", "build", "post_build"]);
    }

    #[test]
    fn test_from_build_spec_disables_empty_phases() {
        let env = vec![("STAGE".to_string(), "dev".to_string())];
        let phases = PhaseConfig::from_build_spec(&spec(), &env, 600);

        assert_eq!(phases.len(), 4);
        assert_eq!(phases[0].name, "install");
        assert!(!phases[0].enabled);
        assert!(phases[1].enabled);
        assert!(phases.iter().all(|p| p.env == env && p.timeout_secs == 600));
    }

    #[test]
    fn test_with_env_replaces_existing_key() {
        let phase = PhaseConfig::custom("build", vec!["true".to_string()], 60)
            .with_env("STAGE", "dev")
            .with_env("STAGE", "prod");
        assert_eq!(phase.env, vec![("STAGE".to_string(), "prod".to_string())]);
    }

    #[test]
    fn test_phase_config_disabled() {
        let config = PhaseConfig::custom("build", vec![], 60).disabled();
        assert!(!config.enabled);
    }
}
