//! Build specifications.
//!
//! An [`ImageBuildProject`] describes how one container image is built,
//! tagged, pushed and announced. [`ImageBuildProject::render`] turns it into
//! a CodeBuild-style [`BuildSpec`] whose phases are plain shell commands.
//! [`StaticSiteBuildProject`] does the same for a node site synced to a
//! bucket, and [`SynthProject`] for the root pipeline's synth step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use slot_state::SlotName;

use crate::domain::Stage;
use crate::shell;

/// Env key holding the docker hub token inside the build.
pub const DOCKER_HUB_SECRET_KEY: &str = "DOCKER_HUB_SECRET";

/// Docker hub credentials, used to avoid pull throttling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DockerHub {
    pub account: String,
    /// Secret id holding the access token.
    pub secret: String,
}

/// How a rendered build announces the new tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishMode {
    /// `post_build` writes the slot and starts downstream pipelines itself.
    #[default]
    Shell,
    /// The caller publishes through [`crate::TagPublisher`] after the build.
    Native,
}

/// One image pipeline build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBuildProject {
    pub stage: Stage,
    /// Registry repository the image is pushed to.
    pub repository_uri: String,
    /// Subdirectory of the source holding the Dockerfile.
    #[serde(default)]
    pub path: Option<String>,
    /// Extra build env, in order. Also passed as build args.
    #[serde(default)]
    pub build_env: Vec<(String, String)>,
    /// Extra secrets as `(env key, secret id)`, in order.
    #[serde(default)]
    pub build_secrets: Vec<(String, String)>,
    #[serde(default)]
    pub docker_hub: Option<DockerHub>,
    /// Slot the tag is published to.
    pub tag_slot: SlotName,
    /// Pipelines started once the tag is published.
    #[serde(default)]
    pub triggers: Vec<String>,
    pub region: String,
    pub account: String,
}

impl ImageBuildProject {
    /// Environment of the build, in order.
    ///
    /// `STAGE`, `REPOSITORY_URI` and `DOCKER_HUB_ACCOUNT` come first. Extra
    /// entries follow; one that reuses an earlier key replaces its value in
    /// place.
    pub fn build_env(&self) -> Vec<(String, String)> {
        let mut env = vec![
            ("STAGE".to_string(), self.stage.as_str().to_string()),
            ("REPOSITORY_URI".to_string(), self.repository_uri.clone()),
            (
                "DOCKER_HUB_ACCOUNT".to_string(),
                self.docker_hub
                    .as_ref()
                    .map(|hub| hub.account.clone())
                    .unwrap_or_default(),
            ),
        ];

        for (key, value) in &self.build_env {
            match env.iter_mut().find(|(k, _)| k == key) {
                Some(slot) => slot.1 = value.clone(),
                None => env.push((key.clone(), value.clone())),
            }
        }
        env
    }

    /// `docker build` arguments.
    ///
    /// Build env values are inlined. Secrets are passed by reference to the
    /// shell variable fetched in `pre_build`, so they never land in the
    /// rendered spec.
    pub fn build_args(&self) -> String {
        self.build_env()
            .iter()
            .map(|(k, v)| format!("--build-arg={k}={}", shell::double_quote(v)))
            .chain(
                self.build_secrets
                    .iter()
                    .map(|(k, _)| format!("--build-arg={k}=\"${k}\"")),
            )
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Every secret the build reads, docker hub first.
    pub fn all_secrets(&self) -> Vec<(String, String)> {
        self.docker_hub
            .iter()
            .map(|hub| (DOCKER_HUB_SECRET_KEY.to_string(), hub.secret.clone()))
            .chain(self.build_secrets.iter().cloned())
            .collect()
    }

    /// Commands that load each secret into its env key.
    pub fn secret_fetch_commands(&self) -> Vec<String> {
        self.all_secrets()
            .iter()
            .map(|(key, id)| {
                format!(
                    "{key}=\"$(aws secretsmanager get-secret-value --secret-id {} \
                     | jq -r .SecretString)\"",
                    shell::quote(id)
                )
            })
            .collect()
    }

    fn registry_host(&self) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com", self.account, self.region)
    }

    /// Render the build specification.
    pub fn render(&self, mode: PublishMode) -> BuildSpec {
        let install = cd_command(self.path.as_deref()).into_iter().collect();

        let mut pre_build = vec!["aws --version".to_string()];
        pre_build.extend(self.secret_fetch_commands());
        pre_build.push(
            "COMMIT_HASH=\"$(echo $CODEBUILD_RESOLVED_SOURCE_VERSION | cut -c 1-7)\"".to_string(),
        );
        pre_build.push("IMAGE_TAG=\"${COMMIT_HASH:=latest}\"".to_string());
        if self.docker_hub.is_some() {
            pre_build.push(format!(
                "docker login --username \"$DOCKER_HUB_ACCOUNT\" \
                 --password \"${DOCKER_HUB_SECRET_KEY}\""
            ));
        }

        let build = vec![
            format!(
                "docker build -t \"$REPOSITORY_URI:latest\" {} .",
                self.build_args()
            ),
            "docker tag \"$REPOSITORY_URI:latest\" \"$REPOSITORY_URI:$IMAGE_TAG\"".to_string(),
        ];

        let mut post_build = Vec::new();
        if self.docker_hub.is_some() {
            post_build.push("docker logout".to_string());
        }
        post_build.push(format!(
            "aws ecr get-login-password --region \"{}\" \
             | docker login --username AWS --password-stdin \"{}\"",
            self.region,
            self.registry_host()
        ));
        post_build.push("docker push \"$REPOSITORY_URI:latest\"".to_string());
        post_build.push("docker push \"$REPOSITORY_URI:$IMAGE_TAG\"".to_string());
        if mode == PublishMode::Shell {
            post_build.push(format!(
                "aws ssm put-parameter --name \"{}\" --value \"$IMAGE_TAG\" --overwrite",
                self.tag_slot
            ));
            post_build.extend(self.triggers.iter().map(|pipe| {
                format!(
                    "aws codepipeline start-pipeline-execution --name {}",
                    shell::double_quote(pipe)
                )
            }));
        }

        BuildSpec {
            version: BUILDSPEC_VERSION.to_string(),
            phases: Phases {
                install: Phase::new(install),
                pre_build: Phase::new(pre_build),
                build: Phase::new(build),
                post_build: Phase::new(post_build),
            },
        }
    }
}

/// Node runtime installed for site and synth builds.
pub const NODEJS_RUNTIME: &str = "14.x";

pub const DEFAULT_SITE_BUILD_COMMAND: &str = "npm run build";
pub const DEFAULT_SITE_OUTPUT_DIR: &str = "dist";

fn cd_command(path: Option<&str>) -> Option<String> {
    path.filter(|p| !p.is_empty())
        .map(|p| format!("cd {}", shell::quote(p)))
}

fn nodejs_install() -> Phase {
    Phase::default().with_runtime("nodejs", NODEJS_RUNTIME)
}

/// A static node site built and synced to a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSiteBuildProject {
    pub stage: Stage,
    /// Subdirectory of the source holding `package.json`.
    #[serde(default)]
    pub path: Option<String>,
    /// `npm run build` when absent.
    #[serde(default)]
    pub build_command: Option<String>,
    /// Directory synced to the bucket; `dist` when absent.
    #[serde(default)]
    pub output_dir: Option<String>,
    pub bucket: String,
}

impl StaticSiteBuildProject {
    pub fn build_command(&self) -> &str {
        self.build_command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(DEFAULT_SITE_BUILD_COMMAND)
    }

    pub fn output_dir(&self) -> &str {
        self.output_dir
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(DEFAULT_SITE_OUTPUT_DIR)
    }

    pub fn render(&self) -> BuildSpec {
        let mut pre_build: Vec<String> = cd_command(self.path.as_deref()).into_iter().collect();
        pre_build.push("npm ci".to_string());

        BuildSpec {
            version: BUILDSPEC_VERSION.to_string(),
            phases: Phases {
                install: nodejs_install(),
                pre_build: Phase::new(pre_build),
                build: Phase::new(vec![self.build_command().to_string()]),
                post_build: Phase::new(vec![format!(
                    "aws s3 sync --delete {} s3://{}/",
                    shell::quote(self.output_dir()),
                    self.bucket
                )]),
            },
        }
    }
}

/// Synth step of the root pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthProject {
    /// Subdirectory of the source holding the infrastructure app.
    #[serde(default)]
    pub path: Option<String>,
}

impl SynthProject {
    /// Directory the synthesized templates land in.
    pub fn output_dir(&self) -> String {
        match self.path.as_deref().filter(|p| !p.is_empty()) {
            Some(path) => format!("{path}/cdk.out"),
            None => "cdk.out".to_string(),
        }
    }

    pub fn render(&self) -> BuildSpec {
        let mut build: Vec<String> = cd_command(self.path.as_deref()).into_iter().collect();
        build.extend(["npm ci", "npm run build", "npx cdk synth"].map(String::from));

        BuildSpec {
            version: BUILDSPEC_VERSION.to_string(),
            phases: Phases {
                install: nodejs_install(),
                pre_build: Phase::default(),
                build: Phase::new(build),
                post_build: Phase::default(),
            },
        }
    }
}

/// Buildspec format version.
pub const BUILDSPEC_VERSION: &str = "0.2";

/// A rendered build specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub version: String,
    pub phases: Phases,
}

impl BuildSpec {
    /// Phases in execution order with their names.
    pub fn phases(&self) -> [(&'static str, &Phase); 4] {
        [
            ("install", &self.phases.install),
            ("pre_build", &self.phases.pre_build),
            ("build", &self.phases.build),
            ("post_build", &self.phases.post_build),
        ]
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phases {
    pub install: Phase,
    pub pre_build: Phase,
    pub build: Phase,
    pub post_build: Phase,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Phase {
    /// Runtimes installed before the phase runs, e.g. `nodejs = "14.x"`.
    #[serde(
        rename = "runtime-versions",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub runtime_versions: BTreeMap<String, String>,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl Phase {
    /// Build a phase, dropping blank commands.
    pub fn new(commands: Vec<String>) -> Self {
        Self {
            runtime_versions: BTreeMap::new(),
            commands: commands
                .into_iter()
                .filter(|c| !c.trim().is_empty())
                .collect(),
        }
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>, version: impl Into<String>) -> Self {
        self.runtime_versions.insert(runtime.into(), version.into());
        self
    }
}
