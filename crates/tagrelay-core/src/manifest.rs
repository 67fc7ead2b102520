//! Promotion manifest.
//!
//! A TOML file describing the root pipeline, its stages, the image pipelines
//! built in every stage, the static sites synced to buckets and the apps that
//! consume the image tags:
//!
//! ```toml
//! pipeline = "CdkPipeline"
//! region = "us-west-2"
//! account = "123456789012"
//! stages = ["dev", "prod"]
//! source = { name = "RedType/bg", path = "iac", secret = "github-token" }
//!
//! [[image_pipelines]]
//! id = "ApiHandlerPipeline"
//! repository = { name = "RedType/bg", path = "apiFn", secret = "github-token" }
//!
//! [[static_sites]]
//! id = "AppPipeline"
//! repository = { name = "RedType/bg", path = "app", secret = "github-token" }
//! bucket = "{stage}-frontend-site"
//!
//! [[apps]]
//! id = "BackendStack"
//! images = ["ApiHandlerPipeline"]
//! deploy_command = "npx cdk deploy BackendStack-$STAGE"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slot_state::SlotName;

use crate::buildspec::{DockerHub, ImageBuildProject, StaticSiteBuildProject, SynthProject};
use crate::domain::{slot_name_for, GithubRepository, RelayError, Result, Stage};
use crate::poller::DEFAULT_POLL_PERIOD;

/// Name of the sub-pipes stage inside each environment stage.
pub const SUB_PIPES: &str = "SubPipes";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Root pipeline name; first segment of every slot.
    pub pipeline: String,
    pub region: String,
    pub account: String,
    /// Stages in promotion order.
    pub stages: Vec<Stage>,
    /// Repository of the root pipeline, synthesized on every change.
    #[serde(default)]
    pub source: Option<GithubRepository>,
    #[serde(default)]
    pub image_pipelines: Vec<ImagePipelineConfig>,
    #[serde(default)]
    pub static_sites: Vec<StaticSiteConfig>,
    #[serde(default)]
    pub apps: Vec<AppConfig>,
    /// Command deploying shared DNS resources before any stage.
    #[serde(default)]
    pub dns_command: Option<String>,
    /// Command provisioning the image pipelines of a stage.
    #[serde(default)]
    pub sub_pipes_command: Option<String>,
    #[serde(default)]
    pub poll_period_secs: Option<u64>,
    #[serde(default)]
    pub wait_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePipelineConfig {
    pub id: String,
    pub repository: GithubRepository,
    /// Registry repository name; `{stage}-{id}` lowercased when absent.
    #[serde(default)]
    pub ecr_repository: Option<String>,
    /// Pipelines started after a publish. `{stage}` is expanded.
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub build_env: BTreeMap<String, String>,
    /// Env key to secret id.
    #[serde(default)]
    pub build_secrets: BTreeMap<String, String>,
    #[serde(default)]
    pub docker_hub: Option<DockerHub>,
}

/// A node site built per stage and synced to a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticSiteConfig {
    pub id: String,
    pub repository: GithubRepository,
    /// Target bucket. `{stage}` is expanded.
    pub bucket: String,
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub id: String,
    /// Image pipelines whose tags this app deploys.
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub deploy_command: Option<String>,
}

impl Manifest {
    /// Parse and validate a manifest.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let manifest: Manifest = toml::from_str(source)?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Read, parse and validate the manifest at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.trim().is_empty() {
            return invalid("pipeline name must not be empty");
        }
        if self.region.trim().is_empty() || self.account.trim().is_empty() {
            return invalid("region and account must be set");
        }
        if self.stages.is_empty() {
            return invalid("at least one stage is required");
        }
        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage) {
                return invalid(format!("stage '{stage}' listed twice"));
            }
        }
        if self.poll_period_secs == Some(0) {
            return invalid("poll_period_secs must be greater than zero");
        }

        let mut pipeline_ids = HashSet::new();
        for image in &self.image_pipelines {
            if image.id.trim().is_empty() {
                return invalid("image pipeline id must not be empty");
            }
            if !pipeline_ids.insert(image.id.as_str()) {
                return invalid(format!("duplicate image pipeline id '{}'", image.id));
            }
            image.repository.owner_and_repo()?;
            for stage in &self.stages {
                self.slot_for(*stage, &image.id)?;
            }
        }

        if let Some(source) = &self.source {
            source.owner_and_repo()?;
        }

        for site in &self.static_sites {
            if site.id.trim().is_empty() {
                return invalid("static site id must not be empty");
            }
            // Sites share the pipeline namespace with images.
            if !pipeline_ids.insert(site.id.as_str()) {
                return invalid(format!("duplicate pipeline id '{}'", site.id));
            }
            if site.bucket.trim().is_empty() {
                return invalid(format!("static site '{}' needs a bucket", site.id));
            }
            site.repository.owner_and_repo()?;
        }

        let mut app_ids = HashSet::new();
        for app in &self.apps {
            if app.id.trim().is_empty() {
                return invalid("app id must not be empty");
            }
            if !app_ids.insert(app.id.as_str()) {
                return invalid(format!("duplicate app id '{}'", app.id));
            }
            for image in &app.images {
                if self.image(image).is_err() {
                    return invalid(format!(
                        "app '{}' references unknown image pipeline '{image}'",
                        app.id
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn image(&self, id: &str) -> Result<&ImagePipelineConfig> {
        self.image_pipelines
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| RelayError::InvalidConfig(format!("unknown image pipeline '{id}'")))
    }

    /// Construct path of an image pipeline: `{pipeline}/{stage}/SubPipes/{id}`.
    pub fn scope_path(&self, stage: Stage, image_id: &str) -> String {
        format!("{}/{stage}/{SUB_PIPES}/{image_id}", self.pipeline)
    }

    /// Tag slot of image pipeline `image_id` in `stage`.
    pub fn slot_for(&self, stage: Stage, image_id: &str) -> Result<SlotName> {
        Ok(slot_name_for(&self.scope_path(stage, image_id))?)
    }

    pub fn poll_period(&self) -> Duration {
        self.poll_period_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_POLL_PERIOD)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_secs.map(Duration::from_secs)
    }

    pub fn registry_host(&self) -> String {
        format!("{}.dkr.ecr.{}.amazonaws.com", self.account, self.region)
    }

    /// Build description of image pipeline `image_id` in `stage`.
    pub fn build_project(&self, stage: Stage, image_id: &str) -> Result<ImageBuildProject> {
        let image = self.image(image_id)?;
        let ecr_repository = image
            .ecr_repository
            .as_deref()
            .map(|name| stage.expand(name))
            .unwrap_or_else(|| format!("{stage}-{}", image.id).to_ascii_lowercase());

        Ok(ImageBuildProject {
            stage,
            repository_uri: format!("{}/{ecr_repository}", self.registry_host()),
            path: image.repository.project_path().map(ToString::to_string),
            build_env: image
                .build_env
                .iter()
                .map(|(k, v)| (k.clone(), stage.expand(v)))
                .collect(),
            build_secrets: image
                .build_secrets
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            docker_hub: image.docker_hub.clone(),
            tag_slot: self.slot_for(stage, image_id)?,
            triggers: image.triggers.iter().map(|t| stage.expand(t)).collect(),
            region: self.region.clone(),
            account: self.account.clone(),
        })
    }

    pub fn static_site(&self, id: &str) -> Result<&StaticSiteConfig> {
        self.static_sites
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| RelayError::InvalidConfig(format!("unknown static site '{id}'")))
    }

    /// Build description of static site `site_id` in `stage`.
    pub fn static_site_project(
        &self,
        stage: Stage,
        site_id: &str,
    ) -> Result<StaticSiteBuildProject> {
        let site = self.static_site(site_id)?;
        Ok(StaticSiteBuildProject {
            stage,
            path: site.repository.project_path().map(ToString::to_string),
            build_command: site.build_command.clone(),
            output_dir: site.output_dir.clone(),
            bucket: stage.expand(&site.bucket),
        })
    }

    /// Synth step of the root pipeline.
    pub fn synth_project(&self) -> SynthProject {
        SynthProject {
            path: self
                .source
                .as_ref()
                .and_then(GithubRepository::project_path)
                .map(ToString::to_string),
        }
    }
}

fn invalid<T>(msg: impl Into<String>) -> Result<T> {
    Err(RelayError::InvalidConfig(msg.into()))
}
