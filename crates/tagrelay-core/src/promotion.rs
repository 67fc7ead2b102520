//! Promotion of an application through its stages.
//!
//! A [`PromotionPlan`] is the ordered list of steps derived from a
//! [`Manifest`]: shared DNS first, then for every stage its image pipelines
//! (guarded by a manual approval where the stage requires one, followed by
//! a wait on every image slot) and finally the apps consuming the tags.
//!
//! [`PromotionRunner`] walks the plan against three ports: an
//! [`ApprovalGate`], a [`Deployer`] and the [`ParameterStore`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use slot_state::{ParameterStore, SlotName};
use tokio::process::Command;
use tracing::{info, info_span, instrument, Instrument};

use crate::domain::{ImageTag, RelayError, Result, Stage, DRY_RUN_TAG};
use crate::manifest::{Manifest, SUB_PIPES};
use crate::obs::emit_promotion_step;
use crate::poller::{PollParameter, PollProps};
use crate::publisher::ensure_slot;

/// Approval step guarding promotion into a stage that requires one.
pub const PROMOTE_APPROVAL: &str = "PromoteToProd";

/// Wait step following every sub-pipes deployment.
pub const WAIT_FOR_IMAGES: &str = "WaitForImages";

/// Name of the DNS step.
pub const DNS_STEP: &str = "DnsStage";

/// An image pipeline and the slot its tag lands in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageSlot {
    pub image: String,
    pub slot: SlotName,
}

/// One app deployment within an app step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppDeployment {
    pub app: String,
    pub images: Vec<ImageSlot>,
    pub command: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepKind {
    Dns {
        command: Option<String>,
    },
    SubPipes {
        stage: Stage,
        images: Vec<ImageSlot>,
        command: Option<String>,
    },
    App {
        stage: Stage,
        apps: Vec<AppDeployment>,
    },
}

/// A wait attached after a step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitStep {
    pub name: String,
    pub image: String,
    #[serde(skip)]
    pub poll: PollParameter,
    pub slot: SlotName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionStep {
    /// `DnsStage`, `{stage}/SubPipes` or `{stage}/App`.
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
    /// Manual approvals requested before the step.
    pub approvals: Vec<String>,
    /// Waits run after the step.
    pub waits: Vec<WaitStep>,
}

/// Ordered promotion steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromotionPlan {
    pub pipeline: String,
    pub steps: Vec<PromotionStep>,
}

impl PromotionPlan {
    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        let mut steps = vec![PromotionStep {
            name: DNS_STEP.to_string(),
            kind: StepKind::Dns {
                command: manifest.dns_command.clone(),
            },
            approvals: Vec::new(),
            waits: Vec::new(),
        }];

        for &stage in &manifest.stages {
            let images = manifest
                .image_pipelines
                .iter()
                .map(|image| {
                    Ok(ImageSlot {
                        image: image.id.clone(),
                        slot: manifest.slot_for(stage, &image.id)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            let approvals = if stage.requires_approval() {
                vec![PROMOTE_APPROVAL.to_string()]
            } else {
                Vec::new()
            };

            let waits = images
                .iter()
                .map(|image| {
                    let mut props = PollProps::until_not(image.slot.as_str(), DRY_RUN_TAG)
                        .with_poll_period(manifest.poll_period());
                    props.timeout = manifest.wait_timeout();
                    Ok(WaitStep {
                        name: WAIT_FOR_IMAGES.to_string(),
                        image: image.image.clone(),
                        poll: PollParameter::new(props)?,
                        slot: image.slot.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            steps.push(PromotionStep {
                name: format!("{stage}/{SUB_PIPES}"),
                kind: StepKind::SubPipes {
                    stage,
                    images: images.clone(),
                    command: manifest.sub_pipes_command.clone(),
                },
                approvals,
                waits,
            });

            let apps = manifest
                .apps
                .iter()
                .map(|app| AppDeployment {
                    app: app.id.clone(),
                    images: images
                        .iter()
                        .filter(|i| app.images.contains(&i.image))
                        .cloned()
                        .collect(),
                    command: app.deploy_command.clone(),
                })
                .collect();

            steps.push(PromotionStep {
                name: format!("{stage}/App"),
                kind: StepKind::App { stage, apps },
                approvals: Vec::new(),
                waits: Vec::new(),
            });
        }

        Ok(Self {
            pipeline: manifest.pipeline.clone(),
            steps,
        })
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

/// Outcome of a manual approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    Approved,
    Rejected { reason: String },
}

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Ask for approval `approval` guarding `step`.
    async fn request(&self, step: &str, approval: &str) -> Result<ApprovalDecision>;
}

/// What a deployer is asked to roll out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployRequest {
    pub step: String,
    /// App id for app steps, the step name otherwise.
    pub target: String,
    pub stage: Option<Stage>,
    pub command: Option<String>,
    /// Image id to resolved tag.
    pub tags: BTreeMap<String, String>,
}

#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, request: &DeployRequest) -> Result<()>;
}

/// Approves every request.
#[derive(Debug, Default, Clone)]
pub struct AutoApproval;

#[async_trait]
impl ApprovalGate for AutoApproval {
    async fn request(&self, step: &str, approval: &str) -> Result<ApprovalDecision> {
        info!(step = %step, approval = %approval, "Auto-approving");
        Ok(ApprovalDecision::Approved)
    }
}

/// Rejects every request.
#[derive(Debug, Clone)]
pub struct DenyApproval {
    pub reason: String,
}

#[async_trait]
impl ApprovalGate for DenyApproval {
    async fn request(&self, _step: &str, _approval: &str) -> Result<ApprovalDecision> {
        Ok(ApprovalDecision::Rejected {
            reason: self.reason.clone(),
        })
    }
}

/// Deployer that records requests, optionally failing chosen targets.
#[derive(Debug, Default)]
pub struct RecordingDeployer {
    requests: Mutex<Vec<DeployRequest>>,
    failing: Vec<String>,
}

impl RecordingDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(mut self, target: impl Into<String>) -> Self {
        self.failing.push(target.into());
        self
    }

    pub fn requests(&self) -> Vec<DeployRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Deployer for RecordingDeployer {
    async fn deploy(&self, request: &DeployRequest) -> Result<()> {
        self.requests.lock().unwrap().push(request.clone());
        if self.failing.contains(&request.target) {
            return Err(RelayError::DeployFailed {
                step: request.step.clone(),
                reason: format!("{} rejected by recording deployer", request.target),
            });
        }
        Ok(())
    }
}

/// Runs each deploy command with `bash -c`.
///
/// The command sees `STAGE` and one `TAG_<IMAGE>` variable per resolved tag.
/// Requests without a command succeed without running anything.
#[derive(Debug, Default, Clone)]
pub struct ShellDeployer;

impl ShellDeployer {
    /// Env key carrying the tag of `image`.
    pub fn tag_env_key(image: &str) -> String {
        let slug: String = image
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("TAG_{slug}")
    }
}

#[async_trait]
impl Deployer for ShellDeployer {
    async fn deploy(&self, request: &DeployRequest) -> Result<()> {
        let Some(command) = request.command.as_deref() else {
            info!(step = %request.step, target = %request.target, "No deploy command, skipping");
            return Ok(());
        };

        let mut cmd = Command::new("bash");
        cmd.arg("-c").arg(command);
        if let Some(stage) = request.stage {
            cmd.env("STAGE", stage.as_str());
        }
        for (image, tag) in &request.tags {
            cmd.env(Self::tag_env_key(image), tag);
        }

        let status = cmd.status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(RelayError::DeployFailed {
                step: request.step.clone(),
                reason: format!(
                    "{} exited with code {}",
                    request.target,
                    status.code().unwrap_or(-1)
                ),
            })
        }
    }
}

/// What happened during one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub step: String,
    pub approvals: Vec<String>,
    pub deployed: Vec<String>,
    /// Slot to value observed by waits or consumed by app deploys.
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PromotionReport {
    pub steps: Vec<StepReport>,
}

/// Executes a [`PromotionPlan`] step by step, stopping at the first failure.
#[derive(Clone)]
pub struct PromotionRunner {
    store: Arc<dyn ParameterStore>,
    approvals: Arc<dyn ApprovalGate>,
    deployer: Arc<dyn Deployer>,
}

impl PromotionRunner {
    pub fn new(
        store: Arc<dyn ParameterStore>,
        approvals: Arc<dyn ApprovalGate>,
        deployer: Arc<dyn Deployer>,
    ) -> Self {
        Self {
            store,
            approvals,
            deployer,
        }
    }

    #[instrument(skip(self, plan), fields(pipeline = %plan.pipeline))]
    pub async fn run(&self, plan: &PromotionPlan) -> Result<PromotionReport> {
        let mut report = PromotionReport::default();
        for step in &plan.steps {
            let span = info_span!("tagrelay.step", step = %step.name);
            let step_report = self.run_step(step).instrument(span).await?;
            report.steps.push(step_report);
        }
        info!(steps = report.steps.len(), "Promotion complete");
        Ok(report)
    }

    async fn run_step(&self, step: &PromotionStep) -> Result<StepReport> {
        let mut report = StepReport {
            step: step.name.clone(),
            approvals: Vec::new(),
            deployed: Vec::new(),
            tags: BTreeMap::new(),
        };

        for approval in &step.approvals {
            match self.approvals.request(&step.name, approval).await? {
                ApprovalDecision::Approved => {
                    emit_promotion_step(&step.name, approval, true);
                    report.approvals.push(approval.clone());
                }
                ApprovalDecision::Rejected { reason } => {
                    emit_promotion_step(&step.name, approval, false);
                    return Err(RelayError::ApprovalRejected {
                        step: step.name.clone(),
                        reason,
                    });
                }
            }
        }

        match &step.kind {
            StepKind::Dns { command } => {
                let request = DeployRequest {
                    step: step.name.clone(),
                    target: step.name.clone(),
                    stage: None,
                    command: command.clone(),
                    tags: BTreeMap::new(),
                };
                self.deploy(&request).await?;
                report.deployed.push(request.target);
            }
            StepKind::SubPipes {
                stage,
                images,
                command,
            } => {
                for image in images {
                    ensure_slot(self.store.as_ref(), &image.slot).await?;
                }
                let request = DeployRequest {
                    step: step.name.clone(),
                    target: step.name.clone(),
                    stage: Some(*stage),
                    command: command.clone(),
                    tags: BTreeMap::new(),
                };
                self.deploy(&request).await?;
                report.deployed.push(request.target);
            }
            StepKind::App { stage, apps } => {
                for app in apps {
                    let mut tags = BTreeMap::new();
                    for image in &app.images {
                        let value = self.ready_tag(&image.slot).await?;
                        report.tags.insert(image.slot.to_string(), value.clone());
                        tags.insert(image.image.clone(), value);
                    }
                    let request = DeployRequest {
                        step: step.name.clone(),
                        target: app.app.clone(),
                        stage: Some(*stage),
                        command: app.command.clone(),
                        tags,
                    };
                    self.deploy(&request).await?;
                    report.deployed.push(request.target);
                }
            }
        }

        for wait in &step.waits {
            let outcome = wait.poll.wait(self.store.as_ref()).await?;
            emit_promotion_step(&step.name, &wait.name, true);
            report.tags.insert(wait.slot.to_string(), outcome.value);
        }

        Ok(report)
    }

    async fn deploy(&self, request: &DeployRequest) -> Result<()> {
        let result = self.deployer.deploy(request).await.map_err(|e| match e {
            RelayError::DeployFailed { .. } => e,
            other => RelayError::DeployFailed {
                step: request.step.clone(),
                reason: other.to_string(),
            },
        });
        emit_promotion_step(&request.step, &request.target, result.is_ok());
        result
    }

    /// Current tag in `slot`; an unset slot or the sentinel is not ready.
    async fn ready_tag(&self, slot: &SlotName) -> Result<String> {
        match self.store.get(slot).await? {
            Some(record) if ImageTag::is_ready(&record.value) => Ok(record.value),
            other => Err(RelayError::SlotNotReady {
                slot: slot.to_string(),
                value: other.map(|r| r.value),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slot_state::fakes::MemoryParameterStore;
    use slot_state::WriteMetadata;

    const MANIFEST: &str = r#"
pipeline = "CdkPipeline"
region = "us-west-2"
account = "123456789012"
stages = ["dev", "prod"]

[[image_pipelines]]
id = "ApiHandlerPipeline"
repository = { name = "RedType/bg", secret = "github-token" }

[[apps]]
id = "BackendStack"
images = ["ApiHandlerPipeline"]

[[apps]]
id = "FrontendStack"
"#;

    fn plan() -> PromotionPlan {
        PromotionPlan::from_manifest(&Manifest::from_toml_str(MANIFEST).unwrap()).unwrap()
    }

    #[test]
    fn plan_orders_steps() {
        assert_eq!(
            plan().step_names(),
            vec!["DnsStage", "dev/SubPipes", "dev/App", "prod/SubPipes", "prod/App"]
        );
    }

    #[test]
    fn only_prod_sub_pipes_need_approval() {
        let plan = plan();
        assert!(plan.steps[1].approvals.is_empty());
        assert_eq!(plan.steps[3].approvals, vec![PROMOTE_APPROVAL]);
        assert!(plan.steps[4].approvals.is_empty());
    }

    #[test]
    fn sub_pipes_wait_for_every_image() {
        let plan = plan();
        let waits = &plan.steps[1].waits;
        assert_eq!(waits.len(), 1);
        assert_eq!(waits[0].name, WAIT_FOR_IMAGES);
        assert_eq!(
            waits[0].slot.as_str(),
            "/CdkPipeline/dev/SubPipes/ApiHandlerPipeline/EcrTag"
        );
        assert_eq!(
            waits[0].poll.condition(),
            &crate::poller::WaitCondition::NotEquals(DRY_RUN_TAG.to_string())
        );
    }

    #[test]
    fn app_step_only_carries_referenced_images() {
        let plan = plan();
        match &plan.steps[2].kind {
            StepKind::App { apps, .. } => {
                assert_eq!(apps[0].images.len(), 1);
                assert!(apps[1].images.is_empty());
            }
            other => panic!("expected app step, got {other:?}"),
        }
    }

    #[test]
    fn plan_serializes() {
        let json = serde_json::to_value(plan()).unwrap();
        assert_eq!(json["steps"][0]["kind"], "dns");
        assert_eq!(json["steps"][3]["approvals"][0], PROMOTE_APPROVAL);
    }

    #[test]
    fn tag_env_key_is_shell_safe() {
        assert_eq!(ShellDeployer::tag_env_key("ApiHandlerPipeline"), "TAG_APIHANDLERPIPELINE");
        assert_eq!(ShellDeployer::tag_env_key("api-fn"), "TAG_API_FN");
    }

    #[tokio::test]
    async fn app_refuses_sentinel_slot() {
        let store = Arc::new(MemoryParameterStore::new());
        let slot = SlotName::parse("/CdkPipeline/dev/SubPipes/ApiHandlerPipeline/EcrTag").unwrap();
        store
            .put(&slot, DRY_RUN_TAG, WriteMetadata::by("provision"), false)
            .await
            .unwrap();

        let runner = PromotionRunner::new(
            store,
            Arc::new(AutoApproval),
            Arc::new(RecordingDeployer::new()),
        );
        let app_only = PromotionPlan {
            pipeline: "CdkPipeline".to_string(),
            steps: vec![plan().steps[2].clone()],
        };
        let err = runner.run(&app_only).await.unwrap_err();
        assert!(matches!(
            err,
            RelayError::SlotNotReady { value: Some(ref v), .. } if v == DRY_RUN_TAG
        ));
    }

    #[tokio::test]
    async fn rejected_approval_stops_before_prod() {
        let store = Arc::new(MemoryParameterStore::new());
        for stage in ["dev", "prod"] {
            let slot = SlotName::parse(format!(
                "/CdkPipeline/{stage}/SubPipes/ApiHandlerPipeline/EcrTag"
            ))
            .unwrap();
            store
                .put(&slot, "3f9a2c1", WriteMetadata::by("ci"), true)
                .await
                .unwrap();
        }

        let deployer = Arc::new(RecordingDeployer::new());
        let runner = PromotionRunner::new(
            store,
            Arc::new(DenyApproval {
                reason: "freeze".to_string(),
            }),
            deployer.clone(),
        );

        let err = runner.run(&plan()).await.unwrap_err();
        match err {
            RelayError::ApprovalRejected { step, reason } => {
                assert_eq!(step, "prod/SubPipes");
                assert_eq!(reason, "freeze");
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        let targets: Vec<_> = deployer.requests().into_iter().map(|r| r.target).collect();
        assert_eq!(
            targets,
            vec!["DnsStage", "dev/SubPipes", "BackendStack", "FrontendStack"]
        );
    }

    #[tokio::test]
    async fn deploy_failure_is_reported_with_step() {
        let store = Arc::new(MemoryParameterStore::new());
        let runner = PromotionRunner::new(
            store,
            Arc::new(AutoApproval),
            Arc::new(RecordingDeployer::new().failing("DnsStage")),
        );
        let err = runner.run(&plan()).await.unwrap_err();
        assert!(matches!(err, RelayError::DeployFailed { ref step, .. } if step == "DnsStage"));
    }
}
