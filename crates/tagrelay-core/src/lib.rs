//! tagrelay core library
//!
//! Parameter-gated pipeline promotion: build pipelines publish image tags to
//! named slots, deploy pipelines wait until the slots leave the dry-run
//! sentinel, and a promotion plan drives stages in order.

pub mod buildspec;
pub mod domain;
pub mod git;
pub mod manifest;
pub mod metrics;
pub mod obs;
pub mod poller;
pub mod promotion;
pub mod publisher;
pub mod shell;
pub mod telemetry;
pub mod trigger;

pub use buildspec::{
    BuildSpec, DockerHub, ImageBuildProject, Phase, PublishMode, StaticSiteBuildProject,
    SynthProject,
};
pub use domain::{
    slot_name_for, GithubRepository, ImageTag, RelayError, Result, Stage, DRY_RUN_TAG,
    TAG_SLOT_LEAF,
};
pub use git::{head_revision, resolve_source_version};
pub use manifest::{AppConfig, ImagePipelineConfig, Manifest, StaticSiteConfig};
pub use poller::{PollOutcome, PollParameter, PollProps, WaitCondition, DEFAULT_POLL_PERIOD};
pub use promotion::{
    ApprovalDecision, ApprovalGate, AutoApproval, DenyApproval, DeployRequest, Deployer,
    PromotionPlan, PromotionReport, PromotionRunner, PromotionStep, RecordingDeployer,
    ShellDeployer, StepKind,
};
pub use publisher::{ensure_slot, PublishOutcome, TagPublisher};
pub use telemetry::init_tracing;
pub use trigger::{PipelineTrigger, RecordingTrigger};

pub use slot_state::{ParameterStore, SlotName, SlotRecord, StorageError, WriteMetadata};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
