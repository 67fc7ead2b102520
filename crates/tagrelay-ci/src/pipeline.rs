//! Build orchestration and tag publication.

use crate::gate::{CiGate, GateVerdict};
use crate::runner::{BuildSession, CiRunner, StageResult};
use crate::spec::BuildJob;
use crate::stage::PhaseConfig;
use anyhow::Context;
use serde::Serialize;
use slot_state::{SlotName, WriteMetadata};
use std::time::Instant;
use tagrelay_core::git::SOURCE_VERSION_ENV;
use tagrelay_core::obs::slot_span;
use tagrelay_core::{PublishOutcome, TagPublisher};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

/// Result of a complete build.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    /// Id of this execution.
    pub run_id: String,

    /// Whether all phases passed.
    pub success: bool,

    /// Results of executed phases, in order.
    pub stages: Vec<StageResult>,

    /// Enabled phases that did not run because an earlier one failed.
    pub skipped: Vec<String>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Digest of the build job.
    pub job_digest: String,

    pub verdict: GateVerdict,

    /// The publish, when the gate passed.
    pub published: Option<PublishOutcome>,
}

impl PipelineResult {
    /// Number of phases that passed.
    pub fn passed_count(&self) -> usize {
        self.stages.iter().filter(|s| s.passed()).count()
    }

    /// Number of phases that failed.
    pub fn failed_count(&self) -> usize {
        self.stages.iter().filter(|s| !s.passed()).count()
    }
}

/// Build orchestrator.
pub struct BuildPipeline;

impl BuildPipeline {
    /// Run `phases` for `job`, then publish its tag to `slot` if all passed.
    ///
    /// Phases share one [`BuildSession`] and see the job's source version as
    /// `CODEBUILD_RESOLVED_SOURCE_VERSION`, so a shell-derived `IMAGE_TAG`
    /// matches the published tag. The first failing phase stops the build
    /// and nothing is published.
    pub async fn run(
        publisher: &TagPublisher,
        job: &BuildJob,
        phases: Vec<PhaseConfig>,
        slot: &SlotName,
        triggers: &[String],
    ) -> anyhow::Result<PipelineResult> {
        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let session = BuildSession::new()?;

        info!(run_id = %run_id, pipeline = %job.pipeline, slot = %slot, "Starting build");

        let mut stage_results = Vec::new();
        let mut skipped = Vec::new();
        let mut failed = false;

        for config in phases {
            if !config.enabled {
                info!(phase = %config.name, "Skipping disabled phase");
                continue;
            }
            if failed {
                skipped.push(config.name);
                continue;
            }

            let config = match &job.source_version {
                Some(version) => config.with_env(SOURCE_VERSION_ENV, version.as_str()),
                None => config,
            };

            info!(phase = %config.name, "Executing phase");
            let phase_start = Instant::now();
            let result =
                match CiRunner::execute_phase(&config, &job.workspace_path, Some(&session)).await {
                    Ok(r) => r,
                    Err(e) => StageResult::errored(
                        &config.name,
                        &e,
                        phase_start.elapsed().as_millis() as u64,
                    ),
                };

            if !result.passed() {
                warn!(phase = %config.name, exit_code = result.exit_code, "Phase failed");
                failed = true;
            }
            stage_results.push(result);
        }

        let verdict = CiGate::evaluate(&stage_results);
        let published = if verdict.passed {
            let tag = job.image_tag();
            let mut metadata = WriteMetadata::by(&job.pipeline).with_note(format!("run {run_id}"));
            if let Some(version) = &job.source_version {
                metadata = metadata.with_source_version(version);
            }
            let outcome = publisher
                .publish(slot, &tag, metadata, triggers)
                .instrument(slot_span(slot.as_str()))
                .await
                .with_context(|| format!("failed to publish {tag} to {slot}"))?;
            Some(outcome)
        } else {
            info!(message = %verdict.message, "Gate failed, tag not published");
            None
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(run_id = %run_id, success = verdict.passed, duration_ms, "Build finished");

        Ok(PipelineResult {
            run_id,
            success: verdict.passed,
            stages: stage_results,
            skipped,
            duration_ms,
            job_digest: job.job_digest(),
            verdict,
            published,
        })
    }
}
