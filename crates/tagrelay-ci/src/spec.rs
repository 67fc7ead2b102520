//! Build job identity.

use crate::stage::PhaseConfig;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use tagrelay_core::ImageTag;

/// Identity of one local image build.
///
/// Two jobs with the same phases and source version share a `job_digest`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildJob {
    /// Image pipeline being built; recorded as the writer of the tag.
    pub pipeline: String,

    /// Directory the phases run in.
    pub workspace_path: PathBuf,

    /// Revision being built, if known.
    pub source_version: Option<String>,

    /// SHA-256 digest of the ordered phase names and commands.
    pub phases_digest: String,
}

impl BuildJob {
    pub fn new(
        pipeline: impl Into<String>,
        workspace_path: PathBuf,
        phases: &[PhaseConfig],
        source_version: Option<String>,
    ) -> Self {
        Self {
            pipeline: pipeline.into(),
            workspace_path,
            source_version,
            phases_digest: compute_phases_digest(phases),
        }
    }

    /// Tag the built image is published under.
    pub fn image_tag(&self) -> ImageTag {
        ImageTag::from_source_version(self.source_version.as_deref())
    }

    /// Digest over the phases and the source version.
    pub fn job_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.phases_digest.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.source_version.as_deref().unwrap_or_default().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Compute deterministic digest of ordered phases.
fn compute_phases_digest(phases: &[PhaseConfig]) -> String {
    let mut hasher = Sha256::new();
    for phase in phases.iter().filter(|p| p.enabled) {
        hasher.update(phase.name.as_bytes());
        hasher.update(b"\0");
        for command in &phase.commands {
            hasher.update(command.as_bytes());
            hasher.update(b"\n");
        }
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
