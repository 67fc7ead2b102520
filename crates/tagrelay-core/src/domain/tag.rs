//! Image tags and the slots they are published to.

use serde::{Deserialize, Serialize};
use slot_state::{SlotName, StorageResult};

/// Sentinel held by a tag slot until the first successful build.
pub const DRY_RUN_TAG: &str = "none";

/// Last segment of every image tag slot.
pub const TAG_SLOT_LEAF: &str = "EcrTag";

const LATEST: &str = "latest";
const SHORT_SHA_LEN: usize = 7;

/// Tag applied to a pushed image and published to its slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageTag(String);

impl ImageTag {
    /// Derive the tag from the resolved source revision.
    ///
    /// First 7 characters of the revision; `latest` when there is none.
    pub fn from_source_version(source_version: Option<&str>) -> Self {
        let short: String = source_version
            .map(str::trim)
            .unwrap_or_default()
            .chars()
            .take(SHORT_SHA_LEN)
            .collect();

        if short.is_empty() {
            ImageTag(LATEST.to_string())
        } else {
            ImageTag(short)
        }
    }

    /// Use an explicit tag (e.g. a release label).
    pub fn explicit(tag: impl Into<String>) -> Option<Self> {
        let tag = tag.into();
        if tag.trim().is_empty() {
            None
        } else {
            Some(ImageTag(tag))
        }
    }

    /// The not-ready sentinel.
    pub fn dry_run() -> Self {
        ImageTag(DRY_RUN_TAG.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a slot value denotes a published image.
    pub fn is_ready(value: &str) -> bool {
        value != DRY_RUN_TAG
    }
}

impl std::fmt::Display for ImageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Tag slot of the image pipeline living at construct path `scope_path`.
///
/// `CdkPipeline/dev/SubPipes/ApiHandlerPipeline` maps to
/// `/CdkPipeline/dev/SubPipes/ApiHandlerPipeline/EcrTag`.
pub fn slot_name_for(scope_path: &str) -> StorageResult<SlotName> {
    let scope = scope_path.trim_matches('/');
    SlotName::parse(format!("/{scope}/{TAG_SLOT_LEAF}"))
}
