//! Publishing side of the promotion handshake.
//!
//! A build that pushed its image calls [`TagPublisher::publish`]: the tag is
//! written to the pipeline's slot (always overwriting), then every downstream
//! pipeline is started. Slots are created holding [`DRY_RUN_TAG`] so waiters
//! can tell "never built" apart from a published tag.

use std::sync::Arc;

use serde::Serialize;
use slot_state::{ParameterStore, SlotName, SlotRecord, StorageError, WriteMetadata};
use tracing::{info, instrument, warn};

use crate::domain::{ImageTag, Result, DRY_RUN_TAG};
use crate::metrics::METRICS;
use crate::obs::{emit_pipeline_triggered, emit_slot_published};
use crate::trigger::PipelineTrigger;

/// Result of a publish.
#[derive(Debug, Clone, Serialize)]
pub struct PublishOutcome {
    /// The write that landed in the slot.
    pub record: SlotRecord,
    /// `(pipeline, execution id)` for every started pipeline.
    pub triggered: Vec<(String, String)>,
    /// `(pipeline, error)` for every pipeline that could not be started.
    pub failed_triggers: Vec<(String, String)>,
}

impl PublishOutcome {
    /// Whether every downstream pipeline was started.
    pub fn fully_triggered(&self) -> bool {
        self.failed_triggers.is_empty()
    }
}

/// Create `slot` in `store` holding [`DRY_RUN_TAG`] unless it already exists.
#[instrument(skip(store), fields(slot = %slot))]
pub async fn ensure_slot(store: &dyn ParameterStore, slot: &SlotName) -> Result<SlotRecord> {
    if let Some(existing) = store.get(slot).await? {
        return Ok(existing);
    }

    let metadata =
        WriteMetadata::by("provision").with_note("initial value, overwritten by the first build");
    match store.put(slot, DRY_RUN_TAG, metadata, false).await {
        Ok(record) => {
            info!(version = record.version, "Slot created with dry-run tag");
            Ok(record)
        }
        // Lost a race with a concurrent writer; theirs stands.
        Err(StorageError::AlreadyExists { .. }) => store
            .get(slot)
            .await?
            .ok_or_else(|| StorageError::NotFound { name: slot.to_string() }.into()),
        Err(e) => Err(e.into()),
    }
}

/// Writes tags into slots and starts downstream pipelines.
#[derive(Clone)]
pub struct TagPublisher {
    store: Arc<dyn ParameterStore>,
    trigger: Arc<dyn PipelineTrigger>,
}

impl TagPublisher {
    pub fn new(store: Arc<dyn ParameterStore>, trigger: Arc<dyn PipelineTrigger>) -> Self {
        Self { store, trigger }
    }

    pub fn store(&self) -> &Arc<dyn ParameterStore> {
        &self.store
    }

    /// Create `slot` holding the sentinel if it does not exist yet.
    ///
    /// Returns the current record either way.
    pub async fn ensure_slot(&self, slot: &SlotName) -> Result<SlotRecord> {
        ensure_slot(self.store.as_ref(), slot).await
    }

    /// Publish `tag` to `slot`, then start each pipeline in `triggers` in order.
    ///
    /// Trigger failures do not undo the write.
    #[instrument(skip(self, metadata, triggers), fields(slot = %slot, tag = %tag))]
    pub async fn publish(
        &self,
        slot: &SlotName,
        tag: &ImageTag,
        metadata: WriteMetadata,
        triggers: &[String],
    ) -> Result<PublishOutcome> {
        let record = self.store.put(slot, tag.as_str(), metadata, true).await?;
        METRICS.inc_tags_published();
        emit_slot_published(slot.as_str(), &record.value, record.version);

        let mut triggered = Vec::new();
        let mut failed_triggers = Vec::new();
        for pipeline in triggers {
            match self.trigger.start(pipeline).await {
                Ok(execution_id) => {
                    METRICS.inc_pipelines_triggered();
                    emit_pipeline_triggered(pipeline, &execution_id);
                    triggered.push((pipeline.clone(), execution_id));
                }
                Err(e) => {
                    warn!(pipeline = %pipeline, error = %e, "Failed to start downstream pipeline");
                    failed_triggers.push((pipeline.clone(), e.to_string()));
                }
            }
        }

        Ok(PublishOutcome {
            record,
            triggered,
            failed_triggers,
        })
    }

    /// Put the slot back to the not-ready sentinel.
    #[instrument(skip(self, written_by), fields(slot = %slot))]
    pub async fn reset(&self, slot: &SlotName, written_by: &str) -> Result<SlotRecord> {
        let record = self
            .store
            .put(
                slot,
                DRY_RUN_TAG,
                WriteMetadata::by(written_by).with_note("reset to dry-run tag"),
                true,
            )
            .await?;
        info!(version = record.version, "Slot reset");
        Ok(record)
    }
}
