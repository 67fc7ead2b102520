//! Starting downstream pipelines after a publish.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{RelayError, Result};

/// Starts a named pipeline. Returns the execution id.
#[async_trait]
pub trait PipelineTrigger: Send + Sync {
    async fn start(&self, pipeline: &str) -> Result<String>;
}

/// Trigger that records requests instead of starting anything.
///
/// Used by tests and by the CLI `memory` backend. Pipelines registered with
/// [`RecordingTrigger::failing`] return `TriggerFailed`.
#[derive(Debug, Default)]
pub struct RecordingTrigger {
    started: Mutex<Vec<String>>,
    failing: HashSet<String>,
}

impl RecordingTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make starts of `pipeline` fail.
    pub fn failing(mut self, pipeline: impl Into<String>) -> Self {
        self.failing.insert(pipeline.into());
        self
    }

    /// Pipelines started so far, in order.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl PipelineTrigger for RecordingTrigger {
    async fn start(&self, pipeline: &str) -> Result<String> {
        if self.failing.contains(pipeline) {
            return Err(RelayError::TriggerFailed {
                pipeline: pipeline.to_string(),
                reason: "rejected by recording trigger".to_string(),
            });
        }
        self.started.lock().unwrap().push(pipeline.to_string());
        Ok(Uuid::new_v4().to_string())
    }
}
