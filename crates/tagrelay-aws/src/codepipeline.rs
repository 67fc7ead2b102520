use async_trait::async_trait;
use aws_sdk_codepipeline::error::DisplayErrorContext;
use tagrelay_core::{PipelineTrigger, RelayError, Result};
use tracing::debug;

/// Starts pipelines with `StartPipelineExecution`.
#[derive(Clone, Debug)]
pub struct CodePipelineTrigger {
    client: aws_sdk_codepipeline::Client,
}

impl CodePipelineTrigger {
    pub fn new(client: aws_sdk_codepipeline::Client) -> Self {
        Self { client }
    }

    pub fn from_conf(config: &aws_config::SdkConfig) -> Self {
        Self::new(aws_sdk_codepipeline::Client::new(config))
    }
}

#[async_trait]
impl PipelineTrigger for CodePipelineTrigger {
    async fn start(&self, pipeline: &str) -> Result<String> {
        let output = self
            .client
            .start_pipeline_execution()
            .name(pipeline)
            .send()
            .await
            .map_err(|e| RelayError::TriggerFailed {
                pipeline: pipeline.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        let execution_id = output.pipeline_execution_id().unwrap_or_default().to_string();
        debug!(pipeline = %pipeline, execution_id = %execution_id, "Pipeline execution started");
        Ok(execution_id)
    }
}
