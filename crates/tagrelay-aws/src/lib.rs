//! AWS-backed ports for tagrelay.
//!
//! [`SsmParameterStore`] keeps slots in Systems Manager Parameter Store and
//! [`CodePipelineTrigger`] starts CodePipeline executions. Both build their
//! clients from the default credential chain via [`load_sdk_config`].

mod codepipeline;
mod ssm;

pub use codepipeline::CodePipelineTrigger;
pub use ssm::SsmParameterStore;

/// Load shared AWS configuration (region, credentials) from the environment.
pub async fn load_sdk_config() -> aws_config::SdkConfig {
    aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await
}
