//! Domain-level error taxonomy for tagrelay.

use std::time::Duration;

use slot_state::StorageError;

/// tagrelay domain errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("timed out after {waited:?} waiting for {parameter} (last value: {last_value:?})")]
    WaitTimeout {
        parameter: String,
        waited: Duration,
        last_value: Option<String>,
    },

    #[error("approval rejected for {step}: {reason}")]
    ApprovalRejected { step: String, reason: String },

    #[error("deploy of {step} failed: {reason}")]
    DeployFailed { step: String, reason: String },

    #[error("image slot {slot} is not ready (value: {value:?})")]
    SlotNotReady { slot: String, value: Option<String> },

    #[error("failed to start pipeline {pipeline}: {reason}")]
    TriggerFailed { pipeline: String, reason: String },

    #[error("git error: {0}")]
    GitError(String),

    #[error("manifest parse error: {0}")]
    ManifestParse(#[from] toml::de::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tagrelay domain operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_error_display() {
        let err = RelayError::InvalidConfig("no stages".to_string());
        assert!(err.to_string().contains("invalid configuration"));

        let err = RelayError::ApprovalRejected {
            step: "prod/SubPipes".to_string(),
            reason: "declined".to_string(),
        };
        assert!(err.to_string().contains("prod/SubPipes"));
    }

    #[test]
    fn test_wait_timeout_reports_last_value() {
        let err = RelayError::WaitTimeout {
            parameter: "/app/EcrTag".to_string(),
            waited: Duration::from_secs(90),
            last_value: Some("none".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("/app/EcrTag"));
        assert!(msg.contains("none"));
    }

    #[test]
    fn test_storage_error_converts() {
        let err: RelayError = StorageError::Backend("connection reset".to_string()).into();
        assert!(err.to_string().contains("storage error"));
        assert!(err.to_string().contains("connection reset"));
    }
}
