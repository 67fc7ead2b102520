use async_trait::async_trait;
use aws_sdk_ssm::error::DisplayErrorContext;
use aws_sdk_ssm::primitives::DateTime as AwsDateTime;
use aws_sdk_ssm::types::ParameterType;
use chrono::{DateTime, Utc};
use slot_state::{
    validate_value, ParameterStore, SlotName, SlotRecord, StorageError, StorageResult,
    WriteMetadata,
};
use tracing::debug;

/// Slots kept as `String` parameters in SSM Parameter Store.
///
/// Write metadata travels as JSON in the parameter description, so it is
/// only available from [`ParameterStore::history`]. Records returned by
/// `get` and `put` carry the metadata known to the caller, if any.
#[derive(Clone, Debug)]
pub struct SsmParameterStore {
    client: aws_sdk_ssm::Client,
}

impl SsmParameterStore {
    pub fn new(client: aws_sdk_ssm::Client) -> Self {
        Self { client }
    }

    pub fn from_conf(config: &aws_config::SdkConfig) -> Self {
        Self::new(aws_sdk_ssm::Client::new(config))
    }
}

fn backend<E>(err: E) -> StorageError
where
    E: std::error::Error,
{
    StorageError::Backend(DisplayErrorContext(&err).to_string())
}

fn to_utc(date: Option<&AwsDateTime>) -> DateTime<Utc> {
    date.and_then(|d| DateTime::from_timestamp(d.secs(), d.subsec_nanos()))
        .unwrap_or_else(Utc::now)
}

fn version(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or_default()
}

/// Longest description SSM accepts.
const MAX_DESCRIPTION_LEN: usize = 1024;

/// Longest field kept before fitting the description.
const MAX_FIELD_CHARS: usize = 256;

/// Parameter description carrying `metadata`.
///
/// Fits in [`MAX_DESCRIPTION_LEN`]: the note goes first, then `written_by`
/// and `source_version` are cut from the end.
fn encode_metadata(metadata: &WriteMetadata) -> String {
    let cap = |s: &str| s.chars().take(MAX_FIELD_CHARS).collect::<String>();
    let mut metadata = WriteMetadata {
        written_by: cap(&metadata.written_by),
        source_version: metadata.source_version.as_deref().map(cap),
        note: metadata.note.as_deref().map(cap),
    };

    loop {
        let encoded = serde_json::to_string(&metadata).unwrap_or_default();
        if encoded.len() <= MAX_DESCRIPTION_LEN {
            return encoded;
        }
        if metadata.note.take().is_some() || metadata.written_by.pop().is_some() {
            continue;
        }
        match metadata.source_version.as_mut() {
            Some(version) if !version.is_empty() => {
                version.pop();
            }
            _ => return String::new(),
        }
    }
}

/// Metadata stored by [`encode_metadata`], falling back to the IAM user.
fn decode_metadata(description: Option<&str>, user: Option<&str>) -> WriteMetadata {
    description
        .and_then(|d| serde_json::from_str(d).ok())
        .unwrap_or_else(|| WriteMetadata::by(user.unwrap_or_default()))
}

#[async_trait]
impl ParameterStore for SsmParameterStore {
    async fn get(&self, name: &SlotName) -> StorageResult<Option<SlotRecord>> {
        let output = match self.client.get_parameter().name(name.as_str()).send().await {
            Ok(output) => output,
            Err(err) => {
                let err = err.into_service_error();
                if err.is_parameter_not_found() {
                    return Ok(None);
                }
                return Err(backend(err));
            }
        };

        Ok(output.parameter().map(|p| SlotRecord {
            name: name.clone(),
            value: p.value().unwrap_or_default().to_string(),
            version: version(p.version()),
            metadata: WriteMetadata::default(),
            written_at: to_utc(p.last_modified_date()),
        }))
    }

    async fn put(
        &self,
        name: &SlotName,
        value: &str,
        metadata: WriteMetadata,
        overwrite: bool,
    ) -> StorageResult<SlotRecord> {
        validate_value(name, value)?;

        let output = self
            .client
            .put_parameter()
            .name(name.as_str())
            .value(value)
            .r#type(ParameterType::String)
            .description(encode_metadata(&metadata))
            .overwrite(overwrite)
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_parameter_already_exists() {
                    StorageError::AlreadyExists {
                        name: name.to_string(),
                    }
                } else {
                    backend(err)
                }
            })?;

        debug!(slot = %name, version = output.version(), "Parameter written");
        Ok(SlotRecord {
            name: name.clone(),
            value: value.to_string(),
            version: version(output.version()),
            metadata,
            written_at: Utc::now(),
        })
    }

    async fn history(&self, name: &SlotName) -> StorageResult<Vec<SlotRecord>> {
        let mut records = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let result = self
                .client
                .get_parameter_history()
                .name(name.as_str())
                .set_next_token(next_token.take())
                .send()
                .await;

            let output = match result {
                Ok(output) => output,
                Err(err) => {
                    let err = err.into_service_error();
                    if err.is_parameter_not_found() {
                        return Ok(Vec::new());
                    }
                    return Err(backend(err));
                }
            };

            records.extend(output.parameters().iter().map(|p| SlotRecord {
                name: name.clone(),
                value: p.value().unwrap_or_default().to_string(),
                version: version(p.version()),
                metadata: decode_metadata(p.description(), p.last_modified_user()),
                written_at: to_utc(p.last_modified_date()),
            }));

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        // SSM pages oldest first.
        records.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(records)
    }

    async fn delete(&self, name: &SlotName) -> StorageResult<()> {
        self.client
            .delete_parameter()
            .name(name.as_str())
            .send()
            .await
            .map(|_| ())
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_parameter_not_found() {
                    StorageError::NotFound {
                        name: name.to_string(),
                    }
                } else {
                    backend(err)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_through_description() {
        let metadata = WriteMetadata::by("ApiHandlerPipeline").with_source_version("3f9a2c1e77");
        let description = encode_metadata(&metadata);
        assert!(description.len() < 1024);
        assert_eq!(decode_metadata(Some(&description), Some("codebuild-role")), metadata);
    }

    #[test]
    fn oversized_metadata_drops_note_first() {
        let metadata = WriteMetadata::by("ApiHandlerPipeline")
            .with_source_version("3f9a2c1e77")
            .with_note("n".repeat(2000));
        let description = encode_metadata(&metadata);
        assert!(description.len() <= MAX_DESCRIPTION_LEN);

        let decoded = decode_metadata(Some(&description), None);
        assert_eq!(decoded.written_by, "ApiHandlerPipeline");
        assert_eq!(decoded.source_version.as_deref(), Some("3f9a2c1e77"));
    }

    #[test]
    fn oversized_writer_is_cut_to_fit() {
        // Control characters escape to six bytes each.
        let metadata = WriteMetadata::by("\u{1}".repeat(5000)).with_source_version("abc1234");
        let description = encode_metadata(&metadata);
        assert!(description.len() <= MAX_DESCRIPTION_LEN);

        let decoded = decode_metadata(Some(&description), None);
        assert!(!decoded.written_by.is_empty());
        assert_eq!(decoded.source_version.as_deref(), Some("abc1234"));
    }

    #[test]
    fn foreign_description_falls_back_to_user() {
        let metadata = decode_metadata(Some("set by console"), Some("alice"));
        assert_eq!(metadata.written_by, "alice");
        assert!(metadata.source_version.is_none());

        assert_eq!(decode_metadata(None, None).written_by, "");
    }

    #[test]
    fn aws_timestamps_convert() {
        let date = AwsDateTime::from_secs_and_nanos(1_700_000_000, 500);
        let utc = to_utc(Some(&date));
        assert_eq!(utc.timestamp(), 1_700_000_000);
        assert_eq!(utc.timestamp_subsec_nanos(), 500);
    }

    #[test]
    fn negative_versions_clamp_to_zero() {
        assert_eq!(version(-1), 0);
        assert_eq!(version(7), 7);
    }
}
