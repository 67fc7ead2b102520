//! Waiting side of the promotion handshake.
//!
//! [`PollParameter`] blocks a deploy pipeline until a slot's value satisfies
//! a [`WaitCondition`]. The natural use is waiting for an image slot to leave
//! the dry-run sentinel:
//!
//! ```ignore
//! let wait = PollParameter::new(PollProps::until_not(slot, DRY_RUN_TAG))?;
//! let outcome = wait.wait(store.as_ref()).await?;
//! ```
//!
//! The same step can be rendered as a shell loop for a pipeline shell step
//! via [`PollParameter::render_commands`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use slot_state::{ParameterStore, SlotName};
use tokio::time::Instant;
use tracing::{debug, instrument};

use crate::domain::{RelayError, Result};
use crate::metrics::METRICS;
use crate::obs::{emit_poll_attempt, emit_poll_error, emit_poll_satisfied};
use crate::shell;

/// Poll period used when none is configured.
pub const DEFAULT_POLL_PERIOD: Duration = Duration::from_secs(30);

/// Condition a slot value must meet to end the wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "target", rename_all = "snake_case")]
pub enum WaitCondition {
    /// Value equals the target.
    Equals(String),
    /// Value differs from the target.
    NotEquals(String),
}

impl WaitCondition {
    /// Whether `value` ends the wait. An unset slot never does.
    pub fn is_satisfied_by(&self, value: Option<&str>) -> bool {
        match (self, value) {
            (_, None) => false,
            (WaitCondition::Equals(target), Some(v)) => v == target,
            (WaitCondition::NotEquals(target), Some(v)) => v != target,
        }
    }

    fn shell_operator(&self) -> &'static str {
        match self {
            WaitCondition::Equals(_) => "==",
            WaitCondition::NotEquals(_) => "!=",
        }
    }

    fn target(&self) -> &str {
        match self {
            WaitCondition::Equals(t) | WaitCondition::NotEquals(t) => t,
        }
    }
}

/// Construction properties of a poll step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollProps {
    /// Slot to watch.
    pub parameter: String,
    /// Delay between reads. Defaults to 30 seconds.
    #[serde(default, with = "optional_secs")]
    pub poll_period: Option<Duration>,
    /// Stop once the value equals this. Takes precedence over `until_not`.
    #[serde(default)]
    pub until: Option<String>,
    /// Stop once the value differs from this.
    #[serde(default)]
    pub until_not: Option<String>,
    /// Give up after this long. Unbounded when absent.
    #[serde(default, with = "optional_secs")]
    pub timeout: Option<Duration>,
}

impl PollProps {
    /// Wait until `parameter` differs from `target`.
    pub fn until_not(parameter: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            until_not: Some(target.into()),
            ..Self::default()
        }
    }

    /// Wait until `parameter` equals `target`.
    pub fn until(parameter: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            parameter: parameter.into(),
            until: Some(target.into()),
            ..Self::default()
        }
    }

    pub fn with_poll_period(mut self, period: Duration) -> Self {
        self.poll_period = Some(period);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of a completed wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// Value that satisfied the condition.
    pub value: String,
    /// Number of reads, including the final one.
    pub attempts: u64,
    /// Time spent waiting.
    pub waited: Duration,
}

/// A validated poll step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollParameter {
    parameter: SlotName,
    condition: WaitCondition,
    poll_period: Duration,
    timeout: Option<Duration>,
}

impl PollParameter {
    /// Validate `props`.
    ///
    /// Fails unless at least one of `until` / `until_not` is given. An empty
    /// target counts as not given. When both are given, `until` wins.
    pub fn new(props: PollProps) -> Result<Self> {
        let non_empty = |target: Option<String>| target.filter(|t| !t.is_empty());
        let condition = match (non_empty(props.until), non_empty(props.until_not)) {
            (Some(target), _) => WaitCondition::Equals(target),
            (None, Some(target)) => WaitCondition::NotEquals(target),
            (None, None) => {
                return Err(RelayError::InvalidConfig(
                    "one of `until` or `until_not` must be given".to_string(),
                ))
            }
        };

        let poll_period = props.poll_period.unwrap_or(DEFAULT_POLL_PERIOD);
        if poll_period.is_zero() {
            return Err(RelayError::InvalidConfig(
                "poll period must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            parameter: SlotName::parse(props.parameter)?,
            condition,
            poll_period,
            timeout: props.timeout,
        })
    }

    pub fn parameter(&self) -> &SlotName {
        &self.parameter
    }

    pub fn condition(&self) -> &WaitCondition {
        &self.condition
    }

    pub fn poll_period(&self) -> Duration {
        self.poll_period
    }

    /// Read the slot until the condition holds.
    ///
    /// Read errors are logged and retried on the next period; they never
    /// satisfy the condition.
    #[instrument(skip(self, store), fields(slot = %self.parameter, condition = ?self.condition))]
    pub async fn wait(&self, store: &dyn ParameterStore) -> Result<PollOutcome> {
        let started = Instant::now();
        let mut attempts = 0u64;
        let mut last_value: Option<String> = None;

        loop {
            attempts += 1;
            METRICS.inc_polls();

            match store.get(&self.parameter).await {
                Ok(record) => {
                    last_value = record.map(|r| r.value);
                    if self.condition.is_satisfied_by(last_value.as_deref()) {
                        let waited = started.elapsed();
                        let value = last_value.unwrap_or_default();
                        emit_poll_satisfied(
                            self.parameter.as_str(),
                            &value,
                            attempts,
                            waited.as_millis() as u64,
                        );
                        return Ok(PollOutcome {
                            value,
                            attempts,
                            waited,
                        });
                    }
                    emit_poll_attempt(self.parameter.as_str(), attempts, last_value.as_deref());
                }
                Err(e) => emit_poll_error(self.parameter.as_str(), &e),
            }

            let mut delay = self.poll_period;
            if let Some(timeout) = self.timeout {
                let elapsed = started.elapsed();
                if elapsed >= timeout {
                    return Err(RelayError::WaitTimeout {
                        parameter: self.parameter.to_string(),
                        waited: elapsed,
                        last_value,
                    });
                }
                delay = delay.min(timeout - elapsed);
            }

            debug!(delay_ms = delay.as_millis() as u64, "Condition not met, sleeping");
            tokio::time::sleep(delay).await;
        }
    }

    /// Shell loop equivalent to [`PollParameter::wait`].
    ///
    /// An unset or unreadable parameter reads as the empty string, which the
    /// loop treats as "not yet".
    pub fn render_commands(&self) -> Vec<String> {
        let fetch = format!(
            "aws ssm get-parameter --name {} 2>/dev/null | jq -r \".Parameter.Value\" | xargs",
            shell::quote(self.parameter.as_str())
        );
        let test = format!(
            "if [[ -n \"$PARAM_VALUE\" && \"$PARAM_VALUE\" {} {} ]]; then",
            self.condition.shell_operator(),
            shell::double_quote(self.condition.target())
        );

        let mut commands = Vec::new();
        if self.timeout.is_some() {
            commands.push("WAIT_STARTED=$SECONDS".to_string());
        }
        commands.push("while true; do".to_string());
        commands.push(format!("PARAM_VALUE=\"$({fetch})\""));
        commands.push(test);
        commands.push("break".to_string());
        if let Some(timeout) = self.timeout {
            commands.push(format!(
                "elif (( SECONDS - WAIT_STARTED >= {} )); then",
                timeout.as_secs()
            ));
            commands.push(format!(
                "echo \"timed out waiting for {}\" >&2; exit 1",
                self.parameter
            ));
        }
        commands.push("else".to_string());
        commands.push(format!("sleep {}", self.poll_period.as_secs().max(1)));
        commands.push("fi".to_string());
        commands.push("done".to_string());
        commands
    }
}

mod optional_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DRY_RUN_TAG;
    use async_trait::async_trait;
    use slot_state::fakes::MemoryParameterStore;
    use slot_state::{SlotRecord, StorageError, StorageResult, WriteMetadata};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// Memory store whose first `failures` reads fail.
    struct FlakyStore {
        inner: MemoryParameterStore,
        failures: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                inner: MemoryParameterStore::new(),
                failures: AtomicU32::new(failures),
            }
        }
    }

    #[async_trait]
    impl ParameterStore for FlakyStore {
        async fn get(&self, name: &SlotName) -> StorageResult<Option<SlotRecord>> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StorageError::Backend("throttled".to_string()));
            }
            self.inner.get(name).await
        }

        async fn put(
            &self,
            name: &SlotName,
            value: &str,
            metadata: WriteMetadata,
            overwrite: bool,
        ) -> StorageResult<SlotRecord> {
            self.inner.put(name, value, metadata, overwrite).await
        }

        async fn history(&self, name: &SlotName) -> StorageResult<Vec<SlotRecord>> {
            self.inner.history(name).await
        }

        async fn delete(&self, name: &SlotName) -> StorageResult<()> {
            self.inner.delete(name).await
        }
    }

    const SLOT: &str = "/CdkPipeline/dev/SubPipes/Api/EcrTag";

    fn slot() -> SlotName {
        SlotName::parse(SLOT).unwrap()
    }

    #[test]
    fn requires_a_condition() {
        let err = PollParameter::new(PollProps {
            parameter: SLOT.to_string(),
            ..PollProps::default()
        })
        .unwrap_err();
        assert!(matches!(err, RelayError::InvalidConfig(_)));
    }

    #[test]
    fn until_takes_precedence() {
        let props = PollProps {
            parameter: SLOT.to_string(),
            until: Some("ready".to_string()),
            until_not: Some(DRY_RUN_TAG.to_string()),
            ..PollProps::default()
        };
        let poll = PollParameter::new(props).unwrap();
        assert_eq!(poll.condition(), &WaitCondition::Equals("ready".to_string()));
    }

    #[test]
    fn empty_targets_count_as_absent() {
        let props = PollProps {
            parameter: SLOT.to_string(),
            until: Some(String::new()),
            until_not: Some(DRY_RUN_TAG.to_string()),
            ..PollProps::default()
        };
        let poll = PollParameter::new(props).unwrap();
        assert_eq!(
            poll.condition(),
            &WaitCondition::NotEquals(DRY_RUN_TAG.to_string())
        );

        let both_empty = PollProps {
            parameter: SLOT.to_string(),
            until: Some(String::new()),
            until_not: Some(String::new()),
            ..PollProps::default()
        };
        assert!(matches!(
            PollParameter::new(both_empty).unwrap_err(),
            RelayError::InvalidConfig(_)
        ));
    }

    #[test]
    fn default_period_is_thirty_seconds() {
        let poll = PollParameter::new(PollProps::until_not(SLOT, DRY_RUN_TAG)).unwrap();
        assert_eq!(poll.poll_period(), Duration::from_secs(30));
    }

    #[test]
    fn rejects_zero_period_and_bad_names() {
        let zero = PollProps::until_not(SLOT, DRY_RUN_TAG).with_poll_period(Duration::ZERO);
        assert!(PollParameter::new(zero).is_err());

        let bad = PollProps::until_not("not-rooted", DRY_RUN_TAG);
        assert!(matches!(
            PollParameter::new(bad).unwrap_err(),
            RelayError::Storage(_)
        ));
    }

    #[test]
    fn unset_value_never_satisfies() {
        assert!(!WaitCondition::NotEquals("none".into()).is_satisfied_by(None));
        assert!(!WaitCondition::Equals("none".into()).is_satisfied_by(None));
        assert!(WaitCondition::NotEquals("none".into()).is_satisfied_by(Some("abc1234")));
        assert!(!WaitCondition::NotEquals("none".into()).is_satisfied_by(Some("none")));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_immediately_when_already_published() {
        let store = MemoryParameterStore::new();
        store
            .put(&slot(), "abc1234", WriteMetadata::by("ci"), true)
            .await
            .unwrap();

        let poll = PollParameter::new(PollProps::until_not(SLOT, DRY_RUN_TAG)).unwrap();
        let outcome = poll.wait(&store).await.unwrap();

        assert_eq!(outcome.value, "abc1234");
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.waited, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_publisher_to_replace_sentinel() {
        let store = Arc::new(MemoryParameterStore::new());
        store
            .put(&slot(), DRY_RUN_TAG, WriteMetadata::by("provision"), false)
            .await
            .unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(75)).await;
                store
                    .put(&slot(), "3f9a2c1", WriteMetadata::by("ci"), true)
                    .await
                    .unwrap();
            })
        };

        let poll = PollParameter::new(
            PollProps::until_not(SLOT, DRY_RUN_TAG).with_poll_period(Duration::from_secs(30)),
        )
        .unwrap();
        let outcome = poll.wait(store.as_ref()).await.unwrap();
        writer.await.unwrap();

        // Reads at t=0, 30, 60 see the sentinel; t=90 sees the tag.
        assert_eq!(outcome.value, "3f9a2c1");
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.waited, Duration::from_secs(90));
    }

    #[tokio::test(start_paused = true)]
    async fn unset_slot_keeps_waiting_until_created() {
        let store = Arc::new(MemoryParameterStore::new());

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                store
                    .put(&slot(), "deadbee", WriteMetadata::by("ci"), true)
                    .await
                    .unwrap();
            })
        };

        let poll = PollParameter::new(
            PollProps::until_not(SLOT, DRY_RUN_TAG).with_poll_period(Duration::from_secs(2)),
        )
        .unwrap();
        let outcome = poll.wait(store.as_ref()).await.unwrap();
        writer.await.unwrap();

        assert_eq!(outcome.value, "deadbee");
        assert_eq!(outcome.attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn until_waits_for_exact_value() {
        let store = Arc::new(MemoryParameterStore::new());
        store
            .put(&slot(), "aaaaaaa", WriteMetadata::by("ci"), true)
            .await
            .unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                store
                    .put(&slot(), "bbbbbbb", WriteMetadata::by("ci"), true)
                    .await
                    .unwrap();
            })
        };

        let poll = PollParameter::new(
            PollProps::until(SLOT, "bbbbbbb").with_poll_period(Duration::from_secs(4)),
        )
        .unwrap();
        let outcome = poll.wait(store.as_ref()).await.unwrap();
        writer.await.unwrap();

        assert_eq!(outcome.value, "bbbbbbb");
        assert_eq!(outcome.waited, Duration::from_secs(12));
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_with_last_value() {
        let store = MemoryParameterStore::new();
        store
            .put(&slot(), DRY_RUN_TAG, WriteMetadata::by("provision"), false)
            .await
            .unwrap();

        let poll = PollParameter::new(
            PollProps::until_not(SLOT, DRY_RUN_TAG)
                .with_poll_period(Duration::from_secs(30))
                .with_timeout(Duration::from_secs(45)),
        )
        .unwrap();
        let err = poll.wait(&store).await.unwrap_err();

        match err {
            RelayError::WaitTimeout {
                waited, last_value, ..
            } => {
                assert_eq!(waited, Duration::from_secs(45));
                assert_eq!(last_value.as_deref(), Some(DRY_RUN_TAG));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn read_errors_are_retried_and_never_satisfy() {
        let store = FlakyStore::new(3);
        store
            .put(&slot(), "abc1234", WriteMetadata::by("ci"), true)
            .await
            .unwrap();

        let poll = PollParameter::new(
            PollProps::until_not(SLOT, DRY_RUN_TAG).with_poll_period(Duration::from_secs(10)),
        )
        .unwrap();
        let outcome = poll.wait(&store).await.unwrap();

        // Reads at t=0, 10, 20 fail; t=30 sees the tag.
        assert_eq!(outcome.value, "abc1234");
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.waited, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_read_errors_time_out_without_value() {
        let store = FlakyStore::new(u32::MAX);
        let poll = PollParameter::new(
            PollProps::until_not(SLOT, DRY_RUN_TAG)
                .with_poll_period(Duration::from_secs(10))
                .with_timeout(Duration::from_secs(25)),
        )
        .unwrap();

        match poll.wait(&store).await.unwrap_err() {
            RelayError::WaitTimeout { last_value, .. } => assert!(last_value.is_none()),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn rendered_loop_matches_condition() {
        let poll = PollParameter::new(PollProps::until_not(SLOT, DRY_RUN_TAG)).unwrap();
        let commands = poll.render_commands();

        assert_eq!(commands.first().map(String::as_str), Some("while true; do"));
        assert_eq!(commands.last().map(String::as_str), Some("done"));
        assert!(commands[1].contains(&format!("aws ssm get-parameter --name {SLOT}")));
        assert!(commands[2].contains("!= \"none\""));
        assert!(commands.contains(&"sleep 30".to_string()));
    }

    #[test]
    fn rendered_loop_with_timeout_exits_nonzero() {
        let poll = PollParameter::new(
            PollProps::until(SLOT, "ready").with_timeout(Duration::from_secs(600)),
        )
        .unwrap();
        let script = poll.render_commands().join("\n");

        assert!(script.starts_with("WAIT_STARTED=$SECONDS"));
        assert!(script.contains("== \"ready\""));
        assert!(script.contains(">= 600"));
        assert!(script.contains("exit 1"));
    }

    #[test]
    fn props_deserialize_seconds() {
        let props: PollProps = serde_json::from_str(
            r#"{"parameter": "/a/EcrTag", "until_not": "none", "poll_period": 10}"#,
        )
        .unwrap();
        assert_eq!(props.poll_period, Some(Duration::from_secs(10)));
        assert!(props.timeout.is_none());
    }
}
