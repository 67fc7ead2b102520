//! Structured tracing events for the promotion handshake.

use std::sync::Arc;
use std::time::Duration;

use slot_state::fakes::MemoryParameterStore;
use slot_state::ParameterStore;
use tagrelay_core::obs::{
    emit_pipeline_triggered, emit_poll_attempt, emit_poll_error, emit_poll_satisfied,
    emit_promotion_step, emit_slot_published, slot_span,
};
use tagrelay_core::{
    ImageTag, PollParameter, PollProps, RecordingTrigger, SlotName, TagPublisher, WriteMetadata,
    DRY_RUN_TAG,
};
use tracing_test::traced_test;

const SLOT: &str = "/CdkPipeline/dev/SubPipes/ApiHandlerPipeline/EcrTag";

#[traced_test]
#[test]
fn slot_published_event_carries_value() {
    emit_slot_published(SLOT, "3f9a2c1", 2);
    assert!(logs_contain("slot.published"));
    assert!(logs_contain("3f9a2c1"));
}

#[traced_test]
#[test]
fn poll_attempt_marks_unset_slot() {
    emit_poll_attempt(SLOT, 1, None);
    assert!(logs_contain("poll.attempt"));
    assert!(logs_contain("<unset>"));
}

#[traced_test]
#[test]
fn poll_error_is_a_warning() {
    emit_poll_error(SLOT, &"throttled");
    assert!(logs_contain("WARN"));
    assert!(logs_contain("throttled"));
}

#[traced_test]
#[test]
fn remaining_events_emit() {
    emit_poll_satisfied(SLOT, "3f9a2c1", 3, 60_000);
    emit_pipeline_triggered("dev-frontend", "exec-1");
    emit_promotion_step("prod/SubPipes", "PromoteToProd", false);
    assert!(logs_contain("poll.satisfied"));
    assert!(logs_contain("pipeline.triggered"));
    assert!(logs_contain("promotion.step"));
}

#[traced_test]
#[test]
fn slot_span_carries_slot_name() {
    let span = slot_span(SLOT);
    let _guard = span.enter();
    tracing::info!("inside slot span");
    assert!(logs_contain(SLOT));
}

#[traced_test]
#[tokio::test]
async fn publish_emits_published_and_triggered() {
    let store = Arc::new(MemoryParameterStore::new());
    let publisher = TagPublisher::new(store, Arc::new(RecordingTrigger::new()));
    let slot = SlotName::parse(SLOT).unwrap();

    publisher
        .publish(
            &slot,
            &ImageTag::from_source_version(Some("3f9a2c1e77")),
            WriteMetadata::by("ci"),
            &["dev-frontend".to_string()],
        )
        .await
        .unwrap();

    assert!(logs_contain("slot.published"));
    assert!(logs_contain("pipeline.triggered"));
}

#[traced_test]
#[tokio::test(start_paused = true)]
async fn wait_emits_attempts_then_satisfied() {
    let store = Arc::new(MemoryParameterStore::new());
    let slot = SlotName::parse(SLOT).unwrap();
    tagrelay_core::ensure_slot(store.as_ref(), &slot).await.unwrap();

    let writer = {
        let store = store.clone();
        let slot = slot.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            store
                .put(&slot, "abc1234", WriteMetadata::by("ci"), true)
                .await
                .unwrap();
        })
    };

    let poll = PollParameter::new(
        PollProps::until_not(SLOT, DRY_RUN_TAG).with_poll_period(Duration::from_secs(2)),
    )
    .unwrap();
    poll.wait(store.as_ref()).await.unwrap();
    writer.await.unwrap();

    assert!(logs_contain("poll.attempt"));
    assert!(logs_contain("poll.satisfied"));
}
