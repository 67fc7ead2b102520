//! Structured observability hooks for the promotion handshake.
//!
//! This module provides:
//! - Slot-scoped tracing spans via [`slot_span`]
//! - Emission functions for key lifecycle events: publish, poll attempts,
//!   wait completion, promotion steps
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`).
//! For JSON output, pass `--json` to the CLI.

use tracing::info;

/// Span tagged with the slot name, for instrumenting futures.
///
/// ```ignore
/// store.get(&slot).instrument(slot_span(slot.as_str())).await
/// ```
pub fn slot_span(slot: &str) -> tracing::Span {
    tracing::info_span!("tagrelay.slot", slot = %slot)
}

/// Emit event: a tag was written to a slot.
pub fn emit_slot_published(slot: &str, value: &str, version: u64) {
    info!(event = "slot.published", slot = %slot, value = %value, version = version);
}

/// Emit event: one poll of a slot did not satisfy the wait condition.
pub fn emit_poll_attempt(slot: &str, attempt: u64, value: Option<&str>) {
    info!(
        event = "poll.attempt",
        slot = %slot,
        attempt = attempt,
        value = value.unwrap_or("<unset>"),
    );
}

/// Emit event: the wait condition was satisfied.
pub fn emit_poll_satisfied(slot: &str, value: &str, attempts: u64, waited_ms: u64) {
    info!(
        event = "poll.satisfied",
        slot = %slot,
        value = %value,
        attempts = attempts,
        waited_ms = waited_ms,
    );
}

/// Emit event: a downstream pipeline was started.
pub fn emit_pipeline_triggered(pipeline: &str, execution_id: &str) {
    info!(event = "pipeline.triggered", pipeline = %pipeline, execution_id = %execution_id);
}

/// Emit event: a promotion step finished.
pub fn emit_promotion_step(step: &str, action: &str, success: bool) {
    info!(event = "promotion.step", step = %step, action = %action, success = success);
}

/// Emit event: a store read failed while polling (warning level).
pub fn emit_poll_error(slot: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "poll.error", slot = %slot, error = %error);
}
