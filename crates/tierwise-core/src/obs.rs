//! Structured observability hooks for pipeline lifecycle events.
//!
//! This module provides:
//! - Request-scoped tracing spans via [`request_span`]
//! - Emission functions for tier, delegation and chain events
//!
//! Every event carries a stable `event` field so log pipelines can filter
//! on it. Use [`crate::telemetry::init_tracing`] to pick text or JSON output.

use std::fmt::Display;

use tracing::{info, warn};

/// Span that tags every event of one request with its id.
///
/// Attach it with [`tracing::Instrument`] so the span follows the request
/// future across await points.
///
/// # Example
///
/// ```ignore
/// controller.drive(request).instrument(request_span("escalation", &id)).await
/// ```
pub fn request_span(pipeline: &str, request_id: &str) -> tracing::Span {
    tracing::info_span!("tierwise.request", pipeline = %pipeline, request_id = %request_id)
}

pub fn emit_invocation_timed_out(capability: &str, timeout_ms: u64) {
    warn!(event = "invocation.timed_out", capability = %capability, timeout_ms = timeout_ms);
}

pub fn emit_invocation_failed(capability: &str, error: &dyn Display) {
    warn!(event = "invocation.failed", capability = %capability, error = %error);
}

pub fn emit_tier_started(tier: usize, capability: &str) {
    info!(event = "tier.started", tier = tier, capability = %capability);
}

pub fn emit_tier_succeeded(tier: usize, capability: &str) {
    info!(event = "tier.succeeded", tier = tier, capability = %capability);
}

pub fn emit_tier_failed(tier: usize, capability: &str, failure: &dyn Display) {
    warn!(event = "tier.failed", tier = tier, capability = %capability, failure = %failure);
}

pub fn emit_escalated(from_tier: usize, to_tier: usize) {
    info!(event = "tier.escalated", from_tier = from_tier, to_tier = to_tier);
}

/// Emitted once when every tier has failed (warning level).
pub fn emit_exhausted(tiers_tried: usize) {
    warn!(event = "escalation.exhausted", tiers_tried = tiers_tried);
}

pub fn emit_report_generated(capability: &str, chars: usize) {
    info!(event = "report.generated", capability = %capability, chars = chars);
}

pub fn emit_subtask_dispatched(subtask_id: u64, worker: &str) {
    info!(event = "subtask.dispatched", subtask_id = subtask_id, worker = %worker);
}

pub fn emit_subtask_finished(subtask_id: u64, status: &str, duration_ms: u64) {
    info!(
        event = "subtask.finished",
        subtask_id = subtask_id,
        status = %status,
        duration_ms = duration_ms,
    );
}

pub fn emit_delegation_finished(subtasks: usize, items: usize, success: bool) {
    info!(
        event = "delegation.finished",
        subtasks = subtasks,
        items = items,
        success = success,
    );
}

pub fn emit_coverage_shortfall(detail: &dyn Display) {
    warn!(event = "delegation.coverage_shortfall", detail = %detail);
}

pub fn emit_chain_gate_closed(step: &str, failed: &[String]) {
    warn!(event = "chain.gate_closed", step = %step, failed = ?failed);
}
