//! Structured observability hooks for release lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Emission functions for pipeline, upload, gate and merge events
//!
//! Every event carries an `event` field so log pipelines can filter on it.

use tracing::{info, warn};

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// ```ignore
/// let _span = RunSpan::enter("run-12345", "macos", "v2.3.1");
/// // later events carry run_id, family and tag
/// ```
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    pub fn enter(run_id: &str, family: &str, tag: &str) -> Self {
        Self {
            _span: run_span(run_id, family, tag).entered(),
        }
    }
}

/// The run-scoped span itself, for instrumenting futures.
///
/// An entered span must not be held across `.await`; async code attaches
/// this span with `tracing::Instrument` instead of using [`RunSpan`].
pub fn run_span(run_id: &str, family: &str, tag: &str) -> tracing::Span {
    tracing::info_span!("relay.run", run_id = %run_id, family = %family, tag = %tag)
}

pub fn emit_run_started(run_id: &str, family: &str, tag: &str, targets: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        family = %family,
        tag = %tag,
        targets = targets,
    );
}

pub fn emit_run_transition(run_id: &str, from: &str, to: &str) {
    info!(event = "run.transition", run_id = %run_id, from = %from, to = %to);
}

/// Emit event: run finished with its conclusion and duration.
pub fn emit_run_finished(run_id: &str, conclusion: &str, duration_ms: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        conclusion = %conclusion,
        duration_ms = duration_ms,
    );
}

pub fn emit_target_built(run_id: &str, triple: &str, bytes: usize, success: bool) {
    info!(
        event = "target.built",
        run_id = %run_id,
        triple = %triple,
        bytes = bytes,
        success = success,
    );
}

pub fn emit_artifact_uploaded(tag: &str, name: &str, digest: &str, replaced: bool) {
    info!(
        event = "artifact.uploaded",
        tag = %tag,
        name = %name,
        digest = %digest,
        replaced = replaced,
    );
}

/// Emit event: a family conclusion was recorded for a cycle.
pub fn emit_gate_recorded(cycle: &str, family: &str, conclusion: &str, outcome: &str) {
    info!(
        event = "gate.recorded",
        cycle = %cycle,
        family = %family,
        conclusion = %conclusion,
        outcome = %outcome,
    );
}

pub fn emit_gate_fired(cycle: &str, trigger: &str, repository: &str) {
    info!(
        event = "gate.fired",
        cycle = %cycle,
        trigger = %trigger,
        repository = %repository,
    );
}

/// Emit event: the dispatch call failed after the cycle was claimed (warning level).
pub fn emit_gate_dispatch_failed(cycle: &str, error: &dyn std::fmt::Display) {
    warn!(event = "gate.dispatch_failed", cycle = %cycle, error = %error);
}

pub fn emit_merge_evaluated(change_request: u64, approve: bool, violations: usize) {
    info!(
        event = "merge.evaluated",
        change_request = change_request,
        approve = approve,
        violations = violations,
    );
}
