//! Structured observability hooks for kickoff and execution lifecycle events.
//!
//! Every function emits one event with a stable `event=` field so log
//! pipelines can key on it. JSON output is selected at
//! [`crate::telemetry::init_tracing`].

use squadron_state::{ProjectId, TaskId, TaskStatus};
use tracing::{info, warn};

/// Span carrying `project_id` for everything a kickoff run logs.
///
/// Attach with `tracing::Instrument` so it follows the run across awaits.
pub fn kickoff_span(project_id: &ProjectId) -> tracing::Span {
    tracing::info_span!("squadron.kickoff", project_id = %project_id)
}

pub fn emit_kickoff_started(project_id: &ProjectId, project_name: &str) {
    info!(event = "kickoff.started", project_id = %project_id, project = %project_name);
}

/// A stage of the kickoff state machine was entered.
pub fn emit_kickoff_stage(project_id: &ProjectId, stage: &str) {
    info!(event = "kickoff.stage", project_id = %project_id, stage = %stage);
}

pub fn emit_kickoff_finished(
    project_id: &ProjectId,
    duration_ms: u64,
    qa_iterations: usize,
    qa_passed: bool,
    outcome: &str,
) {
    info!(
        event = "kickoff.finished",
        project_id = %project_id,
        duration_ms = duration_ms,
        qa_iterations = qa_iterations,
        qa_passed = qa_passed,
        outcome = %outcome,
    );
}

/// An agent call fell back to degraded output (warning level).
pub fn emit_agent_degraded(role: &str, error: &dyn std::fmt::Display) {
    warn!(event = "agent.degraded", role = %role, error = %error);
}

pub fn emit_tasks_derived(project_id: &ProjectId, count: usize) {
    info!(event = "tasks.derived", project_id = %project_id, count = count);
}

pub fn emit_task_executed(task_id: &TaskId, status: TaskStatus, outcome: &str, duration_ms: f64) {
    info!(
        event = "task.executed",
        task_id = %task_id,
        status = %status,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

/// A progress event or task update could not be delivered (warning level).
pub fn emit_notify_failed(target: &str, error: &dyn std::fmt::Display) {
    warn!(event = "notify.failed", target = %target, error = %error);
}
