//! Process-wide counters for kickoffs and task executions.
//!
//! Call sites bump counters through [`METRICS`]; [`Metrics::flush`] logs a
//! [`MetricsSnapshot`] once a kickoff ends.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::executor::ExecutionOutcome;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    kickoffs_started: AtomicU64,
    kickoffs_completed: AtomicU64,
    agent_fallbacks: AtomicU64,
    qa_rejections: AtomicU64,
    tasks_derived: AtomicU64,
    executions_ok: AtomicU64,
    executions_degraded: AtomicU64,
    executions_err: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub kickoffs_started: u64,
    pub kickoffs_completed: u64,
    pub agent_fallbacks: u64,
    pub qa_rejections: u64,
    pub tasks_derived: u64,
    pub executions_ok: u64,
    pub executions_degraded: u64,
    pub executions_err: u64,
}

impl MetricsSnapshot {
    /// Executions of any outcome.
    pub fn tasks_executed(&self) -> u64 {
        self.executions_ok + self.executions_degraded + self.executions_err
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(counter: &AtomicU64, by: u64, name: &'static str) {
    counter.fetch_add(by, Ordering::Relaxed);
    tracing::trace!(metric = name, by, "counter incremented");
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            kickoffs_started: AtomicU64::new(0),
            kickoffs_completed: AtomicU64::new(0),
            agent_fallbacks: AtomicU64::new(0),
            qa_rejections: AtomicU64::new(0),
            tasks_derived: AtomicU64::new(0),
            executions_ok: AtomicU64::new(0),
            executions_degraded: AtomicU64::new(0),
            executions_err: AtomicU64::new(0),
        }
    }

    pub fn inc_kickoffs_started(&self) {
        bump(&self.kickoffs_started, 1, "kickoffs_started");
    }

    pub fn inc_kickoffs_completed(&self) {
        bump(&self.kickoffs_completed, 1, "kickoffs_completed");
    }

    /// One agent call replaced by its fallback text.
    pub fn inc_agent_fallbacks(&self) {
        bump(&self.agent_fallbacks, 1, "agent_fallbacks");
    }

    pub fn inc_qa_rejections(&self) {
        bump(&self.qa_rejections, 1, "qa_rejections");
    }

    pub fn add_tasks_derived(&self, count: usize) {
        bump(&self.tasks_derived, count as u64, "tasks_derived");
    }

    /// One finished work item execution, bucketed by how the agent call ended.
    pub fn record_execution(&self, outcome: ExecutionOutcome) {
        match outcome {
            ExecutionOutcome::Ok => bump(&self.executions_ok, 1, "executions_ok"),
            ExecutionOutcome::Degraded => {
                bump(&self.executions_degraded, 1, "executions_degraded")
            }
            ExecutionOutcome::Err => bump(&self.executions_err, 1, "executions_err"),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            kickoffs_started: load(&self.kickoffs_started),
            kickoffs_completed: load(&self.kickoffs_completed),
            agent_fallbacks: load(&self.agent_fallbacks),
            qa_rejections: load(&self.qa_rejections),
            tasks_derived: load(&self.tasks_derived),
            executions_ok: load(&self.executions_ok),
            executions_degraded: load(&self.executions_degraded),
            executions_err: load(&self.executions_err),
        }
    }

    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            kickoffs_started = s.kickoffs_started,
            kickoffs_completed = s.kickoffs_completed,
            agent_fallbacks = s.agent_fallbacks,
            qa_rejections = s.qa_rejections,
            tasks_derived = s.tasks_derived,
            executions_ok = s.executions_ok,
            executions_degraded = s.executions_degraded,
            executions_err = s.executions_err,
        );
    }
}
