//! Squadron Core: orchestration of role-specialised agents
//!
//! Two entry points:
//! - [`Orchestrator`] runs the fixed kickoff sequence for a project
//!   (briefing, requirements, architecture, design, implementation/QA loop,
//!   task derivation, deployment prep) and streams [`WorkflowStep`] events.
//! - [`TaskExecutor`] runs one assigned work item against its agent and
//!   records the outcome.
//!
//! Agents are remote HTTP services reached through [`AgentInvoker`]; every
//! kickoff call has a deterministic fallback so the sequence always finishes
//! unless storage fails or the run is cancelled.

pub mod config;
pub mod error;
pub mod executor;
pub mod extractor;
pub mod invoker;
pub mod kickoff;
pub mod metrics;
pub mod notifier;
pub mod obs;
pub mod telemetry;

pub use config::{AgentEndpoints, DegradedPolicy, NotificationScope, OrchestratorConfig};
pub use error::{ConfigError, ExecuteError, KickoffError};
pub use executor::{ExecutionOutcome, ExecutionReport, TaskExecutor};
pub use extractor::{extract_tasks, try_extract, ExtractedTaskSpec, ExtractionError};
pub use invoker::{
    fallback_output, AgentInvoker, AgentOutput, AgentReply, AgentTransport, ExecuteRequest,
    HttpTransport, InvokeError, ProjectContext,
};
pub use kickoff::{
    KickoffHandle, KickoffReport, KickoffStage, Orchestrator, QaGate, QaVerdict, ScriptedGate,
};
pub use notifier::{
    StepHub, StepNotifier, StepSubscription, TaskUpdate, UpdateChannel, UpdatePublisher,
    WorkflowStep, TASK_UPDATES_CHANNEL,
};
pub use telemetry::init_tracing;
