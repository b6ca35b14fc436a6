//! Kickoff state machine.
//!
//! A kickoff walks a fixed sequence of role stages for one project:
//!
//! ```text
//! Briefing -> RequirementsAnalysis -> ArchitectureDesign -> UxDesign
//!   -> ImplementationCycle(n) -> TaskDerivation -> DeploymentPrep -> Completed
//! ```
//!
//! Agent failures never stop the sequence: [`AgentInvoker::invoke`] always
//! yields text. Storage failures do stop it, as does cancellation, which is
//! checked between stages and raced against every agent call. Runs are
//! single-flight per project.

mod flight;
mod gate;
pub mod prompts;

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use squadron_state::{AgentRole, ProjectId, Store, TaskId};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, Instrument};

use crate::config::OrchestratorConfig;
use crate::error::{ConfigError, KickoffError};
use crate::extractor::extract_tasks;
use crate::invoker::{AgentInvoker, AgentOutput, ProjectContext};
use crate::metrics::METRICS;
use crate::notifier::{StepNotifier, WorkflowStep};
use crate::obs;

use flight::FlightRegistry;
pub use gate::{QaGate, QaVerdict, ScriptedGate};

/// Stages of a kickoff run, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KickoffStage {
    Briefing,
    RequirementsAnalysis,
    ArchitectureDesign,
    UxDesign,
    /// Zero-based implementation iteration
    ImplementationCycle(usize),
    TaskDerivation,
    DeploymentPrep,
    Completed,
}

impl KickoffStage {
    pub fn name(&self) -> &'static str {
        match self {
            KickoffStage::Briefing => "Briefing",
            KickoffStage::RequirementsAnalysis => "RequirementsAnalysis",
            KickoffStage::ArchitectureDesign => "ArchitectureDesign",
            KickoffStage::UxDesign => "UxDesign",
            KickoffStage::ImplementationCycle(_) => "ImplementationCycle",
            KickoffStage::TaskDerivation => "TaskDerivation",
            KickoffStage::DeploymentPrep => "DeploymentPrep",
            KickoffStage::Completed => "Completed",
        }
    }
}

/// Summary of a finished kickoff.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KickoffReport {
    pub project_id: ProjectId,
    /// Whether live requirements were written to the project
    pub requirements_updated: bool,
    pub derived_tasks: Vec<TaskId>,
    pub qa_iterations: usize,
    pub qa_passed: bool,
    /// Roles whose output was fallback text, in call order
    pub degraded_stages: Vec<AgentRole>,
}

impl KickoffReport {
    fn new(project_id: ProjectId) -> Self {
        Self {
            project_id,
            requirements_updated: false,
            derived_tasks: Vec::new(),
            qa_iterations: 0,
            qa_passed: false,
            degraded_stages: Vec::new(),
        }
    }
}

/// A kickoff running in the background.
#[derive(Debug)]
pub struct KickoffHandle {
    project_id: ProjectId,
    cancel: CancellationToken,
    join: JoinHandle<Result<KickoffReport, KickoffError>>,
}

impl KickoffHandle {
    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    /// Request cancellation; the run stops at its next checkpoint.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to end.
    pub async fn join(self) -> Result<KickoffReport, KickoffError> {
        self.join
            .await
            .map_err(|e| KickoffError::Aborted(e.to_string()))?
    }
}

/// Cancellation sources for one run.
struct RunContext {
    project_id: ProjectId,
    cancel: CancellationToken,
    shutdown: CancellationToken,
}

impl RunContext {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.shutdown.is_cancelled()
    }

    async fn cancelled(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.shutdown.cancelled() => {}
        }
    }

    fn checkpoint(&self, stage: KickoffStage) -> Result<(), KickoffError> {
        if self.is_cancelled() {
            return Err(KickoffError::Cancelled {
                stage: stage.name(),
            });
        }
        Ok(())
    }
}

/// Drives kickoff runs. Cheap to clone; clones share the single-flight
/// registry and shutdown token.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn Store>,
    invoker: AgentInvoker,
    notifier: Arc<dyn StepNotifier>,
    gate: Arc<dyn QaGate>,
    max_retries: usize,
    flights: FlightRegistry,
    shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        invoker: AgentInvoker,
        notifier: Arc<dyn StepNotifier>,
    ) -> Self {
        Self {
            store,
            invoker,
            notifier,
            gate: Arc::new(ScriptedGate),
            max_retries: crate::config::DEFAULT_MAX_RETRIES,
            flights: FlightRegistry::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Orchestrator over the HTTP transport with `config`'s endpoints,
    /// timeout and retry bound.
    pub fn from_config(
        store: Arc<dyn Store>,
        notifier: Arc<dyn StepNotifier>,
        config: &OrchestratorConfig,
    ) -> Result<Self, ConfigError> {
        let invoker = AgentInvoker::http(config.request_timeout, config.endpoints.clone())
            .map_err(|e| ConfigError::Transport(e.to_string()))?;
        Ok(Self::new(store, invoker, notifier).with_max_retries(config.max_retries))
    }

    pub fn with_gate(mut self, gate: impl QaGate + 'static) -> Self {
        self.gate = Arc::new(gate);
        self
    }

    /// Implementation iterations are bounded by `max_retries + 1`.
    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn is_running(&self, project_id: &ProjectId) -> bool {
        self.flights.is_running(project_id)
    }

    pub fn running(&self) -> Vec<ProjectId> {
        self.flights.running()
    }

    /// Cancel the in-flight kickoff for `project_id`, if any.
    pub fn cancel(&self, project_id: &ProjectId) -> bool {
        self.flights.cancel(project_id)
    }

    /// Cancel every run, current and future.
    pub fn shutdown(&self) {
        info!("orchestrator shutting down");
        self.shutdown.cancel();
    }

    /// Start a kickoff in the background and return once it is registered.
    ///
    /// Fails fast with `AlreadyRunning` or `ProjectNotFound`; everything
    /// else is reported through [`KickoffHandle::join`].
    pub async fn start_kickoff(&self, project_id: ProjectId) -> Result<KickoffHandle, KickoffError> {
        let cancel = self.shutdown.child_token();
        let guard = self
            .flights
            .acquire(project_id, cancel.clone())
            .ok_or(KickoffError::AlreadyRunning(project_id))?;

        self.store
            .get_project(&project_id)
            .await
            .map_err(|e| KickoffError::from_project_lookup(project_id, e))?;

        let this = self.clone();
        let run = RunContext {
            project_id,
            cancel: cancel.clone(),
            shutdown: self.shutdown.clone(),
        };
        let join = tokio::spawn(
            async move {
                let _guard = guard;
                this.drive(&run).await
            }
            .instrument(obs::kickoff_span(&project_id)),
        );

        Ok(KickoffHandle {
            project_id,
            cancel,
            join,
        })
    }

    /// Run a kickoff to completion on the current task.
    ///
    /// `cancel` stops the run at its next checkpoint, as does
    /// [`Orchestrator::cancel`] or [`Orchestrator::shutdown`].
    pub async fn run_kickoff(
        &self,
        project_id: ProjectId,
        cancel: CancellationToken,
    ) -> Result<KickoffReport, KickoffError> {
        let _guard = self
            .flights
            .acquire(project_id, cancel.clone())
            .ok_or(KickoffError::AlreadyRunning(project_id))?;

        let run = RunContext {
            project_id,
            cancel,
            shutdown: self.shutdown.clone(),
        };
        self.drive(&run)
            .instrument(obs::kickoff_span(&project_id))
            .await
    }

    async fn drive(&self, run: &RunContext) -> Result<KickoffReport, KickoffError> {
        let started = Instant::now();
        let result = self.stages(run).await;

        let elapsed = started.elapsed().as_millis() as u64;
        match &result {
            Ok(report) => {
                METRICS.inc_kickoffs_completed();
                obs::emit_kickoff_finished(
                    &run.project_id,
                    elapsed,
                    report.qa_iterations,
                    report.qa_passed,
                    "completed",
                );
            }
            Err(e) => {
                let outcome = match e {
                    KickoffError::Cancelled { .. } => "cancelled",
                    _ => "failed",
                };
                info!(project_id = %run.project_id, error = %e, "kickoff ended early");
                obs::emit_kickoff_finished(&run.project_id, elapsed, 0, false, outcome);
            }
        }
        METRICS.flush();
        result
    }

    #[instrument(skip(self, run), fields(project_id = %run.project_id))]
    async fn stages(&self, run: &RunContext) -> Result<KickoffReport, KickoffError> {
        let project_id = run.project_id;
        let project = self
            .store
            .get_project(&project_id)
            .await
            .map_err(|e| KickoffError::from_project_lookup(project_id, e))?;
        let ctx = ProjectContext::from(&project);
        let mut report = KickoffReport::new(project_id);

        METRICS.inc_kickoffs_started();
        obs::emit_kickoff_started(&project_id, &project.name);

        // Briefing
        self.consult(
            run,
            KickoffStage::Briefing,
            AgentRole::ProjectManager,
            prompts::BRIEFING_THINKING,
            &prompts::briefing(&project.name),
            &ctx,
            &mut report,
        )
        .await?;

        // Requirements
        let stories = self
            .consult(
                run,
                KickoffStage::RequirementsAnalysis,
                AgentRole::ProductOwner,
                prompts::REQUIREMENTS_THINKING,
                &prompts::requirements(&project.description),
                &ctx,
                &mut report,
            )
            .await?;
        if !stories.degraded {
            self.store
                .update_requirements(&project_id, &stories.text)
                .await?;
            report.requirements_updated = true;
        }

        // Architecture; kept for task derivation
        let architecture = self
            .consult(
                run,
                KickoffStage::ArchitectureDesign,
                AgentRole::TechLead,
                prompts::ARCHITECTURE_THINKING,
                &prompts::architecture(&stories.text),
                &ctx,
                &mut report,
            )
            .await?;

        let design = self
            .consult(
                run,
                KickoffStage::UxDesign,
                AgentRole::Designer,
                prompts::DESIGN_THINKING,
                &prompts::design(&stories.text),
                &ctx,
                &mut report,
            )
            .await?;

        // Implementation / QA loop
        let mut retries = 0;
        let mut iteration = 0;
        while !report.qa_passed && retries <= self.max_retries {
            let stage = KickoffStage::ImplementationCycle(iteration);
            let (thinking, instruction) = if iteration == 0 {
                (
                    prompts::IMPLEMENT_THINKING,
                    prompts::implement(&design.text, &architecture.text),
                )
            } else {
                (prompts::FIX_THINKING, prompts::FIX_ISSUES.to_string())
            };

            let dev = self
                .consult(
                    run,
                    stage,
                    AgentRole::Developer,
                    thinking,
                    &instruction,
                    &ctx,
                    &mut report,
                )
                .await?;
            let qa = self
                .consult(
                    run,
                    stage,
                    AgentRole::QA,
                    prompts::TEST_THINKING,
                    &prompts::test(&dev.text),
                    &ctx,
                    &mut report,
                )
                .await?;

            match self.gate.decide(iteration, &qa.text) {
                QaVerdict::Fail => {
                    METRICS.inc_qa_rejections();
                    self.notify(WorkflowStep::response(
                        project_id,
                        AgentRole::QA,
                        prompts::QA_REJECTED,
                    ))
                    .await;
                    retries += 1;
                }
                QaVerdict::Pass => {
                    self.notify(WorkflowStep::response(
                        project_id,
                        AgentRole::QA,
                        prompts::QA_APPROVED,
                    ))
                    .await;
                    report.qa_passed = true;
                }
            }
            iteration += 1;
            report.qa_iterations = iteration;
        }

        // Task derivation, once, whatever the QA verdict
        run.checkpoint(KickoffStage::TaskDerivation)?;
        obs::emit_kickoff_stage(&project_id, KickoffStage::TaskDerivation.name());
        let items: Vec<_> = extract_tasks(&architecture.text)
            .into_iter()
            .map(|spec| spec.into_work_item(project_id))
            .collect();
        let ids: Vec<TaskId> = items.iter().map(|t| t.id).collect();
        self.store.create_tasks(items).await?;
        METRICS.add_tasks_derived(ids.len());
        obs::emit_tasks_derived(&project_id, ids.len());
        report.derived_tasks = ids;

        self.consult(
            run,
            KickoffStage::DeploymentPrep,
            AgentRole::DevOps,
            prompts::DEPLOY_THINKING,
            prompts::DEPLOYMENT,
            &ctx,
            &mut report,
        )
        .await?;

        run.checkpoint(KickoffStage::Completed)?;
        obs::emit_kickoff_stage(&project_id, KickoffStage::Completed.name());
        self.notify(WorkflowStep::completed(
            project_id,
            AgentRole::ProjectManager,
            prompts::KICKOFF_COMPLETED,
        ))
        .await;

        Ok(report)
    }

    /// One role turn: checkpoint, thinking event, agent call raced against
    /// cancellation, response event.
    #[allow(clippy::too_many_arguments)]
    async fn consult(
        &self,
        run: &RunContext,
        stage: KickoffStage,
        role: AgentRole,
        thinking: &str,
        instruction: &str,
        ctx: &ProjectContext,
        report: &mut KickoffReport,
    ) -> Result<AgentOutput, KickoffError> {
        run.checkpoint(stage)?;
        obs::emit_kickoff_stage(&run.project_id, stage.name());
        self.notify(WorkflowStep::thinking(run.project_id, role, thinking))
            .await;

        let output = tokio::select! {
            biased;
            _ = run.cancelled() => {
                return Err(KickoffError::Cancelled { stage: stage.name() });
            }
            out = self.invoker.invoke(role, instruction, ctx) => out,
        };

        if output.degraded {
            report.degraded_stages.push(role);
        }
        self.notify(WorkflowStep::response(run.project_id, role, output.text.as_str()))
            .await;
        Ok(output)
    }

    /// Best-effort delivery; failures are logged and dropped.
    async fn notify(&self, step: WorkflowStep) {
        let preview: String = step.content.chars().take(50).collect();
        debug!(role = %step.role, content = %preview, "sending step");
        if let Err(e) = self.notifier.notify(step).await {
            obs::emit_notify_failed("workflow-step", &e);
        }
    }
}
