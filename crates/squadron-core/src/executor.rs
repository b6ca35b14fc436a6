//! Single work item execution.
//!
//! An assigned work item is moved to InProgress (persisted before the agent
//! is called), sent to its agent, and finalized as Completed or Failed with
//! exactly one appended [`AgentResponse`]. Remote failures are recorded in
//! that response rather than returned; see [`DegradedPolicy`] for how they
//! map to the final status. An item left InProgress by an interrupted run
//! is resumed rather than rejected.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use squadron_state::{
    AgentResponse, ResponseId, StorageError, Store, TaskId, TaskStatus, WorkItem,
};
use tracing::{info, instrument, warn};

use crate::config::DegradedPolicy;
use crate::error::ExecuteError;
use crate::invoker::{AgentInvoker, AgentReply, ExecuteRequest, InvokeError};
use crate::metrics::METRICS;
use crate::notifier::{TaskUpdate, UpdatePublisher, TASK_UPDATES_CHANNEL};
use crate::obs;

/// How the agent call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExecutionOutcome {
    /// Agent replied and reported success
    Ok,
    /// Agent could not be reached or its reply could not be read
    Degraded,
    /// Agent replied and reported failure
    Err,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Ok => "ok",
            ExecutionOutcome::Degraded => "degraded",
            ExecutionOutcome::Err => "err",
        }
    }
}

/// Result of [`TaskExecutor::execute_detailed`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub response: AgentResponse,
    pub outcome: ExecutionOutcome,
    pub status: TaskStatus,
}

/// Text recorded when the agent for `title` could not be reached.
pub fn degraded_content(title: &str, error: &str) -> String {
    format!(
        "⚠️ API Quota Exceeded (Task Execution): Could not complete task '{title}' due to API \
         limits. \n\nError details: {error}"
    )
}

pub struct TaskExecutor {
    store: Arc<dyn Store>,
    invoker: AgentInvoker,
    publisher: Option<Arc<dyn UpdatePublisher>>,
    policy: DegradedPolicy,
}

impl TaskExecutor {
    pub fn new(store: Arc<dyn Store>, invoker: AgentInvoker) -> Self {
        Self {
            store,
            invoker,
            publisher: None,
            policy: DegradedPolicy::default(),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn UpdatePublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn with_policy(mut self, policy: DegradedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Execute `task_id` and return the recorded response.
    pub async fn execute(&self, task_id: TaskId) -> Result<AgentResponse, ExecuteError> {
        Ok(self.execute_detailed(task_id).await?.response)
    }

    #[instrument(skip(self), fields(task_id = %task_id))]
    pub async fn execute_detailed(&self, task_id: TaskId) -> Result<ExecutionReport, ExecuteError> {
        // Preconditions; nothing is written until all hold.
        let mut task = self.store.get_task(&task_id).await.map_err(|e| match e {
            StorageError::NotFound { .. } => ExecuteError::TaskNotFound(task_id),
            other => ExecuteError::Storage(other),
        })?;
        let member_id = task.assigned_to.ok_or(ExecuteError::Unassigned(task_id))?;
        let member = self.store.get_member(&member_id).await.map_err(|e| match e {
            StorageError::NotFound { .. } => ExecuteError::MemberNotFound(member_id.to_string()),
            other => ExecuteError::Storage(other),
        })?;
        let project = self
            .store
            .get_project(&task.project_id)
            .await
            .map_err(|e| match e {
                StorageError::NotFound { .. } => ExecuteError::ProjectNotFound(task.project_id),
                other => ExecuteError::Storage(other),
            })?;
        // An InProgress item was left behind by an interrupted run and is
        // resumed as is.
        let resuming = task.status == TaskStatus::InProgress;
        if !resuming && !task.status.can_transition_to(TaskStatus::InProgress) {
            return Err(ExecuteError::InvalidState {
                task_id,
                status: task.status,
            });
        }

        if resuming {
            info!("resuming interrupted execution");
        } else {
            task.advance(TaskStatus::InProgress)?;
            self.store.update_task(&task).await?;
        }

        let endpoint = self.invoker.endpoints().for_member(&member).to_string();
        let request = ExecuteRequest {
            task_id: task.id.to_string(),
            title: task.title.clone(),
            description: task.description.clone(),
            project_name: project.name.clone(),
            project_description: project.description.clone(),
            priority: task.priority.to_string(),
            context: task.context.clone(),
            expected_output: task.expected_output.clone(),
        };

        info!(endpoint = %endpoint, member = %member.name, "executing task");
        let started = Instant::now();
        let result = self.invoker.call(&endpoint, &request).await;
        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        let (outcome, draft) = self.classify(&task, result);
        let response = AgentResponse {
            id: ResponseId::new(),
            task_id: task.id,
            team_member_id: member.id,
            content: draft.content,
            is_successful: draft.is_successful,
            error_message: draft.error_message,
            tokens_used: draft.tokens_used,
            processing_time_ms,
            created_at: Utc::now(),
        };

        self.store.append_response(response.clone()).await?;
        let final_status = if response.is_successful {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        task.advance(final_status)?;
        self.store.update_task(&task).await?;

        METRICS.record_execution(outcome);
        obs::emit_task_executed(&task.id, final_status, outcome.as_str(), processing_time_ms);
        self.publish(&task, &response).await;

        Ok(ExecutionReport {
            response,
            outcome,
            status: final_status,
        })
    }

    fn classify(
        &self,
        task: &WorkItem,
        result: Result<AgentReply, InvokeError>,
    ) -> (ExecutionOutcome, ResponseDraft) {
        match result {
            Ok(reply) => {
                let outcome = if reply.success {
                    ExecutionOutcome::Ok
                } else {
                    ExecutionOutcome::Err
                };
                (
                    outcome,
                    ResponseDraft {
                        content: reply.output.unwrap_or_default(),
                        is_successful: reply.success,
                        error_message: reply.error,
                        tokens_used: reply.tokens_used,
                    },
                )
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "agent call failed; recording degraded response");
                let detail = e.to_string();
                (
                    ExecutionOutcome::Degraded,
                    ResponseDraft {
                        content: degraded_content(&task.title, &detail),
                        is_successful: self.policy == DegradedPolicy::SurfaceAsCompleted,
                        error_message: Some(detail),
                        tokens_used: 0,
                    },
                )
            }
        }
    }

    async fn publish(&self, task: &WorkItem, response: &AgentResponse) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        let update = TaskUpdate {
            task_id: task.id,
            status: task.status,
            response_id: response.id,
            is_successful: response.is_successful,
            timestamp: Utc::now(),
        };
        if let Err(e) = publisher.publish(TASK_UPDATES_CHANNEL, &update).await {
            obs::emit_notify_failed(TASK_UPDATES_CHANNEL, &e);
        }
    }
}

struct ResponseDraft {
    content: String,
    is_successful: bool,
    error_message: Option<String>,
    tokens_used: u32,
}
