//! Progress events and task update sinks.
//!
//! Kickoff progress goes to a [`StepNotifier`]; work item results go to an
//! [`UpdatePublisher`]. Both are best-effort: the engine logs failures and
//! moves on, so delivery is at-most-once.
//!
//! [`StepHub`] is the in-process notifier. Observers subscribe either to one
//! project or to everything; whether project-scoped observers see foreign
//! projects depends on the hub's [`NotificationScope`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use squadron_state::{AgentRole, ProjectId, ResponseId, TaskId, TaskStatus};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::NotificationScope;

/// Step name used for "agent is working" events
pub const STEP_THINKING: &str = "Thinking";

/// Step name used for agent output events
pub const STEP_RESPONSE: &str = "Response";

/// Named channel for work item results
pub const TASK_UPDATES_CHANNEL: &str = "task-updates";

/// One transient kickoff progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub project_id: ProjectId,
    pub role: AgentRole,
    pub agent_name: String,
    pub step_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_thinking: bool,
    pub is_completed: bool,
}

impl WorkflowStep {
    fn build(project_id: ProjectId, role: AgentRole, content: impl Into<String>) -> Self {
        Self {
            project_id,
            role,
            agent_name: role.to_string(),
            step_name: STEP_RESPONSE.to_string(),
            content: content.into(),
            timestamp: Utc::now(),
            is_thinking: false,
            is_completed: false,
        }
    }

    pub fn thinking(project_id: ProjectId, role: AgentRole, content: impl Into<String>) -> Self {
        Self {
            step_name: STEP_THINKING.to_string(),
            is_thinking: true,
            ..Self::build(project_id, role, content)
        }
    }

    pub fn response(project_id: ProjectId, role: AgentRole, content: impl Into<String>) -> Self {
        Self::build(project_id, role, content)
    }

    /// The terminal event of a kickoff run.
    pub fn completed(project_id: ProjectId, role: AgentRole, content: impl Into<String>) -> Self {
        Self {
            is_completed: true,
            ..Self::build(project_id, role, content)
        }
    }
}

/// Observer group name for a project.
pub fn group_name(project_id: &ProjectId) -> String {
    format!("project-{}", project_id.0.hyphenated())
}

#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("notification sink closed")]
    Closed,

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Sink for kickoff progress events.
#[async_trait]
pub trait StepNotifier: Send + Sync {
    async fn notify(&self, step: WorkflowStep) -> Result<(), NotifyError>;
}

// ---------------------------------------------------------------------------
// StepHub
// ---------------------------------------------------------------------------

/// In-process fan-out of kickoff events over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct StepHub {
    tx: broadcast::Sender<WorkflowStep>,
    scope: NotificationScope,
}

impl StepHub {
    pub fn new(capacity: usize, scope: NotificationScope) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, scope }
    }

    pub fn scope(&self) -> NotificationScope {
        self.scope
    }

    /// Observe `project`'s group, or every project with `None`.
    pub fn subscribe(&self, project: Option<ProjectId>) -> StepSubscription {
        StepSubscription {
            rx: self.tx.subscribe(),
            project,
            scope: self.scope,
        }
    }
}

impl Default for StepHub {
    fn default() -> Self {
        Self::new(256, NotificationScope::default())
    }
}

#[async_trait]
impl StepNotifier for StepHub {
    async fn notify(&self, step: WorkflowStep) -> Result<(), NotifyError> {
        match self.scope {
            NotificationScope::Broadcast => debug!(
                group = %group_name(&step.project_id),
                step = %step.step_name,
                "broadcasting step to all observers"
            ),
            NotificationScope::ProjectGroup => debug!(
                group = %group_name(&step.project_id),
                step = %step.step_name,
                "sending step to project group"
            ),
        }
        if self.tx.send(step).is_err() {
            debug!("no step observers");
        }
        Ok(())
    }
}

/// Receiving half handed out by [`StepHub::subscribe`].
#[derive(Debug)]
pub struct StepSubscription {
    rx: broadcast::Receiver<WorkflowStep>,
    project: Option<ProjectId>,
    scope: NotificationScope,
}

impl StepSubscription {
    fn wants(&self, step: &WorkflowStep) -> bool {
        match (self.scope, self.project) {
            (NotificationScope::Broadcast, _) | (_, None) => true,
            (NotificationScope::ProjectGroup, Some(p)) => p == step.project_id,
        }
    }

    /// Next event this observer should see; `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<WorkflowStep> {
        loop {
            match self.rx.recv().await {
                Ok(step) if self.wants(&step) => return Some(step),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "step observer lagged; events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Task updates
// ---------------------------------------------------------------------------

/// Compact result of one work item execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub response_id: ResponseId,
    pub is_successful: bool,
    pub timestamp: DateTime<Utc>,
}

/// Named-channel publisher for [`TaskUpdate`]s.
#[async_trait]
pub trait UpdatePublisher: Send + Sync {
    async fn publish(&self, channel: &str, update: &TaskUpdate) -> Result<(), NotifyError>;
}

/// A serialized message on a named channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub channel: String,
    pub payload: String,
}

/// In-process pub/sub: messages are JSON strings tagged with their channel.
#[derive(Debug, Clone)]
pub struct UpdateChannel {
    tx: broadcast::Sender<ChannelMessage>,
}

impl UpdateChannel {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChannelMessage> {
        self.tx.subscribe()
    }
}

impl Default for UpdateChannel {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl UpdatePublisher for UpdateChannel {
    async fn publish(&self, channel: &str, update: &TaskUpdate) -> Result<(), NotifyError> {
        let payload =
            serde_json::to_string(update).map_err(|e| NotifyError::Delivery(e.to_string()))?;
        if self
            .tx
            .send(ChannelMessage {
                channel: channel.to_string(),
                payload,
            })
            .is_err()
        {
            debug!(channel, "no update subscribers");
        }
        Ok(())
    }
}
