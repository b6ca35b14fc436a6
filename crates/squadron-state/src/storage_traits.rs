//! Storage trait definitions for Squadron
//!
//! These traits define the persistence collaborator of the orchestrator:
//! - `ProjectStore`: projects (read, requirements updated by kickoff)
//! - `TeamStore`: team members, i.e. the agents work items are assigned to
//! - `TaskStore`: work items (created manually or derived, status updated)
//! - `ResponseLog`: agent responses (append-only)
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! via the `fakes` module.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random id
            pub fn new() -> Self {
                $name(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                Uuid::parse_str(s).map($name)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier of a project
    ProjectId
);
uuid_id!(
    /// Unique identifier of a work item
    TaskId
);
uuid_id!(
    /// Unique identifier of a team member (agent)
    MemberId
);
uuid_id!(
    /// Unique identifier of a recorded agent response
    ResponseId
);

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

/// Error returned when parsing one of the record enums from text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// The seven agent roles, in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentRole {
    ProductOwner,
    ProjectManager,
    Designer,
    TechLead,
    Developer,
    QA,
    DevOps,
}

impl AgentRole {
    pub const ALL: [AgentRole; 7] = [
        AgentRole::ProductOwner,
        AgentRole::ProjectManager,
        AgentRole::Designer,
        AgentRole::TechLead,
        AgentRole::Developer,
        AgentRole::QA,
        AgentRole::DevOps,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::ProductOwner => "ProductOwner",
            AgentRole::ProjectManager => "ProjectManager",
            AgentRole::Designer => "Designer",
            AgentRole::TechLead => "TechLead",
            AgentRole::Developer => "Developer",
            AgentRole::QA => "QA",
            AgentRole::DevOps => "DevOps",
        }
    }

    /// Upper snake case form used in environment variable names.
    pub fn env_key(&self) -> &'static str {
        match self {
            AgentRole::ProductOwner => "PRODUCT_OWNER",
            AgentRole::ProjectManager => "PROJECT_MANAGER",
            AgentRole::Designer => "DESIGNER",
            AgentRole::TechLead => "TECH_LEAD",
            AgentRole::Developer => "DEVELOPER",
            AgentRole::QA => "QA",
            AgentRole::DevOps => "DEVOPS",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        AgentRole::ALL
            .into_iter()
            .find(|r| r.as_str().to_ascii_lowercase() == normalized)
            .ok_or_else(|| ParseEnumError {
                kind: "agent role",
                value: s.to_string(),
            })
    }
}

/// Project lifecycle status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectStatus {
    #[default]
    Planning,
    InProgress,
    Testing,
    Completed,
    OnHold,
    Cancelled,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Planning => "Planning",
            ProjectStatus::InProgress => "InProgress",
            ProjectStatus::Testing => "Testing",
            ProjectStatus::Completed => "Completed",
            ProjectStatus::OnHold => "OnHold",
            ProjectStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Planning" => Ok(ProjectStatus::Planning),
            "InProgress" => Ok(ProjectStatus::InProgress),
            "Testing" => Ok(ProjectStatus::Testing),
            "Completed" => Ok(ProjectStatus::Completed),
            "OnHold" => Ok(ProjectStatus::OnHold),
            "Cancelled" => Ok(ProjectStatus::Cancelled),
            other => Err(ParseEnumError {
                kind: "project status",
                value: other.to_string(),
            }),
        }
    }
}

/// Work item priority. Rendered on the agent wire as the variant name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "Low",
            TaskPriority::Medium => "Medium",
            TaskPriority::High => "High",
            TaskPriority::Critical => "Critical",
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "medium" => Ok(TaskPriority::Medium),
            "high" => Ok(TaskPriority::High),
            "critical" => Ok(TaskPriority::Critical),
            _ => Err(ParseEnumError {
                kind: "task priority",
                value: s.to_string(),
            }),
        }
    }
}

/// Work item status.
///
/// Status only moves forward: Pending → Assigned → InProgress →
/// {UnderReview →} Completed | Failed. Completed and Failed are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Pending,
    Assigned,
    InProgress,
    UnderReview,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "Pending",
            TaskStatus::Assigned => "Assigned",
            TaskStatus::InProgress => "InProgress",
            TaskStatus::UnderReview => "UnderReview",
            TaskStatus::Completed => "Completed",
            TaskStatus::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a forward step.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Assigned)
                | (Pending, InProgress)
                | (Assigned, InProgress)
                | (InProgress, UnderReview)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (UnderReview, Completed)
                | (UnderReview, Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(TaskStatus::Pending),
            "Assigned" => Ok(TaskStatus::Assigned),
            "InProgress" => Ok(TaskStatus::InProgress),
            "UnderReview" => Ok(TaskStatus::UnderReview),
            "Completed" => Ok(TaskStatus::Completed),
            "Failed" => Ok(TaskStatus::Failed),
            other => Err(ParseEnumError {
                kind: "task status",
                value: other.to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// A software project the team collaborates on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    pub description: String,
    pub status: ProjectStatus,
    /// Written by the kickoff requirements stage
    pub requirements: Option<String>,
    pub technical_stack: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Project {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            description: description.into(),
            status: ProjectStatus::default(),
            requirements: None,
            technical_stack: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

/// A role-specialised agent that work items can be assigned to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: MemberId,
    pub name: String,
    pub role: AgentRole,
    pub description: String,
    pub is_active: bool,
    /// Overrides the role's default endpoint when set
    pub agent_endpoint: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl TeamMember {
    pub fn new(name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: MemberId::new(),
            name: name.into(),
            role,
            description: String::new(),
            is_active: true,
            agent_endpoint: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.agent_endpoint = Some(endpoint.into());
        self
    }
}

/// A unit of project work, optionally assigned to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub assigned_to: Option<MemberId>,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub context: Option<String>,
    pub expected_output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    /// A new Pending work item with Medium priority.
    pub fn new(
        project_id: ProjectId,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            project_id,
            assigned_to: None,
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::default(),
            context: None,
            expected_output: None,
            created_at: Utc::now(),
            updated_at: None,
            completed_at: None,
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Assign to a team member, moving a Pending item to Assigned.
    pub fn assigned_to(mut self, member: MemberId) -> Self {
        self.assigned_to = Some(member);
        if self.status == TaskStatus::Pending {
            self.status = TaskStatus::Assigned;
        }
        self
    }

    /// Move the item to `next`, stamping `updated_at`.
    ///
    /// `completed_at` is set only when `next` is Completed.
    pub fn advance(&mut self, next: TaskStatus) -> StorageResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(StorageError::InvalidTransition {
                task_id: self.id.to_string(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = Some(now);
        if next == TaskStatus::Completed {
            self.completed_at = Some(now);
        }
        Ok(())
    }
}

/// One recorded execution attempt of a work item. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub id: ResponseId,
    pub task_id: TaskId,
    pub team_member_id: MemberId,
    pub content: String,
    pub is_successful: bool,
    pub error_message: Option<String>,
    pub tokens_used: u32,
    pub processing_time_ms: f64,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Project persistence.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Insert a new project. Fails with `Duplicate` if the id exists.
    async fn create_project(&self, project: Project) -> StorageResult<()>;

    /// Retrieve a project. Returns `NotFound` if absent.
    async fn get_project(&self, id: &ProjectId) -> StorageResult<Project>;

    /// Overwrite the requirements field.
    async fn update_requirements(&self, id: &ProjectId, requirements: &str) -> StorageResult<()>;

    /// All projects, oldest first.
    async fn list_projects(&self) -> StorageResult<Vec<Project>>;
}

/// Team member persistence.
#[async_trait]
pub trait TeamStore: Send + Sync {
    async fn create_member(&self, member: TeamMember) -> StorageResult<()>;

    async fn get_member(&self, id: &MemberId) -> StorageResult<TeamMember>;

    async fn list_members(&self) -> StorageResult<Vec<TeamMember>>;
}

/// Work item persistence.
///
/// Guarantees:
/// - `update_task` never moves a stored item's status backward.
/// - `create_tasks` stores either every item or none of them.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: WorkItem) -> StorageResult<()>;

    async fn create_tasks(&self, tasks: Vec<WorkItem>) -> StorageResult<()>;

    async fn get_task(&self, id: &TaskId) -> StorageResult<WorkItem>;

    /// Replace a stored work item. Returns `InvalidTransition` if the status
    /// change is not a forward step.
    async fn update_task(&self, task: &WorkItem) -> StorageResult<()>;

    /// Work items, optionally filtered by project, oldest first.
    async fn list_tasks(&self, project: Option<&ProjectId>) -> StorageResult<Vec<WorkItem>>;
}

/// Append-only agent response log.
#[async_trait]
pub trait ResponseLog: Send + Sync {
    /// Append a response. Fails with `Duplicate` if the id was already written.
    async fn append_response(&self, response: AgentResponse) -> StorageResult<()>;

    /// Responses recorded for a work item, oldest first.
    async fn list_responses(&self, task: &TaskId) -> StorageResult<Vec<AgentResponse>>;
}

/// Everything the orchestrator needs from persistence.
pub trait Store: ProjectStore + TeamStore + TaskStore + ResponseLog {}

impl<T: ProjectStore + TeamStore + TaskStore + ResponseLog + ?Sized> Store for T {}

/// Shared check for `update_task` implementations.
pub(crate) fn check_transition(stored: &WorkItem, next: &WorkItem) -> StorageResult<()> {
    if stored.status == next.status || stored.status.can_transition_to(next.status) {
        Ok(())
    } else {
        Err(StorageError::InvalidTransition {
            task_id: stored.id.to_string(),
            from: stored.status.to_string(),
            to: next.status.to_string(),
        })
    }
}
