//! Error types for the orchestration engine

use squadron_state::{ProjectId, StorageError, TaskId, TaskStatus};
use thiserror::Error;

/// Why a kickoff run could not start or did not reach `Completed`.
#[derive(Debug, Error)]
pub enum KickoffError {
    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("a kickoff is already running for project {0}")]
    AlreadyRunning(ProjectId),

    #[error("kickoff cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("kickoff task aborted: {0}")]
    Aborted(String),
}

impl KickoffError {
    /// Lift a storage error, turning a missing project into `ProjectNotFound`.
    pub(crate) fn from_project_lookup(id: ProjectId, err: StorageError) -> Self {
        match err {
            StorageError::NotFound { kind: "project", .. } => KickoffError::ProjectNotFound(id),
            other => KickoffError::Storage(other),
        }
    }
}

/// Precondition and persistence failures of a single work item execution.
///
/// Remote agent failures never appear here; they are recorded as a response.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {0} is not assigned to an agent")]
    Unassigned(TaskId),

    #[error("team member not found: {0}")]
    MemberNotFound(String),

    #[error("project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("task {task_id} cannot be executed from status {status}")]
    InvalidState { task_id: TaskId, status: TaskStatus },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: String, value: String },

    #[error("failed to build agent transport: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_project_lookup_maps_to_project_not_found() {
        let id = ProjectId::new();
        let err = KickoffError::from_project_lookup(
            id,
            StorageError::NotFound {
                kind: "project",
                id: id.to_string(),
            },
        );
        assert!(matches!(err, KickoffError::ProjectNotFound(p) if p == id));

        let err = KickoffError::from_project_lookup(id, StorageError::Backend("down".into()));
        assert!(matches!(err, KickoffError::Storage(_)));
    }
}
