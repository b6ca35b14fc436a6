//! In-memory store
//!
//! `MemoryStore` satisfies every storage trait without external
//! dependencies. Tests use it directly; the CLI uses it for throwaway runs.
//! Writes can be made to fail on demand to exercise persistence outages.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

#[derive(Debug, Default)]
struct Tables {
    projects: HashMap<ProjectId, Project>,
    members: HashMap<MemberId, TeamMember>,
    tasks: HashMap<TaskId, WorkItem>,
    responses: Vec<AgentResponse>,
}

/// In-memory store backed by `HashMap`s behind a single mutex.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// When enabled, every write returns `StorageError::Backend`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn create_project(&self, project: Project) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables();
        if tables.projects.contains_key(&project.id) {
            return Err(StorageError::Duplicate {
                kind: "project",
                id: project.id.to_string(),
            });
        }
        tables.projects.insert(project.id, project);
        Ok(())
    }

    async fn get_project(&self, id: &ProjectId) -> StorageResult<Project> {
        self.tables()
            .projects
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: "project",
                id: id.to_string(),
            })
    }

    async fn update_requirements(&self, id: &ProjectId, requirements: &str) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables();
        let project = tables
            .projects
            .get_mut(id)
            .ok_or_else(|| StorageError::NotFound {
                kind: "project",
                id: id.to_string(),
            })?;
        project.requirements = Some(requirements.to_string());
        project.updated_at = Some(Utc::now());
        Ok(())
    }

    async fn list_projects(&self) -> StorageResult<Vec<Project>> {
        let mut projects: Vec<Project> = self.tables().projects.values().cloned().collect();
        projects.sort_by_key(|p| p.created_at);
        Ok(projects)
    }
}

#[async_trait]
impl TeamStore for MemoryStore {
    async fn create_member(&self, member: TeamMember) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables();
        if tables.members.contains_key(&member.id) {
            return Err(StorageError::Duplicate {
                kind: "team member",
                id: member.id.to_string(),
            });
        }
        tables.members.insert(member.id, member);
        Ok(())
    }

    async fn get_member(&self, id: &MemberId) -> StorageResult<TeamMember> {
        self.tables()
            .members
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: "team member",
                id: id.to_string(),
            })
    }

    async fn list_members(&self) -> StorageResult<Vec<TeamMember>> {
        let mut members: Vec<TeamMember> = self.tables().members.values().cloned().collect();
        members.sort_by_key(|m| m.created_at);
        Ok(members)
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create_task(&self, task: WorkItem) -> StorageResult<()> {
        self.create_tasks(vec![task]).await
    }

    async fn create_tasks(&self, tasks: Vec<WorkItem>) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables();
        if let Some(dup) = tasks.iter().find(|t| tables.tasks.contains_key(&t.id)) {
            return Err(StorageError::Duplicate {
                kind: "task",
                id: dup.id.to_string(),
            });
        }
        for task in tasks {
            tables.tasks.insert(task.id, task);
        }
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> StorageResult<WorkItem> {
        self.tables()
            .tasks
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: "task",
                id: id.to_string(),
            })
    }

    async fn update_task(&self, task: &WorkItem) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables();
        let stored = tables
            .tasks
            .get_mut(&task.id)
            .ok_or_else(|| StorageError::NotFound {
                kind: "task",
                id: task.id.to_string(),
            })?;
        check_transition(stored, task)?;
        *stored = task.clone();
        Ok(())
    }

    async fn list_tasks(&self, project: Option<&ProjectId>) -> StorageResult<Vec<WorkItem>> {
        let mut tasks: Vec<WorkItem> = self
            .tables()
            .tasks
            .values()
            .filter(|t| project.map_or(true, |p| &t.project_id == p))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }
}

#[async_trait]
impl ResponseLog for MemoryStore {
    async fn append_response(&self, response: AgentResponse) -> StorageResult<()> {
        self.check_writable()?;
        let mut tables = self.tables();
        if tables.responses.iter().any(|r| r.id == response.id) {
            return Err(StorageError::Duplicate {
                kind: "agent response",
                id: response.id.to_string(),
            });
        }
        tables.responses.push(response);
        Ok(())
    }

    async fn list_responses(&self, task: &TaskId) -> StorageResult<Vec<AgentResponse>> {
        Ok(self
            .tables()
            .responses
            .iter()
            .filter(|r| &r.task_id == task)
            .cloned()
            .collect())
    }
}
