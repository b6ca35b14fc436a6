//! SurrealDB-backed store
//!
//! Uses the row types in `schema` for persistence, converting to and from
//! `storage_traits` records at the boundary.

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StateError, StorageError};
use crate::migrations;
use crate::schema::{MemberRow, ProjectRow, ResponseRow, TaskRow};
use crate::storage_traits::{
    check_transition, AgentResponse, MemberId, Project, ProjectId, ProjectStore, ResponseLog,
    StorageResult, TaskId, TaskStore, TeamMember, TeamStore, WorkItem,
};

/// Default on-disk location when `SQUADRON_DB_URL` is not set
pub const DEFAULT_DB_URL: &str = "surrealkv://.squadron/db";

/// SurrealDB-backed implementation of every storage trait.
pub struct SurrealStore {
    db: Surreal<Any>,
}

impl SurrealStore {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect("mem://").await
    }

    /// Connect to `url` (any engine SurrealDB understands), select
    /// `squadron/main` and run schema initialization.
    pub async fn connect(url: &str) -> crate::Result<Self> {
        if let Some(path) = url.strip_prefix("surrealkv://") {
            std::fs::create_dir_all(path).map_err(|e| {
                StateError::Connection(format!(
                    "Failed to create database directory {}: {}",
                    path, e
                ))
            })?;
        }

        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

        db.use_ns("squadron")
            .use_db("main")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("SurrealStore connected ({})", url);
        Ok(Self { db })
    }

    /// Connect using `SQUADRON_DB_URL`, falling back to local persistence
    /// in `.squadron/db`.
    pub async fn from_env() -> crate::Result<Self> {
        let url = std::env::var("SQUADRON_DB_URL").unwrap_or_else(|_| DEFAULT_DB_URL.to_string());
        Self::connect(&url).await
    }

    // -- private helpers -----------------------------------------------------

    async fn select_rows<T>(&self, sql: &'static str, key: &str, value: String) -> StorageResult<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut res = self
            .db
            .query(sql)
            .bind((key.to_string(), value))
            .await?;
        Ok(res.take(0)?)
    }

    async fn fetch_project(&self, id: &ProjectId) -> StorageResult<ProjectRow> {
        let rows: Vec<ProjectRow> = self
            .select_rows(
                "SELECT * OMIT id FROM projects WHERE project_id = $id",
                "id",
                id.to_string(),
            )
            .await?;
        rows.into_iter().next().ok_or_else(|| StorageError::NotFound {
            kind: "project",
            id: id.to_string(),
        })
    }

    async fn fetch_member(&self, id: &MemberId) -> StorageResult<MemberRow> {
        let rows: Vec<MemberRow> = self
            .select_rows(
                "SELECT * OMIT id FROM team_members WHERE member_id = $id",
                "id",
                id.to_string(),
            )
            .await?;
        rows.into_iter().next().ok_or_else(|| StorageError::NotFound {
            kind: "team member",
            id: id.to_string(),
        })
    }

    async fn fetch_task(&self, id: &TaskId) -> StorageResult<TaskRow> {
        let rows: Vec<TaskRow> = self
            .select_rows(
                "SELECT * OMIT id FROM tasks WHERE task_id = $id",
                "id",
                id.to_string(),
            )
            .await?;
        rows.into_iter().next().ok_or_else(|| StorageError::NotFound {
            kind: "task",
            id: id.to_string(),
        })
    }

    async fn response_exists(&self, id: &str) -> StorageResult<bool> {
        let rows: Vec<ResponseRow> = self
            .select_rows(
                "SELECT * OMIT id FROM agent_responses WHERE response_id = $id",
                "id",
                id.to_string(),
            )
            .await?;
        Ok(!rows.is_empty())
    }
}

#[async_trait]
impl ProjectStore for SurrealStore {
    async fn create_project(&self, project: Project) -> StorageResult<()> {
        match self.fetch_project(&project.id).await {
            Ok(_) => {
                return Err(StorageError::Duplicate {
                    kind: "project",
                    id: project.id.to_string(),
                })
            }
            Err(StorageError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        debug!(project_id = %project.id, "creating project");
        self.db
            .query("CREATE projects CONTENT $row")
            .bind(("row", ProjectRow::from(&project)))
            .await?
            .check()?;
        Ok(())
    }

    async fn get_project(&self, id: &ProjectId) -> StorageResult<Project> {
        self.fetch_project(id).await?.into_record()
    }

    async fn update_requirements(&self, id: &ProjectId, requirements: &str) -> StorageResult<()> {
        self.fetch_project(id).await?;
        self.db
            .query(
                "UPDATE projects SET requirements = $req, updated_at = time::now() \
                 WHERE project_id = $id",
            )
            .bind(("req", requirements.to_string()))
            .bind(("id", id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn list_projects(&self) -> StorageResult<Vec<Project>> {
        let mut res = self
            .db
            .query("SELECT * OMIT id FROM projects ORDER BY created_at ASC")
            .await?;
        let rows: Vec<ProjectRow> = res.take(0)?;
        rows.into_iter().map(ProjectRow::into_record).collect()
    }
}

#[async_trait]
impl TeamStore for SurrealStore {
    async fn create_member(&self, member: TeamMember) -> StorageResult<()> {
        match self.fetch_member(&member.id).await {
            Ok(_) => {
                return Err(StorageError::Duplicate {
                    kind: "team member",
                    id: member.id.to_string(),
                })
            }
            Err(StorageError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        self.db
            .query("CREATE team_members CONTENT $row")
            .bind(("row", MemberRow::from(&member)))
            .await?
            .check()?;
        Ok(())
    }

    async fn get_member(&self, id: &MemberId) -> StorageResult<TeamMember> {
        self.fetch_member(id).await?.into_record()
    }

    async fn list_members(&self) -> StorageResult<Vec<TeamMember>> {
        let mut res = self
            .db
            .query("SELECT * OMIT id FROM team_members ORDER BY created_at ASC")
            .await?;
        let rows: Vec<MemberRow> = res.take(0)?;
        rows.into_iter().map(MemberRow::into_record).collect()
    }
}

#[async_trait]
impl TaskStore for SurrealStore {
    async fn create_task(&self, task: WorkItem) -> StorageResult<()> {
        self.create_tasks(vec![task]).await
    }

    async fn create_tasks(&self, tasks: Vec<WorkItem>) -> StorageResult<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = tasks.iter().map(|t| t.id.to_string()).collect();
        let mut res = self
            .db
            .query("SELECT * OMIT id FROM tasks WHERE task_id IN $ids")
            .bind(("ids", ids))
            .await?;
        let existing: Vec<TaskRow> = res.take(0)?;
        if let Some(dup) = existing.into_iter().next() {
            return Err(StorageError::Duplicate {
                kind: "task",
                id: dup.task_id,
            });
        }

        let rows: Vec<TaskRow> = tasks.iter().map(TaskRow::from).collect();
        debug!(count = rows.len(), "inserting tasks");
        self.db
            .query("BEGIN TRANSACTION; INSERT INTO tasks $rows; COMMIT TRANSACTION;")
            .bind(("rows", rows))
            .await?
            .check()?;
        Ok(())
    }

    async fn get_task(&self, id: &TaskId) -> StorageResult<WorkItem> {
        self.fetch_task(id).await?.into_record()
    }

    async fn update_task(&self, task: &WorkItem) -> StorageResult<()> {
        let stored = self.fetch_task(&task.id).await?.into_record()?;
        check_transition(&stored, task)?;

        self.db
            .query("UPDATE tasks CONTENT $row WHERE task_id = $id")
            .bind(("row", TaskRow::from(task)))
            .bind(("id", task.id.to_string()))
            .await?
            .check()?;
        Ok(())
    }

    async fn list_tasks(&self, project: Option<&ProjectId>) -> StorageResult<Vec<WorkItem>> {
        let rows: Vec<TaskRow> = match project {
            Some(p) => {
                self.select_rows(
                    "SELECT * OMIT id FROM tasks WHERE project_id = $pid ORDER BY created_at ASC",
                    "pid",
                    p.to_string(),
                )
                .await?
            }
            None => {
                let mut res = self
                    .db
                    .query("SELECT * OMIT id FROM tasks ORDER BY created_at ASC")
                    .await?;
                res.take(0)?
            }
        };
        rows.into_iter().map(TaskRow::into_record).collect()
    }
}

#[async_trait]
impl ResponseLog for SurrealStore {
    async fn append_response(&self, response: AgentResponse) -> StorageResult<()> {
        let rid = response.id.to_string();
        if self.response_exists(&rid).await? {
            return Err(StorageError::Duplicate {
                kind: "agent response",
                id: rid,
            });
        }

        self.db
            .query("CREATE agent_responses CONTENT $row")
            .bind(("row", ResponseRow::from(&response)))
            .await?
            .check()?;
        Ok(())
    }

    async fn list_responses(&self, task: &TaskId) -> StorageResult<Vec<AgentResponse>> {
        let rows: Vec<ResponseRow> = self
            .select_rows(
                "SELECT * OMIT id FROM agent_responses WHERE task_id = $tid ORDER BY created_at ASC",
                "tid",
                task.to_string(),
            )
            .await?;
        rows.into_iter().map(ResponseRow::into_record).collect()
    }
}
