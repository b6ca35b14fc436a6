//! SurrealDB schema initialization
//!
//! Defines the four Squadron tables with their indexes and permissions.
//! Safe to call on every connection (all definitions are idempotent).

use crate::error::StateError;
use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Initialize all Squadron tables
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing Squadron SurrealDB schema");

    init_projects_table(db).await?;
    init_team_members_table(db).await?;
    init_tasks_table(db).await?;
    init_agent_responses_table(db).await?;

    info!("Squadron schema initialization complete");
    Ok(())
}

async fn run(db: &Surreal<Any>, table: &str, sql: &str) -> Result<()> {
    db.query(sql)
        .await
        .and_then(|res| res.check())
        .map_err(|e| StateError::SchemaSetup(format!("{table}: {e}")))?;
    debug!("✓ {} table initialized", table);
    Ok(())
}

/// `projects`: one row per project, keyed by `project_id`
async fn init_projects_table(db: &Surreal<Any>) -> Result<()> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS projects SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_project_id ON TABLE projects COLUMNS project_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_created_at ON TABLE projects COLUMNS created_at;
    "#;
    run(db, "projects", sql).await
}

/// `team_members`: agents, keyed by `member_id`
async fn init_team_members_table(db: &Surreal<Any>) -> Result<()> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS team_members SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_member_id ON TABLE team_members COLUMNS member_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_role ON TABLE team_members COLUMNS role;
    "#;
    run(db, "team_members", sql).await
}

/// `tasks`: work items, keyed by `task_id`
///
/// Status transitions are forward-only (enforced via app logic).
async fn init_tasks_table(db: &Surreal<Any>) -> Result<()> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS tasks SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update FULL
                FOR delete FULL;

        DEFINE INDEX IF NOT EXISTS idx_task_id ON TABLE tasks COLUMNS task_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_project_id ON TABLE tasks COLUMNS project_id;
        DEFINE INDEX IF NOT EXISTS idx_project_created ON TABLE tasks COLUMNS project_id, created_at;
    "#;
    run(db, "tasks", sql).await
}

/// `agent_responses`: append-only execution log
async fn init_agent_responses_table(db: &Surreal<Any>) -> Result<()> {
    let sql = r#"
        DEFINE TABLE IF NOT EXISTS agent_responses SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR read FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_response_id ON TABLE agent_responses COLUMNS response_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_task_id ON TABLE agent_responses COLUMNS task_id;
    "#;
    run(db, "agent_responses", sql).await
}
