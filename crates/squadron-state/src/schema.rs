//! SurrealDB row types
//!
//! Rows keep ids and enums as strings and timestamps as SurrealDB datetimes;
//! conversion to the `storage_traits` records happens at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage_traits::{AgentResponse, Project, StorageResult, TeamMember, WorkItem};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Module for serializing optional chrono DateTime to SurrealDB datetime format
mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let sd = SurrealDatetime::from(*d);
                serde::Serialize::serialize(&Some(sd), serializer)
            }
            None => serde::Serialize::serialize(&None::<SurrealDatetime>, serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = Option::<SurrealDatetime>::deserialize(deserializer)?;
        Ok(sd.map(DateTime::from))
    }
}

fn parse<T>(field: &str, value: &str) -> StorageResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| StorageError::Serialization(format!("{field}: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectRow {
    pub project_id: String,
    pub name: String,
    pub description: String,
    pub status: String,
    pub requirements: Option<String>,
    pub technical_stack: Option<String>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Project> for ProjectRow {
    fn from(p: &Project) -> Self {
        ProjectRow {
            project_id: p.id.to_string(),
            name: p.name.clone(),
            description: p.description.clone(),
            status: p.status.to_string(),
            requirements: p.requirements.clone(),
            technical_stack: p.technical_stack.clone(),
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

impl ProjectRow {
    pub fn into_record(self) -> StorageResult<Project> {
        Ok(Project {
            id: parse("project_id", &self.project_id)?,
            name: self.name,
            description: self.description,
            status: parse("status", &self.status)?,
            requirements: self.requirements,
            technical_stack: self.technical_stack,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRow {
    pub member_id: String,
    pub name: String,
    pub role: String,
    pub description: String,
    pub is_active: bool,
    pub agent_endpoint: Option<String>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl From<&TeamMember> for MemberRow {
    fn from(m: &TeamMember) -> Self {
        MemberRow {
            member_id: m.id.to_string(),
            name: m.name.clone(),
            role: m.role.to_string(),
            description: m.description.clone(),
            is_active: m.is_active,
            agent_endpoint: m.agent_endpoint.clone(),
            created_at: m.created_at,
        }
    }
}

impl MemberRow {
    pub fn into_record(self) -> StorageResult<TeamMember> {
        Ok(TeamMember {
            id: parse("member_id", &self.member_id)?,
            name: self.name,
            role: parse("role", &self.role)?,
            description: self.description,
            is_active: self.is_active,
            agent_endpoint: self.agent_endpoint,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRow {
    pub task_id: String,
    pub project_id: String,
    pub assigned_to: Option<String>,
    pub title: String,
    pub description: String,
    pub status: String,
    pub priority: String,
    pub context: Option<String>,
    pub expected_output: Option<String>,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&WorkItem> for TaskRow {
    fn from(t: &WorkItem) -> Self {
        TaskRow {
            task_id: t.id.to_string(),
            project_id: t.project_id.to_string(),
            assigned_to: t.assigned_to.map(|m| m.to_string()),
            title: t.title.clone(),
            description: t.description.clone(),
            status: t.status.to_string(),
            priority: t.priority.to_string(),
            context: t.context.clone(),
            expected_output: t.expected_output.clone(),
            created_at: t.created_at,
            updated_at: t.updated_at,
            completed_at: t.completed_at,
        }
    }
}

impl TaskRow {
    pub fn into_record(self) -> StorageResult<WorkItem> {
        Ok(WorkItem {
            id: parse("task_id", &self.task_id)?,
            project_id: parse("project_id", &self.project_id)?,
            assigned_to: self
                .assigned_to
                .as_deref()
                .map(|m| parse("assigned_to", m))
                .transpose()?,
            title: self.title,
            description: self.description,
            status: parse("status", &self.status)?,
            priority: parse("priority", &self.priority)?,
            context: self.context,
            expected_output: self.expected_output,
            created_at: self.created_at,
            updated_at: self.updated_at,
            completed_at: self.completed_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRow {
    pub response_id: String,
    pub task_id: String,
    pub team_member_id: String,
    pub content: String,
    pub is_successful: bool,
    pub error_message: Option<String>,
    pub tokens_used: u32,
    pub processing_time_ms: f64,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl From<&AgentResponse> for ResponseRow {
    fn from(r: &AgentResponse) -> Self {
        ResponseRow {
            response_id: r.id.to_string(),
            task_id: r.task_id.to_string(),
            team_member_id: r.team_member_id.to_string(),
            content: r.content.clone(),
            is_successful: r.is_successful,
            error_message: r.error_message.clone(),
            tokens_used: r.tokens_used,
            processing_time_ms: r.processing_time_ms,
            created_at: r.created_at,
        }
    }
}

impl ResponseRow {
    pub fn into_record(self) -> StorageResult<AgentResponse> {
        Ok(AgentResponse {
            id: parse("response_id", &self.response_id)?,
            task_id: parse("task_id", &self.task_id)?,
            team_member_id: parse("team_member_id", &self.team_member_id)?,
            content: self.content,
            is_successful: self.is_successful,
            error_message: self.error_message,
            tokens_used: self.tokens_used,
            processing_time_ms: self.processing_time_ms,
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_traits::{AgentRole, ProjectId, TaskPriority};

    #[test]
    fn task_row_round_trips_through_record() {
        let item = WorkItem::new(ProjectId::new(), "Setup", "Create solution")
            .with_priority(TaskPriority::High);
        let row = TaskRow::from(&item);
        assert_eq!(row.status, "Pending");
        assert_eq!(row.priority, "High");
        assert_eq!(row.into_record().unwrap(), item);
    }

    #[test]
    fn member_row_rejects_unknown_role() {
        let mut row = MemberRow::from(&TeamMember::new("Ana", AgentRole::Designer));
        row.role = "Janitor".to_string();
        let err = row.into_record().unwrap_err();
        assert!(matches!(err, StorageError::Serialization(_)));
    }

    #[test]
    fn task_row_rejects_unknown_status() {
        let mut row = TaskRow::from(&WorkItem::new(ProjectId::new(), "t", "d"));
        row.status = "Archived".to_string();
        assert!(matches!(
            row.into_record().unwrap_err(),
            StorageError::Serialization(_)
        ));
    }
}
