//! Squadron-State: persistence for the Squadron orchestrator
//!
//! This crate owns every record the orchestration engine reads or writes:
//! projects, team members (agents), work items and the append-only log of
//! agent responses.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: record integrity and forward-only work item status.
//!
//! ## Key Components
//!
//! - `storage_traits`: record types plus the `ProjectStore`, `TeamStore`,
//!   `TaskStore` and `ResponseLog` traits
//! - `fakes::MemoryStore`: in-memory implementation used by tests and the CLI
//! - `SurrealStore`: SurrealDB-backed implementation

mod error;
pub mod fakes;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use error::{StateError, StorageError};
pub use storage_traits::{
    AgentResponse, AgentRole, MemberId, ParseEnumError, Project, ProjectId, ProjectStatus, ProjectStore,
    ResponseId, ResponseLog, StorageResult, Store, TaskId, TaskPriority, TaskStatus, TaskStore,
    TeamMember, TeamStore, WorkItem,
};
pub use surreal_store::SurrealStore;

/// Result type for connection and schema setup
pub type Result<T> = std::result::Result<T, StateError>;
