//! Error types for squadron-state

use thiserror::Error;

/// Errors raised while connecting to or preparing the database
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by storage trait operations
#[derive(Error, Debug)]
pub enum StorageError {
    /// No record of `kind` exists with this id
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A record of `kind` with this id was already written
    #[error("{kind} already exists: {id}")]
    Duplicate { kind: &'static str, id: String },

    /// Work item status may only move forward
    #[error("task {task_id}: invalid status transition {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    /// The backing store rejected or failed the operation
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored value could not be converted
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
