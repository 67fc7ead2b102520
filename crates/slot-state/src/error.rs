//! Error types for slot-state

use thiserror::Error;

/// Errors raised while connecting to or preparing a backend
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

/// Errors returned by `ParameterStore` operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The slot does not exist
    #[error("parameter not found: {name}")]
    NotFound { name: String },

    /// A non-overwriting write hit an existing slot
    #[error("parameter already exists: {name}")]
    AlreadyExists { name: String },

    /// The slot name failed validation
    #[error("invalid parameter name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Any backend failure (network, query, serialization)
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}
