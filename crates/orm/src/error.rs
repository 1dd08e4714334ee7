//! Error types for the record system
//!
//! Structural errors (unknown relation, malformed relation payloads,
//! guarded models) are returned to the caller directly. Persistence errors
//! raised inside a transaction are caught at the boundary by `save` and
//! `delete` and kept on the record instead.

use thiserror::Error;

use crate::event_error::EventError;
use crate::validation::FieldErrors;

/// Result type alias for record operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Result type alias for repository collaborators
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Error types for record operations
#[derive(Debug, Clone, Error)]
pub enum OrmError {
    /// `fill` was called on a model whose guard list is the wildcard
    #[error("Mass assignment is not allowed on fully guarded model '{model}'")]
    MassAssignment { model: String },

    /// A row was addressed without a primary key value
    #[error("Primary key is missing for model '{model}'")]
    MissingPrimaryKey { model: String },

    /// Lookup of an undeclared relation alias
    #[error("Relation '{alias}' is not declared on model '{model}'")]
    MissingRelation { model: String, alias: String },

    /// Eager loading requested on a non-select query
    #[error("Relation '{alias}' cannot be eager loaded on a {query_type} query")]
    InvalidRelationQuery { alias: String, query_type: String },

    /// Nested relation payload has the wrong shape
    #[error("Invalid payload for relation '{alias}': {reason}")]
    InvalidRelationStructure { alias: String, reason: String },

    /// A cascaded write failed inside the owner's transaction
    #[error("Relation '{alias}' failed to persist: {reason}")]
    RelationQueryFailure { alias: String, reason: String },

    /// No definition registered under the given name
    #[error("Model '{0}' is not registered")]
    MissingModel(String),

    /// Record not found by primary key
    #[error("Record not found in '{model}' for id {id}")]
    NotFound { model: String, id: String },

    /// Validation failed (only raised by helpers that opt into errors)
    #[error("Validation failed: {0:?}")]
    Validation(FieldErrors),

    /// Invalid model or relation configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Lifecycle observer failed or stopped propagation
    #[error(transparent)]
    Event(#[from] EventError),

    /// Storage collaborator failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl OrmError {
    pub(crate) fn missing_relation(model: &str, alias: &str) -> Self {
        Self::MissingRelation {
            model: model.to_string(),
            alias: alias.to_string(),
        }
    }

    pub(crate) fn invalid_structure(alias: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRelationStructure {
            alias: alias.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn relation_failure(alias: &str, reason: impl Into<String>) -> Self {
        Self::RelationQueryFailure {
            alias: alias.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether an observer asked the operation to stop
    pub fn is_propagation_stopped(&self) -> bool {
        matches!(self, Self::Event(EventError::PropagationStopped { .. }))
    }
}

impl From<serde_json::Error> for OrmError {
    fn from(err: serde_json::Error) -> Self {
        OrmError::Serialization(err.to_string())
    }
}

/// Error types for repository collaborators
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// Shared storage lock was poisoned
    #[error("repository lock poisoned during {0}")]
    LockPoisoned(&'static str),

    /// Table is unknown to the backend
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    /// Transaction could not be started, committed or rolled back
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Backend specific failure
    #[error("backend error: {0}")]
    Backend(String),
}
