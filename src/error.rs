// ⚠️ Error types for history tracking
//
// Every fallible operation in the crate returns `HistoryError`. Lookups that
// find no history are ordinary outcomes: callers usually match on
// `is_not_found()` instead of bubbling the error up.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HistoryError {
    /// No historical entry exists for the requested lookup
    #[error("{schema} has no historical record for id {id}")]
    NotFound { schema: String, id: String },

    /// `as_of` resolved to a deletion entry
    #[error("{schema} {id} had already been deleted")]
    AlreadyDeleted { schema: String, id: String },

    /// Registration or projection would clash with something the schema already has
    #[error("configuration conflict: {0}")]
    ConfigurationConflict(String),

    #[error("schema {0} is already registered")]
    DuplicateSchema(String),

    /// Instance-only operation called on the table-wide manager
    #[error("{0}() requires a history manager scoped to one record")]
    Unscoped(&'static str),

    #[error("{schema} has no field named {field}")]
    UnknownField { schema: String, field: String },

    #[error("field {field} holds {found}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: String,
    },

    #[error("no installed history table named {0}")]
    NotInstalled(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl HistoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, HistoryError::NotFound { .. })
    }

    pub fn is_already_deleted(&self) -> bool {
        matches!(self, HistoryError::AlreadyDeleted { .. })
    }
}

pub type Result<T> = std::result::Result<T, HistoryError>;

/// Helper function to create a configuration conflict
pub fn conflict(msg: impl Into<String>) -> HistoryError {
    HistoryError::ConfigurationConflict(msg.into())
}
