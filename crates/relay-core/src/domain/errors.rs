//! Errors - エラー型と分類
//!
//! Every public operation in the crate returns `Result<_, RelayError>`.

use thiserror::Error;

use super::ids::TaskId;

/// RelayError はドメインエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Missing table, record, task, or row field.
    #[error("{what} not found: {name}")]
    NotFound { what: &'static str, name: String },

    /// A row field was read or written with a type other than its schema type.
    #[error("type mismatch on field '{field}': expected {expected}, found {found}")]
    TypeMismatch {
        field: String,
        expected: String,
        found: String,
    },

    /// An external service answered with a non-success response.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// The task did not complete within its `expires_after` window.
    #[error("task {0} expired")]
    Expired(TaskId),

    /// Malformed options, schemas, or rows.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("operation cancelled")]
    Cancelled,

    /// No acknowledgement arrived on the bus in time.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("'{0}' is already registered")]
    AlreadyRegistered(String),

    /// The bus or registry has been shut down.
    #[error("{0} is closed")]
    Closed(&'static str),
}

impl RelayError {
    pub fn not_found(what: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            what,
            name: name.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RelayError::Cancelled)
    }
}

impl From<reqwest::Error> for RelayError {
    fn from(err: reqwest::Error) -> Self {
        RelayError::Upstream(err.to_string())
    }
}
