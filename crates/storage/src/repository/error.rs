use std::time::Duration;

use thiserror::Error;

use crate::error::StorageError;

/// Result type alias for repository operations.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Errors produced by the repository.
///
/// Mutations that do not affect exactly one row fail with
/// [`WriteFailed`](Self::WriteFailed) or [`DeleteFailed`](Self::DeleteFailed),
/// never silently.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RepositoryError {
    /// The requested row does not exist.
    #[error("{entity} not found: {name}")]
    NotFound {
        /// Table the lookup ran against (e.g. "service", "challenge").
        entity: &'static str,
        /// Service name the lookup was scoped to.
        name: String,
    },

    /// An insert or update did not affect exactly one row.
    #[error("failed to write entry")]
    WriteFailed {
        /// Table the write targeted.
        entity: &'static str,
    },

    /// A delete did not affect exactly one row.
    #[error("failed to remove entry")]
    DeleteFailed {
        /// Table the delete targeted.
        entity: &'static str,
    },

    /// The backend failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A cleanup pass exceeded its time budget.
    #[error("cleanup exceeded its timeout of {limit:?}")]
    Timeout {
        /// Configured per-run budget.
        limit: Duration,
    },

    /// The repository was built outside a Tokio runtime, so its cleanup
    /// task could not start.
    #[error("no Tokio runtime to run cleanup on")]
    NoRuntime,

    /// The cleanup schedule is not a valid cron expression.
    #[error("invalid cleanup schedule '{expression}'")]
    InvalidSchedule {
        /// The rejected expression.
        expression: String,
        /// Parser error.
        #[source]
        source: cron::error::Error,
    },
}

impl RepositoryError {
    pub(crate) fn not_found(entity: &'static str, name: &str) -> Self {
        Self::NotFound { entity, name: name.to_owned() }
    }

    /// Returns `true` for [`NotFound`](Self::NotFound).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.into())
    }
}
