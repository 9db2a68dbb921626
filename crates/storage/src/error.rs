//! Backend-level errors.
//!
//! A backend reports one of three things going wrong:
//!
//! | Variant | Meaning | Repository maps it to |
//! |---------|---------|-----------------------|
//! | [`Conflict`](StorageError::Conflict) | a compare-and-set precondition did not hold | `WriteFailed` / `DeleteFailed` |
//! | [`Serialization`](StorageError::Serialization) | a stored record did not decode | `Storage` |
//! | [`Internal`](StorageError::Internal) | the backend itself failed | `Storage` |
//!
//! Missing keys are not errors at this level: `get` returns `None` and
//! `delete` returns a row count.

use std::sync::Arc;

use thiserror::Error;

/// Shared, cloneable error source.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for backend operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors returned by a [`StorageBackend`](crate::StorageBackend).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A compare-and-set or compare-and-delete precondition failed.
    ///
    /// Inside a transaction this rejects the whole commit; nothing is applied.
    #[error("Transaction conflict")]
    Conflict,

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {message}")]
    Serialization {
        /// What was being decoded.
        message: String,
        /// Decoder error.
        #[source]
        source: Option<BoxError>,
    },

    /// The backend failed.
    #[error("Internal error: {message}")]
    Internal {
        /// What failed.
        message: String,
        /// Backend error, when there is one.
        #[source]
        source: Option<BoxError>,
    },
}

impl StorageError {
    /// Creates an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates an `Internal` error caused by `source`.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization { message: "invalid JSON record".to_owned(), source: Some(Arc::new(err)) }
    }
}
