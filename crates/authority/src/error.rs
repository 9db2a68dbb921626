//! Service error taxonomy.
//!
//! [`ServiceError`] variants are the *kind* of failure. Each carries the
//! [`Domain`] that raised it and the entity it concerns as data, so callers
//! can branch on kind without parsing messages:
//!
//! | Variant | Status | Example message |
//! |---------|--------|-----------------|
//! | [`Invalid`](ServiceError::Invalid) | `InvalidArgument` | `authz: invalid signature` |
//! | [`Nil`](ServiceError::Nil) | `InvalidArgument` | `authz: no challenge` |
//! | [`Expired`](ServiceError::Expired) | `InvalidArgument` | `authz: expired challenge` |
//! | [`NotFound`](ServiceError::NotFound) | `NotFound` | `ca: certificate not found` |
//! | [`PermissionDenied`](ServiceError::PermissionDenied) | `PermissionDenied` | `ca: public key mismatch` |
//! | [`WriteFailed`](ServiceError::WriteFailed) | `Internal` | `repository: failed to write token` |
//! | [`DeleteFailed`](ServiceError::DeleteFailed) | `Internal` | `repository: failed to remove challenge` |
//! | [`Internal`](ServiceError::Internal) | `Internal` | `authz: internal error on repository` |
//!
//! Internal failures are logged with detail where they happen and reported
//! to callers through [`ServiceError::public_message`], which hides them.

use std::fmt;

use fleetauth_pki::PkiError;
use fleetauth_storage::{BoxError, RepositoryError};
use thiserror::Error;

/// Result type alias for service operations.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Component that raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Domain {
    /// Certificate Authority.
    Ca,
    /// Authorization service.
    Authz,
    /// Persistence layer.
    Repository,
    /// Configuration and bootstrap.
    Config,
}

impl Domain {
    /// Lower-case name used in messages and log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ca => "ca",
            Self::Authz => "authz",
            Self::Repository => "repository",
            Self::Config => "config",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport-neutral status a [`ServiceError`] maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Status {
    /// The request was malformed or failed a check on caller input.
    InvalidArgument,
    /// The caller does not own the resource.
    PermissionDenied,
    /// The resource does not exist.
    NotFound,
    /// The service failed.
    Internal,
}

impl Status {
    /// Upper camel case name, as used by RPC status codes.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::PermissionDenied => "PermissionDenied",
            Self::NotFound => "NotFound",
            Self::Internal => "Internal",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the CA and Authorization services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ServiceError {
    /// Caller input failed a check.
    #[error("{domain}: invalid {entity}")]
    Invalid {
        /// Raising component.
        domain: Domain,
        /// What was invalid (e.g. "public key", "signature").
        entity: &'static str,
        /// Underlying decode or verification error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// A required value was absent.
    #[error("{domain}: no {entity}")]
    Nil {
        /// Raising component.
        domain: Domain,
        /// What was missing.
        entity: &'static str,
    },

    /// A time-bounded value is past its expiry.
    #[error("{domain}: expired {entity}")]
    Expired {
        /// Raising component.
        domain: Domain,
        /// What expired.
        entity: &'static str,
    },

    /// The requested resource does not exist.
    #[error("{domain}: {entity} not found")]
    NotFound {
        /// Raising component.
        domain: Domain,
        /// What was looked up.
        entity: &'static str,
    },

    /// The caller's key or certificate does not match the stored one.
    #[error("{domain}: {entity} mismatch")]
    PermissionDenied {
        /// Raising component.
        domain: Domain,
        /// What did not match.
        entity: &'static str,
    },

    /// A write did not affect exactly one row.
    #[error("{domain}: failed to write {entity}")]
    WriteFailed {
        /// Raising component.
        domain: Domain,
        /// Row kind.
        entity: &'static str,
    },

    /// A delete did not affect exactly one row.
    #[error("{domain}: failed to remove {entity}")]
    DeleteFailed {
        /// Raising component.
        domain: Domain,
        /// Row kind.
        entity: &'static str,
    },

    /// Storage or own-key-material failure.
    #[error("{domain}: internal error on {entity}")]
    Internal {
        /// Raising component.
        domain: Domain,
        /// Subsystem that failed.
        entity: &'static str,
        /// Underlying error.
        #[source]
        source: BoxError,
    },
}

impl ServiceError {
    /// Creates an [`Invalid`](Self::Invalid) error without a source.
    #[must_use]
    pub fn invalid(domain: Domain, entity: &'static str) -> Self {
        Self::Invalid { domain, entity, source: None }
    }

    /// Creates an [`Invalid`](Self::Invalid) error wrapping `source`.
    pub fn invalid_with_source(
        domain: Domain,
        entity: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Invalid { domain, entity, source: Some(std::sync::Arc::new(source)) }
    }

    /// Creates an [`Internal`](Self::Internal) error wrapping `source`.
    pub fn internal(
        domain: Domain,
        entity: &'static str,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { domain, entity, source: std::sync::Arc::new(source) }
    }

    /// Maps caller-supplied crypto material failures to
    /// [`Invalid`](Self::Invalid), for use with `map_err`.
    pub(crate) fn invalid_input(domain: Domain, entity: &'static str) -> impl FnOnce(PkiError) -> Self {
        move |err| Self::invalid_with_source(domain, entity, err)
    }

    /// Maps failures on the service's own key material to
    /// [`Internal`](Self::Internal), for use with `map_err`.
    pub(crate) fn own_key(domain: Domain, entity: &'static str) -> impl FnOnce(PkiError) -> Self {
        move |err| Self::internal(domain, entity, err)
    }

    /// Maps repository failures, keeping their kind, for use with `map_err`.
    pub(crate) fn repository(domain: Domain, entity: &'static str) -> impl FnOnce(RepositoryError) -> Self {
        move |err| match err {
            RepositoryError::NotFound { .. } => Self::NotFound { domain, entity },
            RepositoryError::WriteFailed { .. } => {
                Self::WriteFailed { domain: Domain::Repository, entity }
            },
            RepositoryError::DeleteFailed { .. } => {
                Self::DeleteFailed { domain: Domain::Repository, entity }
            },
            other => Self::internal(domain, "repository", other),
        }
    }

    /// The status this error maps to.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Invalid { .. } | Self::Nil { .. } | Self::Expired { .. } => Status::InvalidArgument,
            Self::NotFound { .. } => Status::NotFound,
            Self::PermissionDenied { .. } => Status::PermissionDenied,
            Self::WriteFailed { .. } | Self::DeleteFailed { .. } | Self::Internal { .. } => {
                Status::Internal
            },
        }
    }

    /// The component that raised the error.
    #[must_use]
    pub fn domain(&self) -> Domain {
        match self {
            Self::Invalid { domain, .. }
            | Self::Nil { domain, .. }
            | Self::Expired { domain, .. }
            | Self::NotFound { domain, .. }
            | Self::PermissionDenied { domain, .. }
            | Self::WriteFailed { domain, .. }
            | Self::DeleteFailed { domain, .. }
            | Self::Internal { domain, .. } => *domain,
        }
    }

    /// The entity the error concerns.
    #[must_use]
    pub fn entity(&self) -> &'static str {
        match self {
            Self::Invalid { entity, .. }
            | Self::Nil { entity, .. }
            | Self::Expired { entity, .. }
            | Self::NotFound { entity, .. }
            | Self::PermissionDenied { entity, .. }
            | Self::WriteFailed { entity, .. }
            | Self::DeleteFailed { entity, .. }
            | Self::Internal { entity, .. } => entity,
        }
    }

    /// Message safe to return to callers. Internal detail is withheld.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.status() {
            Status::Internal => "internal error".to_owned(),
            _ => self.to_string(),
        }
    }
}
