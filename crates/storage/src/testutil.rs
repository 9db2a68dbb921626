//! Shared test utilities for the storage layer.
//!
//! Feature-gated behind `testutil` so none of it reaches production builds.
//!
//! ```toml
//! [dev-dependencies]
//! fleetauth-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use fleetauth_storage::testutil::{memory_repository, seed_service};
//! ```

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
    memory::MemoryBackend,
    repository::{Repository, RepositoryConfig},
};

/// A schedule that fires once a year, so it stays out of a test's way.
pub const YEARLY: &str = "0 0 1 1 *";

/// Builds a repository over a fresh [`MemoryBackend`], returning both so
/// tests can inspect raw storage.
///
/// The cleanup task is scheduled for [`YEARLY`]; call
/// [`Repository::cleanup_expired`] to sweep explicitly.
///
/// # Panics
///
/// Panics if called outside a Tokio runtime.
#[must_use]
pub fn memory_repository() -> (Repository, MemoryBackend) {
    repository_with_schedule(YEARLY)
}

/// Like [`memory_repository`], with a custom cleanup schedule.
///
/// # Panics
///
/// Panics if the schedule does not parse.
#[must_use]
pub fn repository_with_schedule(schedule: &str) -> (Repository, MemoryBackend) {
    let backend = MemoryBackend::new();
    let config = RepositoryConfig::builder()
        .cleanup_schedule(schedule)
        .cleanup_timeout(Duration::from_secs(30))
        .build()
        .expect("test schedule must parse");
    let repo = Repository::new(Arc::new(backend.clone()), &config).expect("repository");
    (repo, backend)
}

/// Registers `name` with a placeholder public key.
///
/// # Panics
///
/// Panics if the service already exists.
pub async fn seed_service(repo: &Repository, name: &str) {
    repo.create_service(name, format!("public-key-of-{name}").as_bytes())
        .await
        .expect("seed service");
}

/// Stores one certificate per expiry for `service`, with bytes `cert-{i}`.
///
/// # Panics
///
/// Panics if `service` does not exist.
pub async fn seed_certificates(repo: &Repository, service: &str, expiries: &[DateTime<Utc>]) {
    for (i, expires_at) in expiries.iter().enumerate() {
        repo.create_certificate(service, format!("cert-{i}").as_bytes(), *expires_at)
            .await
            .expect("seed certificate");
    }
}

/// Stores one token per expiry for `service`, with bytes `token-{i}`.
///
/// # Panics
///
/// Panics if `service` does not exist.
pub async fn seed_tokens(repo: &Repository, service: &str, expiries: &[DateTime<Utc>]) {
    for (i, expires_at) in expiries.iter().enumerate() {
        repo.create_token(service, format!("token-{i}").as_bytes(), *expires_at)
            .await
            .expect("seed token");
    }
}

/// Assert that a [`RepositoryResult`](crate::RepositoryResult) failed with
/// the given [`RepositoryError`](crate::RepositoryError) variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use fleetauth_storage::{assert_repository_error, RepositoryError, RepositoryResult};
///
/// let result: RepositoryResult<()> = Err(RepositoryError::DeleteFailed { entity: "token" });
/// assert_repository_error!(result, DeleteFailed);
/// ```
#[macro_export]
macro_rules! assert_repository_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::RepositoryError::$variant { .. })),
            "expected RepositoryError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::{RepositoryError, RepositoryResult};

    #[tokio::test]
    async fn test_seeding_helpers_write_rows() {
        let (repo, backend) = memory_repository();
        seed_service(&repo, "svc").await;

        let later = Utc::now() + ChronoDuration::hours(1);
        seed_certificates(&repo, "svc", &[later, later]).await;
        seed_tokens(&repo, "svc", &[later]).await;

        assert_eq!(backend.len(), 4);
    }

    #[test]
    fn test_assert_repository_error_macro() {
        let result: RepositoryResult<()> = Err(RepositoryError::WriteFailed { entity: "service" });
        assert_repository_error!(result, WriteFailed);
    }
}
