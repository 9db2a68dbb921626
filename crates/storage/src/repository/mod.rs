//! Persistence for services, certificates, challenges and tokens.
//!
//! [`Repository`] maps the identity tables onto any [`StorageBackend`]. It
//! owns a background task that removes expired rows on a cron schedule; see
//! [`cleanup`] for the loop and [`records`] for the key layout.
//!
//! # Row-count discipline
//!
//! Every mutation must affect exactly one row:
//!
//! | Operation | Zero or many rows |
//! |-----------|-------------------|
//! | `create_*` | [`RepositoryError::WriteFailed`] |
//! | `delete_*` | [`RepositoryError::DeleteFailed`] |
//!
//! Inserts are insert-if-absent and are conditioned on the owning service
//! row being unchanged, so a row can never be created for a service that
//! was deleted concurrently.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use fleetauth_storage::{MemoryBackend, Repository, RepositoryConfig};
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let repo = Repository::new(Arc::new(MemoryBackend::new()), &RepositoryConfig::default())?;
//!
//! repo.create_service("svc-a", b"-----BEGIN PUBLIC KEY-----...").await?;
//! repo.create_token("svc-a", b"token", Utc::now() + Duration::hours(1)).await?;
//! assert_eq!(repo.list_tokens("svc-a").await?.len(), 1);
//!
//! repo.close().await;
//! # Ok::<(), fleetauth_storage::RepositoryError>(())
//! # }).unwrap();
//! ```

pub mod cleanup;
mod config;
mod error;
pub mod records;

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;

pub use self::{
    cleanup::{CleanupReport, CleanupSchedule, DEFAULT_CLEANUP_SCHEDULE, DEFAULT_CLEANUP_TIMEOUT},
    config::RepositoryConfig,
    error::{RepositoryError, RepositoryResult},
    records::{CertificateRecord, ChallengeRecord, ServiceRecord, TokenRecord},
};
use self::{
    cleanup::CleanupTask,
    records::{
        CERTIFICATES, Expiring, TOKENS, challenge_key, new_row_id, owned_key, owned_prefix,
        service_key,
    },
};
use crate::{backend::StorageBackend, error::StorageError};

const SERVICE: &str = "service";
const CERTIFICATE: &str = "certificate";
const CHALLENGE: &str = "challenge";
const TOKEN: &str = "token";

/// Identity tables over a [`StorageBackend`], with scheduled expiry cleanup.
///
/// Construction spawns the cleanup task on the current Tokio runtime. Call
/// [`close`](Self::close) to stop it and wait for it; dropping the
/// repository also signals it to stop.
pub struct Repository {
    backend: Arc<dyn StorageBackend>,
    cleanup_timeout: Duration,
    cleanup: Mutex<Option<CleanupTask>>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("cleanup_timeout", &self.cleanup_timeout)
            .field("cleanup_running", &self.cleanup.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Creates a repository and starts its cleanup task.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::InvalidSchedule`] if the configured cleanup
    ///   schedule does not parse
    /// - [`RepositoryError::NoRuntime`] when called outside a Tokio runtime
    pub fn new(backend: Arc<dyn StorageBackend>, config: &RepositoryConfig) -> RepositoryResult<Self> {
        let schedule = CleanupSchedule::parse(config.cleanup_schedule())?;
        let task = CleanupTask::spawn(Arc::clone(&backend), schedule, config.cleanup_timeout())?;

        Ok(Self {
            backend,
            cleanup_timeout: config.cleanup_timeout(),
            cleanup: Mutex::new(Some(task)),
        })
    }

    /// Stops the cleanup task and waits for it to exit.
    ///
    /// Idempotent. The repository stays usable for reads and writes.
    pub async fn close(&self) {
        let task = self.cleanup.lock().take();
        if let Some(task) = task {
            task.stop().await;
            tracing::debug!("cleanup task stopped");
        }
    }

    /// Runs one cleanup pass now, within the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Timeout`] if the pass overruns and
    /// [`RepositoryError::Storage`] on backend failures.
    #[tracing::instrument(skip(self))]
    pub async fn cleanup_expired(&self) -> RepositoryResult<CleanupReport> {
        cleanup::sweep_with_timeout(self.backend.as_ref(), self.cleanup_timeout).await
    }

    // ---------------------------------------------------------------------
    // services
    // ---------------------------------------------------------------------

    /// Looks up a service.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] for unknown services.
    #[tracing::instrument(skip(self))]
    pub async fn get_service(&self, name: &str) -> RepositoryResult<ServiceRecord> {
        let (record, _) = self.load_service(name).await?;
        Ok(record)
    }

    /// Registers a service with its public key.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::WriteFailed`] if the service already exists.
    #[tracing::instrument(skip(self, public_key))]
    pub async fn create_service(&self, name: &str, public_key: &[u8]) -> RepositoryResult<()> {
        let record = ServiceRecord { name: name.to_owned(), public_key: public_key.to_vec() };
        let value = serde_json::to_vec(&record)?;

        self.backend
            .compare_and_set(&service_key(name), None, value)
            .await
            .map_err(|e| write_error(SERVICE, e))
    }

    /// Removes a service along with all of its certificates, its challenge
    /// and its tokens, atomically.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::NotFound`] for unknown services
    /// - [`RepositoryError::DeleteFailed`] if the service row changed or vanished concurrently
    #[tracing::instrument(skip(self))]
    pub async fn delete_service(&self, name: &str) -> RepositoryResult<()> {
        let (_, raw) = self.load_service(name).await?;

        let mut txn = self.backend.transaction().await?;
        txn.compare_and_delete(service_key(name), raw);
        txn.delete(challenge_key(name));

        let mut cascaded = 0usize;
        for table in [CERTIFICATES, TOKENS] {
            for row in self.backend.get_prefix(&owned_prefix(table, name)).await? {
                txn.delete(row.key.to_vec());
                cascaded += 1;
            }
        }

        txn.commit().await.map_err(|e| delete_error(SERVICE, e))?;
        tracing::debug!(cascaded, "service removed");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // certificates
    // ---------------------------------------------------------------------

    /// Lists a service's unexpired certificates, latest expiry first.
    ///
    /// Returns an empty list when the service has none.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] on backend or decoding failures.
    #[tracing::instrument(skip(self))]
    pub async fn list_certificates(&self, service: &str) -> RepositoryResult<Vec<CertificateRecord>> {
        self.list_live(CERTIFICATES, service).await
    }

    /// Stores a certificate for an existing service.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::NotFound`] for unknown services
    /// - [`RepositoryError::WriteFailed`] if the row could not be inserted
    #[tracing::instrument(skip(self, certificate))]
    pub async fn create_certificate(
        &self,
        service: &str,
        certificate: &[u8],
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<CertificateRecord> {
        let record = CertificateRecord {
            id: new_row_id(),
            service: service.to_owned(),
            certificate: certificate.to_vec(),
            expires_at,
        };
        let key = owned_key(CERTIFICATES, service, &record.id);
        self.insert_owned(CERTIFICATE, service, key, serde_json::to_vec(&record)?).await?;
        Ok(record)
    }

    /// Removes the row holding exactly `certificate`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DeleteFailed`] unless exactly one row was
    /// removed.
    #[tracing::instrument(skip(self, certificate))]
    pub async fn delete_certificate(&self, service: &str, certificate: &[u8]) -> RepositoryResult<()> {
        self.delete_matching::<CertificateRecord>(CERTIFICATE, CERTIFICATES, service, |r| {
            r.certificate == certificate
        })
        .await
    }

    // ---------------------------------------------------------------------
    // challenges
    // ---------------------------------------------------------------------

    /// Returns a service's challenge, expired or not.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] when there is none.
    #[tracing::instrument(skip(self))]
    pub async fn get_challenge(&self, service: &str) -> RepositoryResult<ChallengeRecord> {
        match self.backend.get(&challenge_key(service)).await? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Err(RepositoryError::not_found(CHALLENGE, service)),
        }
    }

    /// Stores a service's challenge. A service holds at most one.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::NotFound`] for unknown services
    /// - [`RepositoryError::WriteFailed`] if a challenge already exists
    #[tracing::instrument(skip(self, challenge))]
    pub async fn create_challenge(
        &self,
        service: &str,
        challenge: &[u8],
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<ChallengeRecord> {
        let record = ChallengeRecord {
            service: service.to_owned(),
            challenge: challenge.to_vec(),
            expires_at,
        };
        self.insert_owned(CHALLENGE, service, challenge_key(service), serde_json::to_vec(&record)?)
            .await?;
        Ok(record)
    }

    /// Removes a service's challenge.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DeleteFailed`] when there was none.
    #[tracing::instrument(skip(self))]
    pub async fn delete_challenge(&self, service: &str) -> RepositoryResult<()> {
        let removed = self.backend.delete(&challenge_key(service)).await?;
        expect_one_removed(CHALLENGE, removed)
    }

    // ---------------------------------------------------------------------
    // tokens
    // ---------------------------------------------------------------------

    /// Lists a service's unexpired tokens, latest expiry first.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Storage`] on backend or decoding failures.
    #[tracing::instrument(skip(self))]
    pub async fn list_tokens(&self, service: &str) -> RepositoryResult<Vec<TokenRecord>> {
        self.list_live(TOKENS, service).await
    }

    /// Stores an issued token.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::NotFound`] for unknown services
    /// - [`RepositoryError::WriteFailed`] if the row could not be inserted
    #[tracing::instrument(skip(self, token))]
    pub async fn create_token(
        &self,
        service: &str,
        token: &[u8],
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<TokenRecord> {
        let record = TokenRecord {
            id: new_row_id(),
            service: service.to_owned(),
            token: token.to_vec(),
            expires_at,
        };
        let key = owned_key(TOKENS, service, &record.id);
        self.insert_owned(TOKEN, service, key, serde_json::to_vec(&record)?).await?;
        Ok(record)
    }

    /// Removes the row holding exactly `token`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::DeleteFailed`] unless exactly one row was
    /// removed.
    #[tracing::instrument(skip(self, token))]
    pub async fn delete_token(&self, service: &str, token: &[u8]) -> RepositoryResult<()> {
        self.delete_matching::<TokenRecord>(TOKEN, TOKENS, service, |r| r.token == token).await
    }

    // ---------------------------------------------------------------------
    // helpers
    // ---------------------------------------------------------------------

    async fn load_service(&self, name: &str) -> RepositoryResult<(ServiceRecord, Vec<u8>)> {
        match self.backend.get(&service_key(name)).await? {
            Some(raw) => Ok((serde_json::from_slice(&raw)?, raw.to_vec())),
            None => Err(RepositoryError::not_found(SERVICE, name)),
        }
    }

    /// Inserts a row owned by `service`, conditioned on the service row
    /// being present and unchanged at commit.
    async fn insert_owned(
        &self,
        entity: &'static str,
        service: &str,
        key: Vec<u8>,
        value: Vec<u8>,
    ) -> RepositoryResult<()> {
        let (_, raw) = self.load_service(service).await?;

        let mut txn = self.backend.transaction().await?;
        txn.compare_and_set(service_key(service), Some(raw.clone()), raw);
        txn.compare_and_set(key, None, value);
        txn.commit().await.map_err(|e| write_error(entity, e))
    }

    async fn list_live<T>(&self, table: &str, service: &str) -> RepositoryResult<Vec<T>>
    where
        T: DeserializeOwned + Expiring,
    {
        let now = Utc::now();
        let mut rows = Vec::new();
        for row in self.backend.get_prefix(&owned_prefix(table, service)).await? {
            let record: T = serde_json::from_slice(&row.value)?;
            if record.is_live_at(now) {
                rows.push(record);
            }
        }
        rows.sort_by(|a, b| b.expires_at().cmp(&a.expires_at()));
        Ok(rows)
    }

    async fn delete_matching<T>(
        &self,
        entity: &'static str,
        table: &str,
        service: &str,
        matches: impl Fn(&T) -> bool,
    ) -> RepositoryResult<()>
    where
        T: DeserializeOwned,
    {
        let mut removed = 0;
        for row in self.backend.get_prefix(&owned_prefix(table, service)).await? {
            let record: T = serde_json::from_slice(&row.value)?;
            if matches(&record) {
                removed += self.backend.delete(&row.key).await?;
            }
        }
        expect_one_removed(entity, removed)
    }
}

fn write_error(entity: &'static str, err: StorageError) -> RepositoryError {
    match err {
        StorageError::Conflict => {
            tracing::warn!(entity, "write did not affect exactly one row");
            RepositoryError::WriteFailed { entity }
        },
        other => other.into(),
    }
}

fn delete_error(entity: &'static str, err: StorageError) -> RepositoryError {
    match err {
        StorageError::Conflict => {
            tracing::warn!(entity, "delete did not affect exactly one row");
            RepositoryError::DeleteFailed { entity }
        },
        other => other.into(),
    }
}

fn expect_one_removed(entity: &'static str, removed: u64) -> RepositoryResult<()> {
    if removed == 1 {
        Ok(())
    } else {
        tracing::warn!(entity, removed, "delete did not affect exactly one row");
        Err(RepositoryError::DeleteFailed { entity })
    }
}
