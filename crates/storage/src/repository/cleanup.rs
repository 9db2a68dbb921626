//! Scheduled removal of expired rows.
//!
//! A single background task per [`Repository`](super::Repository) sleeps
//! until the next cron tick, then sweeps every expiring table:
//!
//! ```text
//!   ┌──────────────┐  next tick   ┌─────────────────┐  timeout  ┌────────────┐
//!   │ wait (sleep) │─────────────►│ sweep(now)      │──────────►│ log report │──┐
//!   └──────▲───────┘              │ certs/chal/toks │           └────────────┘  │
//!          │                      └─────────────────┘                           │
//!          └────────────────────────────────────────────────────────────────────┘
//!   shutdown signal exits from either wait or sweep
//! ```
//!
//! Schedules use the five-field cron form (`min hour dom mon dow`), evaluated
//! in UTC. A six- or seven-field expression with seconds is accepted as is.

use std::{str::FromStr, time::Duration};

use chrono::{DateTime, Utc};
use fail::fail_point;
use tokio::{runtime::Handle, select, sync::watch, task::JoinHandle, time::sleep};

use super::{
    error::{RepositoryError, RepositoryResult},
    records::{EXPIRING_TABLES, ExpiryOnly},
};
use crate::{backend::StorageBackend, error::StorageError};

/// Default schedule: daily at 06:00 UTC.
pub const DEFAULT_CLEANUP_SCHEDULE: &str = "0 6 * * *";

/// Default budget for a single cleanup pass.
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// A parsed cleanup schedule.
#[derive(Debug, Clone)]
pub struct CleanupSchedule {
    expression: String,
    schedule: cron::Schedule,
}

impl CleanupSchedule {
    /// Parses a cron expression.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidSchedule`] if the expression is not
    /// valid cron.
    pub fn parse(expression: &str) -> RepositoryResult<Self> {
        let fields = expression.split_whitespace().count();
        let normalized = if fields == 5 { format!("0 {expression}") } else { expression.to_owned() };

        let schedule = cron::Schedule::from_str(&normalized).map_err(|source| {
            RepositoryError::InvalidSchedule { expression: expression.to_owned(), source }
        })?;

        Ok(Self { expression: expression.to_owned(), schedule })
    }

    /// The expression as written.
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The first tick strictly after `now`.
    #[must_use]
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }
}

/// Rows removed by one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Expired certificates removed.
    pub certificates: u64,
    /// Expired challenges removed.
    pub challenges: u64,
    /// Expired tokens removed.
    pub tokens: u64,
    /// Expired rows left in place because they changed between scan and
    /// delete.
    pub skipped: u64,
}

impl CleanupReport {
    /// Total rows removed. Skipped rows are not counted.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.certificates + self.challenges + self.tokens
    }

    fn add(&mut self, table: &str, removed: u64) {
        match table {
            super::records::CERTIFICATES => self.certificates += removed,
            super::records::CHALLENGES => self.challenges += removed,
            _ => self.tokens += removed,
        }
    }
}

/// Deletes every row in the expiring tables whose expiry is at or before
/// `now`. Rows that cannot be decoded are left alone and logged.
///
/// Each delete is conditional on the row still holding the scanned bytes, so
/// a row rewritten after the scan (a fresh challenge under a reused key) is
/// counted as skipped instead of removed.
pub(crate) async fn sweep(
    backend: &dyn StorageBackend,
    now: DateTime<Utc>,
) -> RepositoryResult<CleanupReport> {
    fail_point!("cleanup-before-sweep", |_| {
        Err(RepositoryError::Storage(StorageError::internal("injected failure before cleanup sweep")))
    });

    let mut report = CleanupReport::default();

    for table in EXPIRING_TABLES {
        for row in backend.get_prefix(table.as_bytes()).await? {
            let expiry = match serde_json::from_slice::<ExpiryOnly>(&row.value) {
                Ok(expiry) => expiry.expires_at,
                Err(error) => {
                    tracing::warn!(
                        key = %String::from_utf8_lossy(&row.key),
                        %error,
                        "skipping undecodable row during cleanup"
                    );
                    continue;
                },
            };

            if expiry > now {
                continue;
            }

            let mut txn = backend.transaction().await?;
            txn.compare_and_delete(row.key.to_vec(), row.value.to_vec());
            match txn.commit().await {
                Ok(()) => report.add(table, 1),
                Err(StorageError::Conflict) => {
                    tracing::debug!(
                        key = %String::from_utf8_lossy(&row.key),
                        "row changed since scan; leaving it"
                    );
                    report.skipped += 1;
                },
                Err(error) => return Err(error.into()),
            }
        }
    }

    Ok(report)
}

/// Runs [`sweep`] within `limit`.
pub(crate) async fn sweep_with_timeout(
    backend: &dyn StorageBackend,
    limit: Duration,
) -> RepositoryResult<CleanupReport> {
    match tokio::time::timeout(limit, sweep(backend, Utc::now())).await {
        Ok(result) => result,
        Err(_) => Err(RepositoryError::Timeout { limit }),
    }
}

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // Best-effort; the task may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}

/// Handle to a running cleanup task.
pub(crate) struct CleanupTask {
    shutdown: ShutdownGuard,
    handle: JoinHandle<()>,
}

impl CleanupTask {
    /// Spawns the cleanup loop on the current runtime.
    ///
    /// Fails with [`RepositoryError::NoRuntime`] when called outside one.
    pub(crate) fn spawn(
        backend: std::sync::Arc<dyn StorageBackend>,
        schedule: CleanupSchedule,
        timeout: Duration,
    ) -> RepositoryResult<Self> {
        let runtime = Handle::try_current().map_err(|_| RepositoryError::NoRuntime)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let handle = runtime.spawn(run(backend, schedule, timeout, shutdown_rx));
        Ok(Self { shutdown: ShutdownGuard { shutdown_tx }, handle })
    }

    /// Signals the loop and waits for it to finish.
    pub(crate) async fn stop(self) {
        let Self { shutdown, handle } = self;
        drop(shutdown);
        if let Err(error) = handle.await {
            tracing::error!(%error, "cleanup task ended abnormally");
        }
    }
}

#[tracing::instrument(name = "cleanup_loop", skip_all, fields(schedule = %schedule.expression()))]
async fn run(
    backend: std::sync::Arc<dyn StorageBackend>,
    schedule: CleanupSchedule,
    timeout: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        let now = Utc::now();
        let Some(next) = schedule.next_after(now) else {
            tracing::warn!("cleanup schedule has no upcoming runs; stopping");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();

        select! {
            _ = sleep(wait) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        select! {
            result = sweep_with_timeout(backend.as_ref(), timeout) => match result {
                Ok(report) => tracing::info!(
                    certificates = report.certificates,
                    challenges = report.challenges,
                    tokens = report.tokens,
                    skipped = report.skipped,
                    "removed expired rows"
                ),
                Err(error) => tracing::error!(%error, "cleanup pass failed"),
            },
            _ = shutdown_rx.changed() => {
                return;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::{TimeZone, Timelike};

    use super::*;

    #[test]
    fn test_five_field_expression_is_normalized() {
        let schedule = CleanupSchedule::parse("0 6 * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap();

        let next = schedule.next_after(now).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 3, 2, 6, 0, 0).unwrap());
        assert_eq!(schedule.expression(), "0 6 * * *");
    }

    #[test]
    fn test_six_field_expression_is_kept() {
        let schedule = CleanupSchedule::parse("30 */5 * * * *").unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 7, 1, 0).unwrap();

        let next = schedule.next_after(now).unwrap();
        assert_eq!((next.minute(), next.second()), (5, 30));
    }

    #[test]
    fn test_invalid_expression_rejected() {
        let err = CleanupSchedule::parse("every day at six").unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidSchedule { .. }));
        assert_eq!(err.to_string(), "invalid cleanup schedule 'every day at six'");
    }

    #[test]
    fn test_report_total() {
        let report = CleanupReport { certificates: 1, challenges: 2, tokens: 3, skipped: 4 };
        assert_eq!(report.total(), 6);
    }
}
