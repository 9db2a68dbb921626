//! Per-operation observation.
//!
//! The services report every public operation through the narrow
//! [`Metrics`] capability: operation name, latency and outcome. Exporting
//! those observations is left to the implementation.
//!
//! - [`NoopMetrics`] discards everything and is the default.
//! - [`InMemoryMetrics`] aggregates counts and latency per operation and
//!   outcome, for tests and simple introspection.
//!
//! # Usage
//!
//! ```
//! use std::time::Duration;
//! use fleetauth_authority::metrics::{InMemoryMetrics, Metrics, Outcome};
//!
//! let metrics = InMemoryMetrics::new();
//! metrics.observe("login", Duration::from_micros(250), Outcome::Success);
//!
//! let snapshot = metrics.snapshot();
//! assert_eq!(snapshot.count("login", Outcome::Success), 1);
//! ```

use std::{
    collections::BTreeMap,
    fmt,
    time::{Duration, Instant},
};

use parking_lot::Mutex;

use crate::error::{ServiceResult, Status};

/// How an operation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Outcome {
    /// The operation returned a response.
    Success,
    /// The operation failed with the given status.
    Failure(Status),
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("ok"),
            Self::Failure(status) => write!(f, "{status}"),
        }
    }
}

/// Sink for operation observations.
pub trait Metrics: Send + Sync {
    /// Records one finished operation.
    fn observe(&self, operation: &'static str, elapsed: Duration, outcome: Outcome);
}

/// Discards all observations.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl Metrics for NoopMetrics {
    fn observe(&self, _operation: &'static str, _elapsed: Duration, _outcome: Outcome) {}
}

/// Aggregated observations for one operation and outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    /// Number of calls.
    pub count: u64,
    /// Sum of latencies.
    pub total: Duration,
    /// Slowest call.
    pub max: Duration,
}

impl Observation {
    /// Mean latency, or zero when nothing was recorded.
    #[must_use]
    pub fn mean(&self) -> Duration {
        u32::try_from(self.count)
            .ok()
            .filter(|&n| n > 0)
            .map_or(Duration::ZERO, |n| self.total / n)
    }
}

/// Point-in-time copy of [`InMemoryMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    entries: BTreeMap<(&'static str, Outcome), Observation>,
}

impl MetricsSnapshot {
    /// Calls of `operation` that ended with `outcome`.
    #[must_use]
    pub fn count(&self, operation: &str, outcome: Outcome) -> u64 {
        self.get(operation, outcome).map_or(0, |o| o.count)
    }

    /// Calls of `operation`, any outcome.
    #[must_use]
    pub fn total(&self, operation: &str) -> u64 {
        self.entries.iter().filter(|((op, _), _)| *op == operation).map(|(_, o)| o.count).sum()
    }

    /// Aggregate for `operation` and `outcome`.
    #[must_use]
    pub fn get(&self, operation: &str, outcome: Outcome) -> Option<&Observation> {
        self.entries.iter().find(|((op, out), _)| *op == operation && *out == outcome).map(|(_, o)| o)
    }

    /// Iterates over all aggregates in operation order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Outcome, &Observation)> {
        self.entries.iter().map(|((op, out), o)| (*op, *out, o))
    }
}

/// Aggregates observations in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    entries: Mutex<BTreeMap<(&'static str, Outcome), Observation>>,
}

impl InMemoryMetrics {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies the current aggregates.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot { entries: self.entries.lock().clone() }
    }

    /// Clears all aggregates.
    pub fn reset(&self) {
        self.entries.lock().clear();
    }
}

impl Metrics for InMemoryMetrics {
    fn observe(&self, operation: &'static str, elapsed: Duration, outcome: Outcome) {
        let mut entries = self.entries.lock();
        let entry = entries.entry((operation, outcome)).or_default();
        entry.count += 1;
        entry.total += elapsed;
        entry.max = entry.max.max(elapsed);
    }
}

/// Runs one service operation, logging a failure and recording its latency
/// and outcome.
pub(crate) async fn track<T>(
    metrics: &dyn Metrics,
    operation: &'static str,
    call: impl Future<Output = ServiceResult<T>>,
) -> ServiceResult<T> {
    let started = Instant::now();
    let result = call.await;
    let outcome = match &result {
        Ok(_) => Outcome::Success,
        Err(err) => {
            let status = err.status();
            if status == Status::Internal {
                tracing::error!(
                    operation,
                    error = %err,
                    cause = ?std::error::Error::source(err),
                    "operation failed"
                );
            } else {
                tracing::warn!(operation, %status, error = %err, "operation rejected");
            }
            Outcome::Failure(status)
        },
    };
    metrics.observe(operation, started.elapsed(), outcome);
    result
}
