use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{
    cleanup::{CleanupSchedule, DEFAULT_CLEANUP_SCHEDULE, DEFAULT_CLEANUP_TIMEOUT},
    error::RepositoryResult,
};

/// Configuration for [`Repository`](super::Repository).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use fleetauth_storage::RepositoryConfig;
///
/// let config = RepositoryConfig::builder()
///     .cleanup_schedule("*/15 * * * *")
///     .cleanup_timeout(Duration::from_secs(30))
///     .build()?;
/// assert_eq!(config.cleanup_schedule(), "*/15 * * * *");
/// # Ok::<(), fleetauth_storage::RepositoryError>(())
/// ```
///
/// From a config file, durations use humantime notation:
///
/// ```toml
/// cleanup_schedule = "0 6 * * *"
/// cleanup_timeout = "5m"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Cron expression driving cleanup (default: `0 6 * * *`).
    #[serde(default = "default_cleanup_schedule")]
    pub(crate) cleanup_schedule: String,

    /// Budget for a single cleanup pass (default: 5 minutes).
    #[serde(with = "humantime_serde", default = "default_cleanup_timeout")]
    pub(crate) cleanup_timeout: Duration,
}

fn default_cleanup_schedule() -> String {
    DEFAULT_CLEANUP_SCHEDULE.to_owned()
}

fn default_cleanup_timeout() -> Duration {
    DEFAULT_CLEANUP_TIMEOUT
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self { cleanup_schedule: default_cleanup_schedule(), cleanup_timeout: default_cleanup_timeout() }
    }
}

#[bon::bon]
impl RepositoryConfig {
    /// Creates a new configuration, validating the schedule.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidSchedule`](super::RepositoryError::InvalidSchedule)
    /// if `cleanup_schedule` is not a valid cron expression.
    #[builder]
    pub fn new(
        #[builder(into, default = default_cleanup_schedule())] cleanup_schedule: String,
        #[builder(default = DEFAULT_CLEANUP_TIMEOUT)] cleanup_timeout: Duration,
    ) -> RepositoryResult<Self> {
        CleanupSchedule::parse(&cleanup_schedule)?;
        Ok(Self { cleanup_schedule, cleanup_timeout })
    }

    /// Returns the cleanup cron expression.
    #[must_use]
    pub fn cleanup_schedule(&self) -> &str {
        &self.cleanup_schedule
    }

    /// Returns the per-pass cleanup budget.
    #[must_use]
    pub fn cleanup_timeout(&self) -> Duration {
        self.cleanup_timeout
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::repository::RepositoryError;

    #[test]
    fn test_defaults() {
        let config = RepositoryConfig::builder().build().unwrap();
        assert_eq!(config.cleanup_schedule(), "0 6 * * *");
        assert_eq!(config.cleanup_timeout(), Duration::from_secs(300));

        let default = RepositoryConfig::default();
        assert_eq!(default.cleanup_schedule(), config.cleanup_schedule());
    }

    #[test]
    fn test_invalid_schedule_rejected() {
        let result = RepositoryConfig::builder().cleanup_schedule("not cron").build();
        assert!(matches!(result, Err(RepositoryError::InvalidSchedule { .. })));
    }

    #[test]
    fn test_deserialize_with_humantime() {
        let config: RepositoryConfig =
            serde_json::from_str(r#"{"cleanup_schedule":"*/5 * * * *","cleanup_timeout":"30s"}"#).unwrap();
        assert_eq!(config.cleanup_timeout(), Duration::from_secs(30));

        let config: RepositoryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.cleanup_schedule(), DEFAULT_CLEANUP_SCHEDULE);
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(serde_json::from_str::<RepositoryConfig>(r#"{"ttl":"1s"}"#).is_err());
    }
}
