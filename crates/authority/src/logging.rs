//! Process-wide log subscriber setup.
//!
//! `RUST_LOG` takes precedence over [`LoggingConfig::level`] when set.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigError, LogFormat, LoggingConfig};

/// Builds the filter: `RUST_LOG` when present, the configured level otherwise.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidFilter`] if the configured level does not
/// parse.
pub fn filter(config: &LoggingConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|source| ConfigError::InvalidFilter { value: config.level.clone(), source })
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidFilter`] for a bad level and
/// [`ConfigError::LoggingInit`] if a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
    }
    .map_err(ConfigError::LoggingInit)
}
