//! Service configuration.
//!
//! Every config type deserializes with serde (durations in humantime
//! notation, unknown fields rejected) and has a `bon` builder. Both paths
//! validate, so a `CaConfig` or `AuthzConfig` value is always valid.
//! Defaults:
//!
//! | Setting | Default |
//! |---------|---------|
//! | `CaConfig::root_validity_months` | 24 |
//! | `CaConfig::certificate_validity_months` | 12 |
//! | `CaConfig::certificate_limit` | 2 |
//! | `AuthzConfig::challenge_expiry` | 10m |
//! | `AuthzConfig::token_expiry` | 1h |
//! | `AuthzConfig::challenge_size` | 64 bytes |
//! | `LoggingConfig::level` | `info` |
//!
//! Repository settings live in [`RepositoryConfig`].
//!
//! # Example
//!
//! ```toml
//! [authz]
//! name = "authz.internal"
//! challenge_expiry = "5m"
//! token_expiry = "30m"
//!
//! [authz.ca]
//! certificate_limit = 3
//!
//! [logging]
//! format = "json"
//! ```

use std::time::Duration;

pub use fleetauth_storage::RepositoryConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default common name of a self-signed root.
pub const DEFAULT_CA_NAME: &str = "fleetauth-root-ca";
/// Default validity of a self-signed root, in months.
pub const DEFAULT_ROOT_VALIDITY_MONTHS: u32 = 24;
/// Default validity of issued certificates, in months.
pub const DEFAULT_CERTIFICATE_VALIDITY_MONTHS: u32 = 12;
/// Default cap on simultaneously live certificates per service.
pub const DEFAULT_CERTIFICATE_LIMIT: usize = 2;
/// Default lifetime of a login challenge.
pub const DEFAULT_CHALLENGE_EXPIRY: Duration = Duration::from_secs(10 * 60);
/// Default lifetime of an issued token.
pub const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(60 * 60);
/// Default number of random bytes in a challenge.
pub const DEFAULT_CHALLENGE_SIZE: usize = 64;
/// Smallest accepted challenge size.
pub const MIN_CHALLENGE_SIZE: usize = 16;

/// Configuration validation errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric value is below its minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// Offending field.
        field: &'static str,
        /// Minimum accepted value.
        min: String,
        /// Rejected value.
        value: String,
    },

    /// A duration is zero.
    #[error("{field} must be positive, got {value}")]
    MustBePositive {
        /// Offending field.
        field: &'static str,
        /// Rejected value.
        value: String,
    },

    /// A required string is empty.
    #[error("{field} must not be empty")]
    Empty {
        /// Offending field.
        field: &'static str,
    },

    /// The log level is not a valid filter directive.
    #[error("invalid log filter '{value}'")]
    InvalidFilter {
        /// Rejected directive.
        value: String,
        /// Parser error.
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    /// A global subscriber was already installed.
    #[error("failed to install log subscriber")]
    LoggingInit(#[source] tracing_subscriber::util::TryInitError),
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Empty { field });
    }
    Ok(())
}

fn require_at_least<T: PartialOrd + ToString>(field: &'static str, value: T, min: T) -> Result<(), ConfigError> {
    if value < min {
        return Err(ConfigError::BelowMinimum { field, min: min.to_string(), value: value.to_string() });
    }
    Ok(())
}

fn require_positive(field: &'static str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::MustBePositive { field, value: "0s".into() });
    }
    Ok(())
}

// ─── CaConfig ──────────────────────────────────────────────────────────────

/// Certificate Authority settings.
///
/// ```
/// use fleetauth_authority::CaConfig;
///
/// let config = CaConfig::builder()
///     .name("root.internal")
///     .intermediate_services(vec!["authz.internal".to_owned()])
///     .build()?;
/// assert!(config.may_issue_ca("authz.internal"));
/// assert!(!config.may_issue_ca("billing"));
/// # Ok::<(), fleetauth_authority::ConfigError>(())
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "CaConfigFile")]
pub struct CaConfig {
    /// Common name of the self-signed root.
    pub(crate) name: String,
    /// Root certificate validity in months.
    pub(crate) root_validity_months: u32,
    /// Issued certificate validity in months.
    pub(crate) certificate_validity_months: u32,
    /// Live certificates a service may hold at once.
    pub(crate) certificate_limit: usize,
    /// Services allowed to receive CA certificates (intermediates).
    pub(crate) intermediate_services: Vec<String>,
}

/// `CaConfig` as written in a config file, before validation.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CaConfigFile {
    #[serde(default = "default_ca_name")]
    name: String,
    #[serde(default = "default_root_validity_months")]
    root_validity_months: u32,
    #[serde(default = "default_certificate_validity_months")]
    certificate_validity_months: u32,
    #[serde(default = "default_certificate_limit")]
    certificate_limit: usize,
    #[serde(default)]
    intermediate_services: Vec<String>,
}

impl TryFrom<CaConfigFile> for CaConfig {
    type Error = ConfigError;

    fn try_from(file: CaConfigFile) -> Result<Self, Self::Error> {
        Self::builder()
            .name(file.name)
            .root_validity_months(file.root_validity_months)
            .certificate_validity_months(file.certificate_validity_months)
            .certificate_limit(file.certificate_limit)
            .intermediate_services(file.intermediate_services)
            .build()
    }
}

fn default_ca_name() -> String {
    DEFAULT_CA_NAME.to_owned()
}

fn default_root_validity_months() -> u32 {
    DEFAULT_ROOT_VALIDITY_MONTHS
}

fn default_certificate_validity_months() -> u32 {
    DEFAULT_CERTIFICATE_VALIDITY_MONTHS
}

fn default_certificate_limit() -> usize {
    DEFAULT_CERTIFICATE_LIMIT
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            name: default_ca_name(),
            root_validity_months: DEFAULT_ROOT_VALIDITY_MONTHS,
            certificate_validity_months: DEFAULT_CERTIFICATE_VALIDITY_MONTHS,
            certificate_limit: DEFAULT_CERTIFICATE_LIMIT,
            intermediate_services: Vec::new(),
        }
    }
}

#[bon::bon]
impl CaConfig {
    /// Creates a validated CA configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `name` is empty or any count is zero.
    #[builder]
    pub fn new(
        #[builder(into, default = default_ca_name())] name: String,
        #[builder(default = DEFAULT_ROOT_VALIDITY_MONTHS)] root_validity_months: u32,
        #[builder(default = DEFAULT_CERTIFICATE_VALIDITY_MONTHS)] certificate_validity_months: u32,
        #[builder(default = DEFAULT_CERTIFICATE_LIMIT)] certificate_limit: usize,
        #[builder(default)] intermediate_services: Vec<String>,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            name,
            root_validity_months,
            certificate_validity_months,
            certificate_limit,
            intermediate_services,
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration. Construction already does this.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `name` is empty or any count is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("name", &self.name)?;
        require_at_least("root_validity_months", self.root_validity_months, 1)?;
        require_at_least("certificate_validity_months", self.certificate_validity_months, 1)?;
        require_at_least("certificate_limit", self.certificate_limit, 1)?;
        Ok(())
    }

    /// Root common name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Root validity in months.
    #[must_use]
    pub fn root_validity_months(&self) -> u32 {
        self.root_validity_months
    }

    /// Issued certificate validity in months.
    #[must_use]
    pub fn certificate_validity_months(&self) -> u32 {
        self.certificate_validity_months
    }

    /// Live certificate cap per service.
    #[must_use]
    pub fn certificate_limit(&self) -> usize {
        self.certificate_limit
    }

    /// Whether `service` may be issued a CA certificate.
    #[must_use]
    pub fn may_issue_ca(&self, service: &str) -> bool {
        self.intermediate_services.iter().any(|s| s == service)
    }
}

// ─── AuthzConfig ───────────────────────────────────────────────────────────

/// Authorization service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "AuthzConfigFile")]
pub struct AuthzConfig {
    /// Service name: certificate common name and token issuer.
    pub(crate) name: String,
    #[serde(with = "humantime_serde")]
    pub(crate) challenge_expiry: Duration,
    #[serde(with = "humantime_serde")]
    pub(crate) token_expiry: Duration,
    pub(crate) challenge_size: usize,
    /// Issuance policy for certificates this service signs. `name` and
    /// `root_validity_months` are unused here.
    pub(crate) ca: CaConfig,
}

/// `AuthzConfig` as written in a config file, before validation.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct AuthzConfigFile {
    name: String,
    #[serde(with = "humantime_serde", default = "default_challenge_expiry")]
    challenge_expiry: Duration,
    #[serde(with = "humantime_serde", default = "default_token_expiry")]
    token_expiry: Duration,
    #[serde(default = "default_challenge_size")]
    challenge_size: usize,
    #[serde(default)]
    ca: CaConfig,
}

impl TryFrom<AuthzConfigFile> for AuthzConfig {
    type Error = ConfigError;

    fn try_from(file: AuthzConfigFile) -> Result<Self, Self::Error> {
        Self::builder()
            .name(file.name)
            .challenge_expiry(file.challenge_expiry)
            .token_expiry(file.token_expiry)
            .challenge_size(file.challenge_size)
            .ca(file.ca)
            .build()
    }
}

fn default_challenge_expiry() -> Duration {
    DEFAULT_CHALLENGE_EXPIRY
}

fn default_token_expiry() -> Duration {
    DEFAULT_TOKEN_EXPIRY
}

fn default_challenge_size() -> usize {
    DEFAULT_CHALLENGE_SIZE
}

#[bon::bon]
impl AuthzConfig {
    /// Creates a validated Authorization configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `name` is empty, an expiry is zero, or
    /// `challenge_size` is below [`MIN_CHALLENGE_SIZE`].
    #[builder]
    pub fn new(
        #[builder(into)] name: String,
        #[builder(default = DEFAULT_CHALLENGE_EXPIRY)] challenge_expiry: Duration,
        #[builder(default = DEFAULT_TOKEN_EXPIRY)] token_expiry: Duration,
        #[builder(default = DEFAULT_CHALLENGE_SIZE)] challenge_size: usize,
        #[builder(default)] ca: CaConfig,
    ) -> Result<Self, ConfigError> {
        let config = Self { name, challenge_expiry, token_expiry, challenge_size, ca };
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration. Construction already does this.
    ///
    /// # Errors
    ///
    /// See [`AuthzConfig::builder`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("name", &self.name)?;
        require_positive("challenge_expiry", self.challenge_expiry)?;
        require_positive("token_expiry", self.token_expiry)?;
        require_at_least("challenge_size", self.challenge_size, MIN_CHALLENGE_SIZE)?;
        self.ca.validate()
    }

    /// Service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Challenge lifetime.
    #[must_use]
    pub fn challenge_expiry(&self) -> Duration {
        self.challenge_expiry
    }

    /// Token lifetime.
    #[must_use]
    pub fn token_expiry(&self) -> Duration {
        self.token_expiry
    }

    /// Challenge size in bytes.
    #[must_use]
    pub fn challenge_size(&self) -> usize {
        self.challenge_size
    }

    /// Issuance policy for the embedded CA.
    #[must_use]
    pub fn ca(&self) -> &CaConfig {
        &self.ca
    }
}

// ─── LoggingConfig ─────────────────────────────────────────────────────────

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Logging settings, consumed by [`logging::init`](crate::logging::init).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_level")]
    #[builder(into, default = default_level())]
    pub level: String,

    /// Output format.
    #[serde(default)]
    #[builder(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_owned()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_level(), format: LogFormat::Text }
    }
}
