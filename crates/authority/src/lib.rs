//! # Fleet Auth Authority
//!
//! The Certificate Authority and Authorization services.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  transport (RPC / HTTP gateway, not part of this crate)  │
//! └───────────────┬──────────────────────────┬───────────────┘
//!                 │                          │
//!   ┌─────────────▼────────────┐  ┌──────────▼──────────────┐
//!   │  AuthorizationService    │  │  CertificateAuthority   │
//!   │  sign-up, login, tokens  │──▶  root, issuance, cap    │
//!   │  (embedded CA, own key)  │  │                         │
//!   └─────────────┬────────────┘  └──────────┬──────────────┘
//!                 │                          │
//!   ┌─────────────▼──────────────────────────▼──────────────┐
//!   │  fleetauth-pki (keys, certificates, tokens)           │
//!   │  fleetauth-storage (Repository over StorageBackend)   │
//!   └───────────────────────────────────────────────────────┘
//! ```
//!
//! The Authorization service enrolls with a CA at startup through the
//! [`CertificateIssuer`] trait and then acts as an intermediate: every
//! certificate it hands out chains through its own certificate to the CA
//! root, and its key also signs the bearer tokens it issues.
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fleetauth_authority::{
//!     AuthorizationService, AuthzConfig, CaConfig, CertificateAuthority, SigningIdentity,
//! };
//! use fleetauth_storage::{MemoryBackend, Repository, RepositoryConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let ca = CertificateAuthority::builder()
//!     .config(CaConfig::builder().intermediate_services(vec!["authz".to_owned()]).build()?)
//!     .repository(Arc::new(Repository::new(Arc::new(MemoryBackend::new()), &RepositoryConfig::default())?))
//!     .build()?;
//!
//! let identity = SigningIdentity::enroll(&ca, "authz").await?;
//! let authz = AuthorizationService::builder()
//!     .config(AuthzConfig::builder().name("authz").build()?)
//!     .identity(identity)
//!     .repository(Arc::new(Repository::new(Arc::new(MemoryBackend::new()), &RepositoryConfig::default())?))
//!     .build();
//! # let _ = authz;
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Every operation returns [`ServiceError`], whose [`status`](ServiceError::status)
//! tells a transport how to report it. Internal failures are logged where
//! they occur and hidden by [`ServiceError::public_message`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod authz;
pub mod ca;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod messages;
pub mod metrics;
pub mod random;

pub use authz::AuthorizationService;
pub use ca::{CertificateAuthority, CertificateIssuer};
pub use config::{AuthzConfig, CaConfig, ConfigError, LogFormat, LoggingConfig, RepositoryConfig};
pub use error::{Domain, ServiceError, ServiceResult, Status};
pub use identity::SigningIdentity;
pub use metrics::{InMemoryMetrics, Metrics, NoopMetrics, Outcome};
pub use random::{OsRandomizer, Randomizer};
