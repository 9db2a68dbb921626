//! Storage for the fleet identity service.
//!
//! The crate has two layers: a byte-oriented [`StorageBackend`] abstraction,
//! and the [`Repository`] that maps services, certificates, challenges and
//! tokens onto it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Authorization / CA layer                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      Repository                             │
//! │   services │ certificates │ challenges │ tokens │ cleanup   │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   StorageBackend trait                      │
//! │     (get, set, compare_and_set, delete, prefix, txn)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                      MemoryBackend                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use fleetauth_storage::{MemoryBackend, Repository, RepositoryConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repo = Repository::new(Arc::new(MemoryBackend::new()), &RepositoryConfig::default())?;
//!
//!     repo.create_service("billing", b"-----BEGIN PUBLIC KEY-----...").await?;
//!     repo.create_challenge("billing", b"nonce", Utc::now() + Duration::minutes(5)).await?;
//!     assert_eq!(repo.get_challenge("billing").await?.challenge, b"nonce");
//!
//!     repo.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with repository factories, seeding helpers and
//!   assertion macros. Enable this in `[dev-dependencies]` for integration tests.
//! - **`failpoints`**: Compiles the `fail` injection points (`memory-before-commit`,
//!   `cleanup-before-sweep`).

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;
pub mod repository;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod transaction;
pub mod types;

pub use backend::StorageBackend;
pub use error::{BoxError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use repository::{
    CertificateRecord, ChallengeRecord, CleanupReport, CleanupSchedule, DEFAULT_CLEANUP_SCHEDULE,
    DEFAULT_CLEANUP_TIMEOUT, Repository, RepositoryConfig, RepositoryError, RepositoryResult,
    ServiceRecord, TokenRecord,
};
pub use transaction::Transaction;
pub use types::KeyValue;
