//! # Fleet Auth PKI
//!
//! Cryptographic building blocks for service identities.
//!
//! This crate provides:
//! - **Keys**: P-521 key generation, PEM encoding, SHA-512 ECDSA signatures in fixed-width `r || s`
//!   form
//! - **Certificates**: signing-request descriptors, issuance from a template, self-signed roots,
//!   and chain verification against a root or a set of trusted intermediates
//! - **Tokens**: `ES512` compact bearer tokens binding a service to the authority that issued them
//! - **Algorithm validation**: only `ES512` is accepted; `none` and HMAC variants are rejected
//!   outright
//!
//! ## Example
//!
//! ```
//! use fleetauth_pki::{
//!     certificate::{self, CertificateRequest, CertificateTemplate, Subject},
//!     keys::PrivateKey,
//! };
//!
//! let root_key = PrivateKey::generate()?;
//! let root = certificate::self_sign(&CertificateTemplate::root(Subject::with_common_name("root")), &root_key)?;
//!
//! let service_key = PrivateKey::generate()?;
//! let request = CertificateRequest::build("svc-a", service_key.public_key()?, None);
//! let (template, public) = request.into_template(12);
//! let leaf = certificate::issue(&template, &root, &public, &root_key)?;
//!
//! let chain = certificate::verify(&leaf.to_pem()?, Some(&root), &[])?;
//! assert_eq!(chain.len(), 2);
//! # Ok::<(), fleetauth_pki::PkiError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// X.509 certificates.
pub mod certificate;
/// Key, certificate and token error types.
pub mod error;
/// P-521 keys and signatures.
pub mod keys;
/// Shared test utilities.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
/// Signed bearer tokens.
pub mod token;
/// Algorithm validation.
pub mod validation;

pub use certificate::{Certificate, CertificateRequest, CertificateTemplate, SigningRequest, Subject};
pub use error::{PkiError, PkiResult};
pub use keys::{PrivateKey, PublicKey};
pub use token::{Token, TokenClaims};
pub use validation::{ACCEPTED_ALGORITHMS, FORBIDDEN_ALGORITHMS, validate_algorithm};
