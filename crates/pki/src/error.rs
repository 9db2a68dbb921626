//! Key, certificate and token error types.
//!
//! This module defines the errors produced by the cryptographic primitives in
//! this crate. Every variant names the subject it failed on so callers can map
//! it onto a request-level status without inspecting message strings.

use openssl::error::ErrorStack;
use thiserror::Error;

/// Result type alias for key, certificate and token operations.
pub type PkiResult<T> = Result<T, PkiError>;

/// Errors produced by key, certificate and token handling.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`: new variants may be added in
/// future minor releases without a semver-breaking change. Downstream match
/// expressions must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PkiError {
    /// Input could not be decoded as the expected PEM block or key type.
    #[error("Invalid encoding: {subject}")]
    InvalidEncoding {
        /// What was being decoded (e.g. "public key", "certificate").
        subject: &'static str,
        /// The underlying decoder error, when there is one.
        #[source]
        source: Option<ErrorStack>,
    },

    /// Signature did not verify against the given key and digest.
    #[error("Invalid signature")]
    InvalidSignature,

    /// No certificate bytes were supplied for verification.
    #[error("Nil certificate")]
    NilCertificate,

    /// Neither a root nor any intermediate was supplied for verification.
    #[error("No trust anchor")]
    NoTrustAnchor,

    /// The certificate chain could not be built or validated.
    #[error("Certificate chain verification failed: {reason}")]
    ChainVerification {
        /// Reason reported by the chain builder.
        reason: String,
    },

    /// Token is structurally valid but its signature does not match.
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// A required claim is missing or malformed.
    #[error("Invalid claim: {0}")]
    InvalidClaim(String),

    /// Token has expired.
    #[error("Token expired")]
    TokenExpired,

    /// Algorithm not in the accepted list.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The crypto backend failed while operating on well-formed input.
    #[error("Crypto backend error: {message}")]
    Crypto {
        /// Which operation failed.
        message: String,
        /// The OpenSSL error stack.
        #[source]
        source: ErrorStack,
    },
}

impl PkiError {
    /// Creates an `InvalidEncoding` error without a source.
    #[must_use]
    pub fn invalid_encoding(subject: &'static str) -> Self {
        Self::InvalidEncoding { subject, source: None }
    }

    /// Creates an `InvalidEncoding` error wrapping the decoder error.
    #[must_use]
    pub fn invalid_encoding_with_source(subject: &'static str, source: ErrorStack) -> Self {
        Self::InvalidEncoding { subject, source: Some(source) }
    }

    /// Creates an `InvalidToken` error.
    #[must_use]
    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::InvalidToken(message.into())
    }

    /// Creates an `InvalidClaim` error.
    #[must_use]
    pub fn invalid_claim(message: impl Into<String>) -> Self {
        Self::InvalidClaim(message.into())
    }

    /// Returns a closure that wraps an OpenSSL error stack for `map_err`.
    pub(crate) fn crypto(message: &'static str) -> impl FnOnce(ErrorStack) -> Self {
        move |source| Self::Crypto { message: message.to_owned(), source }
    }
}
