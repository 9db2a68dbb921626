//! Request and response types of the CA and Authorization surfaces.
//!
//! Keys and certificates travel as PEM bytes; expiries as Unix epoch
//! milliseconds. Every request has a `validate` method that checks its
//! shape before any work is done:
//!
//! | Field | Rule |
//! |-------|------|
//! | `service` | 1 to [`MAX_SERVICE_NAME_LEN`] bytes, no whitespace or control characters |
//! | PEM fields | non-empty |
//! | `signed_challenge` | non-empty |
//! | `token` | non-empty |

use chrono::{DateTime, Utc};
use fleetauth_pki::SigningRequest;
use fleetauth_storage::CertificateRecord;
use serde::{Deserialize, Serialize};

use crate::error::{Domain, ServiceError, ServiceResult};

/// Longest accepted service name, in bytes.
pub const MAX_SERVICE_NAME_LEN: usize = 253;

fn validate_service(domain: Domain, service: &str) -> ServiceResult<()> {
    let well_formed = !service.is_empty()
        && service.len() <= MAX_SERVICE_NAME_LEN
        && !service.chars().any(|c| c.is_whitespace() || c.is_control());
    if well_formed { Ok(()) } else { Err(ServiceError::invalid(domain, "service name")) }
}

fn validate_present(domain: Domain, entity: &'static str, value: &[u8]) -> ServiceResult<()> {
    if value.is_empty() { Err(ServiceError::invalid(domain, entity)) } else { Ok(()) }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn epoch_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

// ─── certificates ──────────────────────────────────────────────────────────

/// Register, create or list certificates for a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    /// Service name.
    pub service: String,
    /// Service public key, PEM.
    pub public_key: Vec<u8>,
    /// Optional subject and alternative names.
    #[serde(default)]
    pub signing_request: Option<SigningRequest>,
}

impl CertificateRequest {
    /// Request without signing request details.
    pub fn new(service: impl Into<String>, public_key: impl Into<Vec<u8>>) -> Self {
        Self { service: service.into(), public_key: public_key.into(), signing_request: None }
    }

    /// Attaches signing request details.
    #[must_use]
    pub fn with_signing_request(mut self, request: SigningRequest) -> Self {
        self.signing_request = Some(request);
        self
    }

    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Invalid`] naming the first bad field.
    pub fn validate(&self, domain: Domain) -> ServiceResult<()> {
        validate_service(domain, &self.service)?;
        validate_present(domain, "public key", &self.public_key)
    }
}

/// An issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateResponse {
    /// Certificate, PEM.
    pub certificate: Vec<u8>,
    /// `notAfter`, epoch milliseconds.
    pub expires_on: i64,
}

impl From<&CertificateRecord> for CertificateResponse {
    fn from(record: &CertificateRecord) -> Self {
        Self { certificate: record.certificate.clone(), expires_on: epoch_millis(record.expires_at) }
    }
}

/// A service's live certificates, latest expiry first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListCertificatesResponse {
    /// Certificates.
    pub certificates: Vec<CertificateResponse>,
}

/// Remove one certificate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteCertificateRequest {
    /// Service name.
    pub service: String,
    /// Service public key, PEM.
    pub public_key: Vec<u8>,
    /// Certificate to remove, PEM.
    pub certificate: Vec<u8>,
}

impl DeleteCertificateRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Invalid`] naming the first bad field.
    pub fn validate(&self, domain: Domain) -> ServiceResult<()> {
        validate_service(domain, &self.service)?;
        validate_present(domain, "public key", &self.public_key)?;
        validate_present(domain, "certificate", &self.certificate)
    }
}

/// Remove a service and everything it owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteServiceRequest {
    /// Service name.
    pub service: String,
    /// Service public key, PEM.
    pub public_key: Vec<u8>,
}

impl DeleteServiceRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Invalid`] naming the first bad field.
    pub fn validate(&self, domain: Domain) -> ServiceResult<()> {
        validate_service(domain, &self.service)?;
        validate_present(domain, "public key", &self.public_key)
    }
}

/// Empty acknowledgement of a deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionResponse {}

/// Check a certificate against the authority's chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRequest {
    /// Certificate, PEM.
    pub certificate: Vec<u8>,
}

impl VerificationRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Invalid`] for an empty certificate.
    pub fn validate(&self, domain: Domain) -> ServiceResult<()> {
        validate_present(domain, "certificate", &self.certificate)
    }
}

/// Outcome of a certificate check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResponse {
    /// Whether the certificate chains to this authority.
    pub valid: bool,
    /// Why it does not, when `valid` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The authority's trust anchors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootCertificateResponse {
    /// Root certificate, PEM.
    pub root: Vec<u8>,
    /// Intermediate certificates, PEM, nearest to the leaves first.
    pub intermediates: Vec<Vec<u8>>,
}

/// The authority's public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyResponse {
    /// Public key, PEM.
    pub public_key: Vec<u8>,
}

// ─── authorization ─────────────────────────────────────────────────────────

/// Result of onboarding a service with the Authorization service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpResponse {
    /// The service's certificate.
    pub certificate: CertificateResponse,
    /// Authorization service public key, PEM.
    pub service_public_key: Vec<u8>,
    /// Authorization service certificate, PEM.
    pub service_certificate: Vec<u8>,
}

/// Start the challenge-response handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    /// Service name.
    pub service: String,
    /// Service public key, PEM.
    pub public_key: Vec<u8>,
    /// Service certificate, PEM.
    pub certificate: Vec<u8>,
    /// Authorization service public key the caller trusts, PEM.
    pub authz_public_key: Vec<u8>,
    /// Authorization service certificate the caller trusts, PEM.
    pub authz_certificate: Vec<u8>,
}

impl LoginRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Invalid`] naming the first bad field.
    pub fn validate(&self, domain: Domain) -> ServiceResult<()> {
        validate_service(domain, &self.service)?;
        validate_present(domain, "public key", &self.public_key)?;
        validate_present(domain, "certificate", &self.certificate)?;
        validate_present(domain, "authz public key", &self.authz_public_key)?;
        validate_present(domain, "authz certificate", &self.authz_certificate)
    }
}

/// A challenge to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    /// Random bytes; sign `SHA-512(challenge)` with the service key.
    pub challenge: Vec<u8>,
    /// Challenge expiry, epoch milliseconds.
    pub expires_on: i64,
}

/// Exchange a signed challenge for a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRequest {
    /// Service name.
    pub service: String,
    /// Raw `r || s` signature over `SHA-512(challenge)`.
    pub signed_challenge: Vec<u8>,
}

impl TokenRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Invalid`] naming the first bad field.
    pub fn validate(&self, domain: Domain) -> ServiceResult<()> {
        validate_service(domain, &self.service)?;
        validate_present(domain, "signature", &self.signed_challenge)
    }
}

/// A bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Compact token.
    pub token: String,
    /// Token expiry, epoch milliseconds.
    pub expires_on: i64,
}

/// Check a bearer token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Compact token.
    pub token: String,
}

impl AuthRequest {
    /// Checks the request shape.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Invalid`] for an empty token.
    pub fn validate(&self, domain: Domain) -> ServiceResult<()> {
        validate_present(domain, "token", self.token.as_bytes())
    }
}

/// A verified token's subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    /// Service the token was issued to.
    pub service: String,
    /// Token expiry, epoch milliseconds.
    pub expires_on: i64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_rules() {
        let ok = CertificateRequest::new("billing-api.prod", b"pem".to_vec());
        ok.validate(Domain::Ca).unwrap();

        for bad in ["", "has space", "tab\there", &"x".repeat(MAX_SERVICE_NAME_LEN + 1)] {
            let err = CertificateRequest::new(bad, b"pem".to_vec()).validate(Domain::Ca).unwrap_err();
            assert_eq!(err.to_string(), "ca: invalid service name", "{bad:?}");
        }
    }

    #[test]
    fn test_first_bad_field_is_reported() {
        let request = LoginRequest {
            service: "svc".into(),
            public_key: b"pem".to_vec(),
            certificate: b"pem".to_vec(),
            authz_public_key: Vec::new(),
            authz_certificate: Vec::new(),
        };
        let err = request.validate(Domain::Authz).unwrap_err();
        assert_eq!(err.to_string(), "authz: invalid authz public key");
    }

    #[test]
    fn test_token_request_requires_signature() {
        let request = TokenRequest { service: "svc".into(), signed_challenge: Vec::new() };
        assert_eq!(request.validate(Domain::Authz).unwrap_err().to_string(), "authz: invalid signature");
        assert!(AuthRequest::default().validate(Domain::Authz).is_err());
    }

    #[test]
    fn test_signing_request_round_trips_as_json() {
        let request = CertificateRequest::new("svc", b"pem".to_vec()).with_signing_request(SigningRequest {
            dns_names: vec!["svc.internal".into()],
            ..SigningRequest::default()
        });
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(serde_json::from_str::<CertificateRequest>(&json).unwrap(), request);
    }
}
