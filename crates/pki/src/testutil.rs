//! Shared fixtures for key, certificate and token tests.
//!
//! Feature-gated behind `testutil` so it never reaches production builds.
//!
//! ```toml
//! [dev-dependencies]
//! fleetauth-pki = { path = "../pki", features = ["testutil"] }
//! ```
//!
//! Building a P-521 hierarchy takes a few milliseconds per key, so the
//! helpers return everything a test usually needs in one call.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use openssl::{
    asn1::Asn1Time,
    hash::MessageDigest,
    nid::Nid,
    x509::{X509, X509Builder, X509NameBuilder},
};

use crate::{
    certificate::{self, Certificate, CertificateTemplate, Subject},
    keys::{PrivateKey, PublicKey},
};

/// A key pair together with the certificate binding it.
#[derive(Debug, Clone)]
pub struct TestIdentity {
    /// Private key.
    pub key: PrivateKey,
    /// Certificate for the key.
    pub certificate: Certificate,
    /// Issuer chain above `certificate`, nearest first, excluding the root.
    pub chain: Vec<Certificate>,
    /// Whether `certificate` is self-signed.
    pub is_root: bool,
}

impl TestIdentity {
    /// Returns the public half of the key.
    ///
    /// # Panics
    ///
    /// Panics if the key cannot be converted.
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.key.public_key().expect("public key")
    }

    /// Returns the certificate as PEM.
    ///
    /// # Panics
    ///
    /// Panics if encoding fails.
    #[must_use]
    pub fn certificate_pem(&self) -> Vec<u8> {
        self.certificate.to_pem().expect("certificate pem")
    }
}

/// Generates a fresh key pair.
///
/// # Panics
///
/// Panics if key generation fails.
#[must_use]
pub fn generate_keypair() -> (PrivateKey, PublicKey) {
    let key = PrivateKey::generate().expect("generate key");
    let public = key.public_key().expect("public key");
    (key, public)
}

/// Creates a self-signed root named `name`.
///
/// # Panics
///
/// Panics if signing fails.
#[must_use]
pub fn create_root(name: &str) -> TestIdentity {
    let key = PrivateKey::generate().expect("generate root key");
    let certificate = certificate::self_sign(&CertificateTemplate::root(Subject::with_common_name(name)), &key)
        .expect("self-sign root");
    TestIdentity { key, certificate, chain: Vec::new(), is_root: true }
}

/// Issues a certificate named `name` below `issuer` with a fresh key.
///
/// # Panics
///
/// Panics if issuance fails.
#[must_use]
pub fn issue_child(issuer: &TestIdentity, name: &str, is_ca: bool) -> TestIdentity {
    let key = PrivateKey::generate().expect("generate child key");
    let template = CertificateTemplate {
        validity_months: 12,
        is_ca,
        ..CertificateTemplate::root(Subject::with_common_name(name))
    };
    let certificate =
        certificate::issue(&template, &issuer.certificate, &key.public_key().expect("public key"), &issuer.key)
            .expect("issue child");

    let mut chain = Vec::with_capacity(issuer.chain.len() + 1);
    if !issuer.is_root {
        chain.push(issuer.certificate.clone());
        chain.extend(issuer.chain.iter().cloned());
    }
    TestIdentity { key, certificate, chain, is_root: false }
}

/// Issues a certificate for `subject` that expired a day ago, signed by
/// `issuer`. Issuance proper only dates validity forward, so this builds the
/// certificate directly.
///
/// # Panics
///
/// Panics if any OpenSSL step fails.
#[must_use]
pub fn issue_expired(issuer: &TestIdentity, name: &str, subject: &PublicKey) -> Certificate {
    let mut subject_name = X509NameBuilder::new().expect("name builder");
    subject_name.append_entry_by_nid(Nid::COMMONNAME, name).expect("common name");
    let subject_name = subject_name.build();

    let day = 24 * 60 * 60;
    let now = chrono::Utc::now().timestamp();
    let mut builder = X509Builder::new().expect("certificate builder");
    builder.set_version(2).expect("version");
    builder.set_subject_name(&subject_name).expect("subject");
    let issuer_x509 = X509::from_pem(&issuer.certificate_pem()).expect("issuer certificate");
    builder.set_issuer_name(issuer_x509.subject_name()).expect("issuer");
    builder.set_not_before(&Asn1Time::from_unix(now - 2 * day).expect("notBefore")).expect("notBefore");
    builder.set_not_after(&Asn1Time::from_unix(now - day).expect("notAfter")).expect("notAfter");
    let subject_key = subject.to_pkey().expect("subject key");
    builder.set_pubkey(&subject_key).expect("public key");
    let issuer_key = issuer.key.to_pkey().expect("issuer key");
    builder.sign(&issuer_key, MessageDigest::sha512()).expect("sign");

    Certificate::from_pem(&builder.build().to_pem().expect("pem")).expect("decode")
}

/// Creates a raw compact token from arbitrary header and payload JSON with an
/// empty signature, for exercising rejection paths.
///
/// # Panics
///
/// Panics if JSON serialization fails.
#[must_use]
pub fn craft_raw_token(header_json: &serde_json::Value, payload_json: &serde_json::Value) -> String {
    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(header_json).expect("header json"));
    let payload_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(payload_json).expect("payload json"));
    format!("{header_b64}.{payload_b64}.")
}

/// Asserts that a [`Result<T, PkiError>`](crate::PkiError) is an `Err` matching the given variant.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use fleetauth_pki::assert_pki_error;
/// use fleetauth_pki::PkiError;
///
/// let result: Result<(), PkiError> = Err(PkiError::TokenExpired);
/// assert_pki_error!(result, TokenExpired);
/// ```
#[macro_export]
macro_rules! assert_pki_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::PkiError::$variant { .. })),
            "expected PkiError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
}
