//! X.509 certificate requests, issuance and chain verification.
//!
//! # Trust Model
//!
//! ```text
//! ┌──────────────┐  self-signed, CA
//! │     Root     │
//! └──────┬───────┘
//!        │ issue(is_ca = true)
//! ┌──────▼───────┐  e.g. the authorization service
//! │ Intermediate │
//! └──────┬───────┘
//!        │ issue(is_ca = false)
//! ┌──────▼───────┐
//! │     Leaf     │  a service identity
//! └──────────────┘
//! ```
//!
//! Leaves may also be issued directly by the root. [`verify`] builds a path
//! from a leaf to the supplied trust anchor using the client-authentication
//! purpose, so every certificate in the chain must permit client auth.

use std::{fmt, net::IpAddr};

use chrono::{DateTime, Months, Utc};
use openssl::{
    asn1::Asn1Time,
    bn::BigNum,
    hash::MessageDigest,
    nid::Nid,
    stack::Stack,
    x509::{
        X509, X509Builder, X509Name, X509NameBuilder, X509PurposeId, X509StoreContext,
        extension::{
            AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
            SubjectAlternativeName, SubjectKeyIdentifier,
        },
        store::X509StoreBuilder,
        verify::X509VerifyFlags,
    },
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{PkiError, PkiResult},
    keys::{PrivateKey, PublicKey},
};

/// X.509 version 3 is encoded as 2.
const X509_VERSION_3: i32 = 2;

/// Serial numbers are drawn from `[0, 2^SERIAL_BITS - 1)`.
pub const SERIAL_BITS: i32 = 130;

/// Default validity of a self-signed root.
pub const DEFAULT_ROOT_VALIDITY_MONTHS: u32 = 24;

/// Distinguished name fields for a certificate subject.
///
/// Every field except the common name may hold several values, matching the
/// multi-valued attributes of an X.509 name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Subject {
    /// Common name (CN).
    pub common_name: Option<String>,
    /// Organization (O).
    pub organization: Vec<String>,
    /// Organizational unit (OU).
    pub organizational_unit: Vec<String>,
    /// Country (C).
    pub country: Vec<String>,
    /// State or province (ST).
    pub province: Vec<String>,
    /// Locality (L).
    pub locality: Vec<String>,
}

impl Subject {
    /// Creates a subject carrying only a common name.
    #[must_use]
    pub fn with_common_name(name: impl Into<String>) -> Self {
        Self { common_name: Some(name.into()), ..Self::default() }
    }

    fn to_x509_name(&self) -> PkiResult<X509Name> {
        let mut builder = X509NameBuilder::new().map_err(PkiError::crypto("create name builder"))?;

        let entries = [
            (Nid::COUNTRYNAME, &self.country),
            (Nid::STATEORPROVINCENAME, &self.province),
            (Nid::LOCALITYNAME, &self.locality),
            (Nid::ORGANIZATIONNAME, &self.organization),
            (Nid::ORGANIZATIONALUNITNAME, &self.organizational_unit),
        ];
        for (nid, values) in entries {
            for value in values {
                builder
                    .append_entry_by_nid(nid, value)
                    .map_err(|e| PkiError::invalid_encoding_with_source("subject", e))?;
            }
        }
        if let Some(cn) = &self.common_name {
            builder
                .append_entry_by_nid(Nid::COMMONNAME, cn)
                .map_err(|e| PkiError::invalid_encoding_with_source("subject", e))?;
        }

        Ok(builder.build())
    }
}

/// Optional, caller supplied fields of a certificate signing request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningRequest {
    /// Requested subject. The service name fills in a missing common name.
    pub subject: Option<Subject>,
    /// DNS subject alternative names.
    pub dns_names: Vec<String>,
    /// Email subject alternative names.
    pub email_addresses: Vec<String>,
    /// IP subject alternative names.
    pub ip_addresses: Vec<IpAddr>,
    /// URI subject alternative names.
    pub uris: Vec<String>,
    /// Requests a certificate able to sign other certificates.
    ///
    /// Issuers decide whether to honour this.
    pub is_ca: bool,
}

/// A certificate signing request descriptor: who is asking, with which key,
/// and for which names.
#[derive(Debug, Clone)]
pub struct CertificateRequest {
    /// Subject of the certificate; the common name is always set.
    pub subject: Subject,
    /// Key the certificate will bind.
    pub public_key: PublicKey,
    /// DNS subject alternative names.
    pub dns_names: Vec<String>,
    /// Email subject alternative names.
    pub email_addresses: Vec<String>,
    /// IP subject alternative names.
    pub ip_addresses: Vec<IpAddr>,
    /// URI subject alternative names.
    pub uris: Vec<String>,
    /// Whether a CA certificate was requested.
    pub is_ca: bool,
}

impl CertificateRequest {
    /// Builds a request descriptor for `name`.
    ///
    /// Fields present in `request` are copied over; `name` becomes the common
    /// name whenever the request does not supply one.
    #[must_use]
    pub fn build(name: &str, public_key: PublicKey, request: Option<&SigningRequest>) -> Self {
        let request = request.cloned().unwrap_or_default();

        let mut subject = request.subject.unwrap_or_default();
        if subject.common_name.as_deref().is_none_or(str::is_empty) {
            subject.common_name = Some(name.to_owned());
        }

        Self {
            subject,
            public_key,
            dns_names: request.dns_names,
            email_addresses: request.email_addresses,
            ip_addresses: request.ip_addresses,
            uris: request.uris,
            is_ca: request.is_ca,
        }
    }

    /// Turns this request into an issuance template valid for
    /// `validity_months`.
    #[must_use]
    pub fn into_template(self, validity_months: u32) -> (CertificateTemplate, PublicKey) {
        let template = CertificateTemplate {
            subject: self.subject,
            validity_months,
            is_ca: self.is_ca,
            dns_names: self.dns_names,
            email_addresses: self.email_addresses,
            ip_addresses: self.ip_addresses,
            uris: self.uris,
        };
        (template, self.public_key)
    }
}

/// Everything needed to mint a certificate except the keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateTemplate {
    /// Subject name.
    pub subject: Subject,
    /// Months from now until `notAfter`.
    pub validity_months: u32,
    /// Whether the certificate may sign other certificates.
    pub is_ca: bool,
    /// DNS subject alternative names.
    pub dns_names: Vec<String>,
    /// Email subject alternative names.
    pub email_addresses: Vec<String>,
    /// IP subject alternative names.
    pub ip_addresses: Vec<IpAddr>,
    /// URI subject alternative names.
    pub uris: Vec<String>,
}

impl CertificateTemplate {
    /// Template for a self-signed root with the default validity.
    #[must_use]
    pub fn root(subject: Subject) -> Self {
        Self {
            subject,
            validity_months: DEFAULT_ROOT_VALIDITY_MONTHS,
            is_ca: true,
            dns_names: Vec::new(),
            email_addresses: Vec::new(),
            ip_addresses: Vec::new(),
            uris: Vec::new(),
        }
    }

    fn has_alt_names(&self) -> bool {
        !(self.dns_names.is_empty()
            && self.email_addresses.is_empty()
            && self.ip_addresses.is_empty()
            && self.uris.is_empty())
    }
}

/// A decoded X.509 certificate.
#[derive(Clone)]
pub struct Certificate {
    x509: X509,
}

impl Certificate {
    /// Decodes a `CERTIFICATE` PEM block.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::NilCertificate`] on empty input and
    /// [`PkiError::InvalidEncoding`] when the bytes are not a certificate.
    pub fn from_pem(pem: &[u8]) -> PkiResult<Self> {
        if pem.is_empty() {
            return Err(PkiError::NilCertificate);
        }
        let x509 =
            X509::from_pem(pem).map_err(|e| PkiError::invalid_encoding_with_source("certificate", e))?;
        Ok(Self { x509 })
    }

    /// Encodes this certificate as a `CERTIFICATE` PEM block.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::Crypto`] if serialization fails.
    pub fn to_pem(&self) -> PkiResult<Vec<u8>> {
        self.x509.to_pem().map_err(PkiError::crypto("encode certificate"))
    }

    /// Returns the subject common name, if present.
    #[must_use]
    pub fn common_name(&self) -> Option<String> {
        self.x509
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .and_then(|entry| String::from_utf8(entry.data().as_slice().to_vec()).ok())
    }

    /// Returns the key this certificate binds.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::InvalidEncoding`] if the certificate does not carry
    /// a P-521 EC key.
    pub fn public_key(&self) -> PkiResult<PublicKey> {
        let pkey = self
            .x509
            .public_key()
            .map_err(|e| PkiError::invalid_encoding_with_source("certificate public key", e))?;
        PublicKey::from_pkey(&pkey)
    }

    /// Returns the serial number as upper-case hex.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::Crypto`] if the serial cannot be converted.
    pub fn serial_hex(&self) -> PkiResult<String> {
        let bn = self.x509.serial_number().to_bn().map_err(PkiError::crypto("read serial"))?;
        let hex = bn.to_hex_str().map_err(PkiError::crypto("format serial"))?;
        Ok(hex.to_string())
    }

    /// Returns `notBefore`.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::Crypto`] if the time cannot be converted.
    pub fn not_before(&self) -> PkiResult<DateTime<Utc>> {
        asn1_to_datetime(self.x509.not_before())
    }

    /// Returns `notAfter`.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::Crypto`] if the time cannot be converted.
    pub fn not_after(&self) -> PkiResult<DateTime<Utc>> {
        asn1_to_datetime(self.x509.not_after())
    }
}

impl PartialEq for Certificate {
    fn eq(&self, other: &Self) -> bool {
        match (self.x509.to_der(), other.x509.to_der()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Certificate {}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("common_name", &self.common_name())
            .field("not_after", &self.not_after().ok())
            .finish()
    }
}

/// Decodes a `CERTIFICATE` PEM block.
///
/// # Errors
///
/// See [`Certificate::from_pem`].
pub fn decode_certificate(pem: &[u8]) -> PkiResult<Certificate> {
    Certificate::from_pem(pem)
}

fn asn1_to_datetime(time: &openssl::asn1::Asn1TimeRef) -> PkiResult<DateTime<Utc>> {
    let epoch = Asn1Time::from_unix(0).map_err(PkiError::crypto("build epoch"))?;
    let diff = epoch.diff(time).map_err(PkiError::crypto("convert certificate time"))?;
    let secs = i64::from(diff.days) * 86_400 + i64::from(diff.secs);
    DateTime::from_timestamp(secs, 0).ok_or_else(|| PkiError::invalid_encoding("certificate time"))
}

fn random_serial() -> PkiResult<BigNum> {
    let one = BigNum::from_u32(1).map_err(PkiError::crypto("serial limit"))?;
    let mut limit = BigNum::new().map_err(PkiError::crypto("serial limit"))?;
    limit.lshift(&one, SERIAL_BITS).map_err(PkiError::crypto("serial limit"))?;
    limit.sub_word(1).map_err(PkiError::crypto("serial limit"))?;

    let mut serial = BigNum::new().map_err(PkiError::crypto("serial"))?;
    limit.rand_range(&mut serial).map_err(PkiError::crypto("draw serial"))?;
    Ok(serial)
}

/// Computes the `(notBefore, notAfter)` pair for a template, truncated to
/// whole seconds as stored in the certificate.
fn validity_window(months: u32) -> PkiResult<(DateTime<Utc>, DateTime<Utc>)> {
    let now = Utc::now();
    let now = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
    let not_after = now
        .checked_add_months(Months::new(months))
        .ok_or_else(|| PkiError::invalid_encoding("validity period"))?;
    Ok((now, not_after))
}

fn base_builder(template: &CertificateTemplate, subject_key: &PublicKey) -> PkiResult<X509Builder> {
    let mut builder = X509Builder::new().map_err(PkiError::crypto("create certificate builder"))?;
    builder.set_version(X509_VERSION_3).map_err(PkiError::crypto("set version"))?;

    let serial = random_serial()?.to_asn1_integer().map_err(PkiError::crypto("encode serial"))?;
    builder.set_serial_number(&serial).map_err(PkiError::crypto("set serial"))?;

    let name = template.subject.to_x509_name()?;
    builder.set_subject_name(&name).map_err(PkiError::crypto("set subject"))?;

    let (not_before, not_after) = validity_window(template.validity_months)?;
    let not_before =
        Asn1Time::from_unix(not_before.timestamp()).map_err(PkiError::crypto("encode notBefore"))?;
    let not_after =
        Asn1Time::from_unix(not_after.timestamp()).map_err(PkiError::crypto("encode notAfter"))?;
    builder.set_not_before(&not_before).map_err(PkiError::crypto("set notBefore"))?;
    builder.set_not_after(&not_after).map_err(PkiError::crypto("set notAfter"))?;

    let subject_pkey = subject_key.to_pkey()?;
    builder.set_pubkey(&subject_pkey).map_err(PkiError::crypto("set public key"))?;
    Ok(builder)
}

fn append_usage_extensions(builder: &mut X509Builder, template: &CertificateTemplate) -> PkiResult<()> {
    let mut constraints = BasicConstraints::new();
    constraints.critical();
    if template.is_ca {
        constraints.ca();
    }
    let constraints = constraints.build().map_err(PkiError::crypto("build basic constraints"))?;
    builder.append_extension(constraints).map_err(PkiError::crypto("add basic constraints"))?;

    let mut usage = KeyUsage::new();
    usage.critical().digital_signature();
    if template.is_ca {
        usage.key_cert_sign();
    }
    let usage = usage.build().map_err(PkiError::crypto("build key usage"))?;
    builder.append_extension(usage).map_err(PkiError::crypto("add key usage"))?;
    Ok(())
}

/// Issues a certificate for `subject_key`, signed by `issuer`.
///
/// The serial number is drawn uniformly from `[0, 2^130 − 1)`, so no
/// central counter is needed to avoid collisions. Leaf certificates carry
/// code-signing, server, client and OCSP-signing extended key usages.
///
/// # Errors
///
/// Returns [`PkiError::InvalidEncoding`] for unencodable subject fields and
/// [`PkiError::Crypto`] if signing fails.
pub fn issue(
    template: &CertificateTemplate,
    issuer: &Certificate,
    subject_key: &PublicKey,
    issuer_key: &PrivateKey,
) -> PkiResult<Certificate> {
    let mut builder = base_builder(template, subject_key)?;
    builder.set_issuer_name(issuer.x509.subject_name()).map_err(PkiError::crypto("set issuer"))?;

    append_usage_extensions(&mut builder, template)?;

    let eku = ExtendedKeyUsage::new()
        .code_signing()
        .server_auth()
        .client_auth()
        .other("OCSPSigning")
        .build()
        .map_err(PkiError::crypto("build extended key usage"))?;
    builder.append_extension(eku).map_err(PkiError::crypto("add extended key usage"))?;

    let skid = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(Some(&issuer.x509), None))
        .map_err(PkiError::crypto("build subject key identifier"))?;
    builder.append_extension(skid).map_err(PkiError::crypto("add subject key identifier"))?;

    let akid = AuthorityKeyIdentifier::new()
        .keyid(false)
        .build(&builder.x509v3_context(Some(&issuer.x509), None))
        .map_err(PkiError::crypto("build authority key identifier"))?;
    builder.append_extension(akid).map_err(PkiError::crypto("add authority key identifier"))?;

    if template.has_alt_names() {
        let mut san = SubjectAlternativeName::new();
        for dns in &template.dns_names {
            san.dns(dns);
        }
        for email in &template.email_addresses {
            san.email(email);
        }
        for ip in &template.ip_addresses {
            san.ip(&ip.to_string());
        }
        for uri in &template.uris {
            san.uri(uri);
        }
        let san = san
            .build(&builder.x509v3_context(Some(&issuer.x509), None))
            .map_err(|e| PkiError::invalid_encoding_with_source("subject alternative name", e))?;
        builder.append_extension(san).map_err(PkiError::crypto("add subject alternative name"))?;
    }

    let signing_key = issuer_key.to_pkey()?;
    builder.sign(&signing_key, MessageDigest::sha512()).map_err(PkiError::crypto("sign certificate"))?;

    Ok(Certificate { x509: builder.build() })
}

/// Produces a self-signed CA root from `template`.
///
/// The template's `is_ca` flag is forced on; roots carry certificate-signing
/// and digital-signature key usages and server/client extended key usages.
///
/// # Errors
///
/// Returns [`PkiError::Crypto`] if signing fails.
pub fn self_sign(template: &CertificateTemplate, key: &PrivateKey) -> PkiResult<Certificate> {
    let template = CertificateTemplate { is_ca: true, ..template.clone() };
    let public = key.public_key()?;

    let mut builder = base_builder(&template, &public)?;
    let name = template.subject.to_x509_name()?;
    builder.set_issuer_name(&name).map_err(PkiError::crypto("set issuer"))?;

    append_usage_extensions(&mut builder, &template)?;

    let eku = ExtendedKeyUsage::new()
        .server_auth()
        .client_auth()
        .build()
        .map_err(PkiError::crypto("build extended key usage"))?;
    builder.append_extension(eku).map_err(PkiError::crypto("add extended key usage"))?;

    let skid = SubjectKeyIdentifier::new()
        .build(&builder.x509v3_context(None, None))
        .map_err(PkiError::crypto("build subject key identifier"))?;
    builder.append_extension(skid).map_err(PkiError::crypto("add subject key identifier"))?;

    let signing_key = key.to_pkey()?;
    builder.sign(&signing_key, MessageDigest::sha512()).map_err(PkiError::crypto("sign root"))?;

    Ok(Certificate { x509: builder.build() })
}

/// Verifies `cert_pem` against a trust anchor.
///
/// With a `root`, the chain must end at that root and `intermediates` are
/// only used to bridge the gap. Without one, the intermediates themselves
/// are trusted and the chain must end at one of them.
///
/// Returns the verified chain, leaf first.
///
/// # Errors
///
/// - [`PkiError::NilCertificate`] when `cert_pem` is empty
/// - [`PkiError::NoTrustAnchor`] when neither root nor intermediates are given
/// - [`PkiError::InvalidEncoding`] when `cert_pem` is not a certificate
/// - [`PkiError::ChainVerification`] with the chain builder's reason otherwise
pub fn verify(
    cert_pem: &[u8],
    root: Option<&Certificate>,
    intermediates: &[Certificate],
) -> PkiResult<Vec<Certificate>> {
    if cert_pem.is_empty() {
        return Err(PkiError::NilCertificate);
    }
    if root.is_none() && intermediates.is_empty() {
        return Err(PkiError::NoTrustAnchor);
    }

    let leaf = Certificate::from_pem(cert_pem)?;

    let mut store = X509StoreBuilder::new().map_err(PkiError::crypto("create trust store"))?;
    let mut untrusted = Stack::new().map_err(PkiError::crypto("create intermediate pool"))?;

    match root {
        Some(root) => {
            store.add_cert(root.x509.clone()).map_err(PkiError::crypto("add root"))?;
            for intermediate in intermediates {
                untrusted
                    .push(intermediate.x509.clone())
                    .map_err(PkiError::crypto("add intermediate"))?;
            }
        },
        None => {
            store
                .set_flags(X509VerifyFlags::PARTIAL_CHAIN)
                .map_err(PkiError::crypto("enable partial chains"))?;
            for intermediate in intermediates {
                store.add_cert(intermediate.x509.clone()).map_err(PkiError::crypto("add anchor"))?;
            }
        },
    }
    store.set_purpose(X509PurposeId::SSL_CLIENT).map_err(PkiError::crypto("set purpose"))?;
    let store = store.build();

    let mut ctx = X509StoreContext::new().map_err(PkiError::crypto("create verify context"))?;
    let outcome = ctx
        .init(&store, &leaf.x509, &untrusted, |c| {
            if !c.verify_cert()? {
                return Ok(Err(c.error().error_string().to_owned()));
            }
            let chain: Vec<Certificate> = c
                .chain()
                .map(|stack| stack.iter().map(|x| Certificate { x509: x.to_owned() }).collect())
                .unwrap_or_default();
            Ok(Ok(chain))
        })
        .map_err(PkiError::crypto("verify chain"))?;

    let chain = outcome.map_err(|reason| {
        tracing::debug!(%reason, "certificate chain rejected");
        PkiError::ChainVerification { reason }
    })?;

    let anchored = match (chain.last(), root) {
        (Some(top), Some(root)) => top == root,
        (Some(top), None) => intermediates.iter().any(|i| i == top),
        (None, _) => false,
    };
    if !anchored {
        return Err(PkiError::ChainVerification {
            reason: "chain does not terminate at the supplied trust anchor".to_owned(),
        });
    }

    Ok(chain)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn root() -> (PrivateKey, Certificate) {
        let key = PrivateKey::generate().unwrap();
        let cert = self_sign(&CertificateTemplate::root(Subject::with_common_name("root")), &key).unwrap();
        (key, cert)
    }

    fn leaf_template(name: &str, is_ca: bool) -> CertificateTemplate {
        CertificateTemplate { is_ca, ..CertificateTemplate::root(Subject::with_common_name(name)) }
    }

    #[test]
    fn test_build_request_falls_back_to_name() {
        let key = PrivateKey::generate().unwrap().public_key().unwrap();
        let request = CertificateRequest::build("svc-a", key, None);
        assert_eq!(request.subject.common_name.as_deref(), Some("svc-a"));
        assert!(!request.is_ca);
    }

    #[test]
    fn test_build_request_keeps_explicit_subject() {
        let key = PrivateKey::generate().unwrap().public_key().unwrap();
        let csr = SigningRequest {
            subject: Some(Subject {
                common_name: Some("explicit".into()),
                organization: vec!["Fleet".into()],
                ..Subject::default()
            }),
            dns_names: vec!["svc.internal".into()],
            ..SigningRequest::default()
        };

        let request = CertificateRequest::build("svc-a", key, Some(&csr));
        assert_eq!(request.subject.common_name.as_deref(), Some("explicit"));
        assert_eq!(request.subject.organization, vec!["Fleet".to_owned()]);
        assert_eq!(request.dns_names, vec!["svc.internal".to_owned()]);
    }

    #[test]
    fn test_build_request_empty_common_name_falls_back() {
        let key = PrivateKey::generate().unwrap().public_key().unwrap();
        let csr = SigningRequest { subject: Some(Subject::with_common_name("")), ..SigningRequest::default() };

        let request = CertificateRequest::build("svc-a", key, Some(&csr));
        assert_eq!(request.subject.common_name.as_deref(), Some("svc-a"));
    }

    #[test]
    fn test_self_signed_root_is_ca() {
        let (key, cert) = root();
        let text = String::from_utf8(cert.x509.to_text().unwrap()).unwrap();
        assert!(text.contains("CA:TRUE"));
        assert_eq!(cert.common_name().as_deref(), Some("root"));
        assert_eq!(cert.public_key().unwrap(), key.public_key().unwrap());
    }

    #[test]
    fn test_issued_certificate_round_trip() {
        let (root_key, root_cert) = root();
        let subject = PrivateKey::generate().unwrap().public_key().unwrap();

        let cert = issue(&leaf_template("svc", false), &root_cert, &subject, &root_key).unwrap();
        let decoded = Certificate::from_pem(&cert.to_pem().unwrap()).unwrap();

        assert_eq!(decoded, cert);
        assert_eq!(decoded.common_name().as_deref(), Some("svc"));
        assert_eq!(decoded.serial_hex().unwrap(), cert.serial_hex().unwrap());
        assert_eq!(decoded.not_before().unwrap(), cert.not_before().unwrap());
        assert_eq!(decoded.not_after().unwrap(), cert.not_after().unwrap());
        assert_eq!(decoded.public_key().unwrap(), subject);
    }

    #[test]
    fn test_common_name_keeps_interior_nul() {
        let (root_key, root_cert) = root();
        let subject = PrivateKey::generate().unwrap().public_key().unwrap();

        let cert = issue(&leaf_template("svc\0other", false), &root_cert, &subject, &root_key).unwrap();
        assert_eq!(cert.common_name().as_deref(), Some("svc\0other"));
        assert_ne!(cert.common_name().as_deref(), Some("svc"));
    }

    #[test]
    fn test_validity_matches_months() {
        let (root_key, root_cert) = root();
        let subject = PrivateKey::generate().unwrap().public_key().unwrap();
        let template = CertificateTemplate { validity_months: 12, ..leaf_template("svc", false) };

        let cert = issue(&template, &root_cert, &subject, &root_key).unwrap();
        let span = cert.not_after().unwrap() - cert.not_before().unwrap();
        assert!(span.num_days() >= 365 && span.num_days() <= 366, "got {} days", span.num_days());
    }

    #[test]
    fn test_serials_are_distinct() {
        let (root_key, root_cert) = root();
        let subject = PrivateKey::generate().unwrap().public_key().unwrap();

        let a = issue(&leaf_template("svc", false), &root_cert, &subject, &root_key).unwrap();
        let b = issue(&leaf_template("svc", false), &root_cert, &subject, &root_key).unwrap();
        assert_ne!(a.serial_hex().unwrap(), b.serial_hex().unwrap());
    }

    #[test]
    fn test_issue_with_alt_names() {
        let (root_key, root_cert) = root();
        let subject = PrivateKey::generate().unwrap().public_key().unwrap();
        let template = CertificateTemplate {
            dns_names: vec!["svc.internal".into()],
            ip_addresses: vec!["10.0.0.1".parse().unwrap()],
            uris: vec!["spiffe://fleet/svc".into()],
            email_addresses: vec!["ops@fleet.example".into()],
            ..leaf_template("svc", false)
        };

        let cert = issue(&template, &root_cert, &subject, &root_key).unwrap();
        verify(&cert.to_pem().unwrap(), Some(&root_cert), &[]).unwrap();
    }

    #[test]
    fn test_verify_direct_leaf() {
        let (root_key, root_cert) = root();
        let subject = PrivateKey::generate().unwrap().public_key().unwrap();
        let cert = issue(&leaf_template("svc", false), &root_cert, &subject, &root_key).unwrap();

        let chain = verify(&cert.to_pem().unwrap(), Some(&root_cert), &[]).unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain.last(), Some(&root_cert));
    }

    #[test]
    fn test_leaf_cannot_act_as_intermediate() {
        let (root_key, root_cert) = root();
        let leaf_key = PrivateKey::generate().unwrap();
        let leaf =
            issue(&leaf_template("leaf", false), &root_cert, &leaf_key.public_key().unwrap(), &root_key)
                .unwrap();

        let subject = PrivateKey::generate().unwrap().public_key().unwrap();
        let grandchild = issue(&leaf_template("child", false), &leaf, &subject, &leaf_key).unwrap();

        assert!(matches!(
            verify(&grandchild.to_pem().unwrap(), Some(&root_cert), &[leaf]),
            Err(PkiError::ChainVerification { .. })
        ));
    }

    #[test]
    fn test_verify_empty_input() {
        let (_, root_cert) = root();
        assert!(matches!(verify(&[], Some(&root_cert), &[]), Err(PkiError::NilCertificate)));
    }

    #[test]
    fn test_verify_without_anchor() {
        assert!(matches!(verify(b"pem", None, &[]), Err(PkiError::NoTrustAnchor)));
    }

    #[test]
    fn test_verify_garbage_input() {
        let (_, root_cert) = root();
        assert!(matches!(
            verify(b"not a certificate", Some(&root_cert), &[]),
            Err(PkiError::InvalidEncoding { .. })
        ));
    }

    #[test]
    fn test_verify_foreign_root_fails() {
        let (root_key, root_cert) = root();
        let (_, other_root) = root();
        let subject = PrivateKey::generate().unwrap().public_key().unwrap();
        let cert = issue(&leaf_template("svc", false), &root_cert, &subject, &root_key).unwrap();

        assert!(matches!(
            verify(&cert.to_pem().unwrap(), Some(&other_root), &[]),
            Err(PkiError::ChainVerification { .. })
        ));
    }
}
