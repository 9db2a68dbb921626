//! Persisted row types and their key layout.
//!
//! Each logical table is a key prefix. Service names are base64url encoded
//! inside keys so a name can never reach into another table or another
//! service's rows.
//!
//! | Table | Key | Value |
//! |-------|-----|-------|
//! | services | `services/{name}` | [`ServiceRecord`] |
//! | certificates | `certificates/{name}/{id}` | [`CertificateRecord`] |
//! | challenges | `challenges/{name}` | [`ChallengeRecord`] |
//! | tokens | `tokens/{name}/{id}` | [`TokenRecord`] |
//!
//! Values are JSON. Byte fields are standard base64 strings.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) const SERVICES: &str = "services/";
pub(crate) const CERTIFICATES: &str = "certificates/";
pub(crate) const CHALLENGES: &str = "challenges/";
pub(crate) const TOKENS: &str = "tokens/";

/// Tables holding rows with an expiry, swept by cleanup.
pub(crate) const EXPIRING_TABLES: [&str; 3] = [CERTIFICATES, CHALLENGES, TOKENS];

fn encode_name(name: &str) -> String {
    URL_SAFE_NO_PAD.encode(name)
}

pub(crate) fn service_key(name: &str) -> Vec<u8> {
    format!("{SERVICES}{}", encode_name(name)).into_bytes()
}

pub(crate) fn challenge_key(name: &str) -> Vec<u8> {
    format!("{CHALLENGES}{}", encode_name(name)).into_bytes()
}

/// Prefix of every row a service owns in a per-service table.
pub(crate) fn owned_prefix(table: &str, name: &str) -> Vec<u8> {
    format!("{table}{}/", encode_name(name)).into_bytes()
}

pub(crate) fn owned_key(table: &str, name: &str, id: &str) -> Vec<u8> {
    format!("{table}{}/{id}", encode_name(name)).into_bytes()
}

/// Draws a fresh row id.
pub(crate) fn new_row_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

mod b64 {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// A registered service and its long-lived public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Unique service name.
    pub name: String,
    /// PEM encoded public key.
    #[serde(with = "b64")]
    pub public_key: Vec<u8>,
}

/// A live certificate owned by a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Row id, unique within the service.
    pub id: String,
    /// Owning service.
    pub service: String,
    /// PEM encoded certificate.
    #[serde(with = "b64")]
    pub certificate: Vec<u8>,
    /// `notAfter` of the certificate.
    pub expires_at: DateTime<Utc>,
}

/// The outstanding login challenge of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    /// Owning service.
    pub service: String,
    /// Random challenge bytes.
    #[serde(with = "b64")]
    pub challenge: Vec<u8>,
    /// When the challenge stops being accepted.
    pub expires_at: DateTime<Utc>,
}

/// An issued bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Row id, unique within the service.
    pub id: String,
    /// Owning service.
    pub service: String,
    /// Compact token bytes, exactly as handed out.
    #[serde(with = "b64")]
    pub token: Vec<u8>,
    /// Token expiry, whole seconds.
    pub expires_at: DateTime<Utc>,
}

/// Rows carrying an expiry.
pub(crate) trait Expiring {
    fn expires_at(&self) -> DateTime<Utc>;

    fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() > now
    }
}

impl Expiring for CertificateRecord {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl Expiring for ChallengeRecord {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl Expiring for TokenRecord {
    fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

/// The expiry column alone, used by cleanup to sweep any expiring table.
#[derive(Debug, Deserialize)]
pub(crate) struct ExpiryOnly {
    pub(crate) expires_at: DateTime<Utc>,
}
