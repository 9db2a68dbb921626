//! Signed bearer tokens.
//!
//! Tokens are compact JWS strings signed with `ES512`:
//!
//! ```text
//! base64url(header) . base64url(claims) . base64url(r || s)
//! ```
//!
//! The claims bind a service name to the authority that issued the token:
//!
//! ```json
//! {
//!   "service": "svc-a",
//!   "authz": "authz",
//!   "iss": "authz",
//!   "iat": 1700000000,
//!   "exp": 1700003600
//! }
//! ```
//!
//! # Example
//!
//! ```
//! use chrono::{Duration, Utc};
//! use fleetauth_pki::{keys::PrivateKey, token::{self, TokenClaims}};
//!
//! let key = PrivateKey::generate()?;
//! let exp = Utc::now() + Duration::hours(1);
//! let raw = token::issue(&key, "authz", exp, TokenClaims::new("svc-a", "authz"))?;
//!
//! let parsed = token::parse(raw.as_bytes(), Some(&key.public_key()?))?;
//! assert_eq!(parsed.claims.service, "svc-a");
//! # Ok::<(), fleetauth_pki::PkiError>(())
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{PkiError, PkiResult},
    keys::{self, PrivateKey, PublicKey},
    validation::validate_algorithm,
};

/// Signing algorithm written into every token header.
pub const ALGORITHM: &str = "ES512";

/// Token header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Signing algorithm.
    pub alg: String,
    /// Token type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// Application claims carried by a token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Name of the service the token was issued to.
    pub service: String,
    /// Name of the authority that issued the token.
    pub authz: String,
}

impl TokenClaims {
    /// Creates the claims for `service`, issued by `authz`.
    #[must_use]
    pub fn new(service: impl Into<String>, authz: impl Into<String>) -> Self {
        Self { service: service.into(), authz: authz.into() }
    }
}

/// Full claim set as encoded in the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Payload {
    service: String,
    authz: String,
    iss: String,
    iat: i64,
    exp: i64,
}

/// A decoded token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token {
    /// Decoded header.
    pub header: TokenHeader,
    /// Application claims.
    pub claims: TokenClaims,
    /// Issuer (`iss`).
    pub issuer: String,
    /// Issued at (`iat`), seconds since epoch.
    pub issued_at: i64,
    /// Expiry (`exp`), seconds since epoch.
    pub expires_at: i64,
}

impl Token {
    /// Returns the expiry as a timestamp.
    #[must_use]
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expires_at, 0)
    }
}

/// Builds and signs a token.
///
/// `expiry` is truncated to whole seconds.
///
/// # Errors
///
/// Returns [`PkiError::InvalidClaim`] if either claim is empty and
/// [`PkiError::Crypto`] if signing fails.
pub fn issue(
    key: &PrivateKey,
    issuer: &str,
    expiry: DateTime<Utc>,
    claims: TokenClaims,
) -> PkiResult<String> {
    if claims.service.is_empty() {
        return Err(PkiError::invalid_claim("service"));
    }
    if claims.authz.is_empty() {
        return Err(PkiError::invalid_claim("authz"));
    }

    let header = TokenHeader { alg: ALGORITHM.to_owned(), typ: Some("JWT".to_owned()) };
    let payload = Payload {
        service: claims.service,
        authz: claims.authz,
        iss: issuer.to_owned(),
        iat: Utc::now().timestamp(),
        exp: expiry.timestamp(),
    };

    let header = serde_json::to_vec(&header).map_err(|e| PkiError::invalid_claim(e.to_string()))?;
    let payload = serde_json::to_vec(&payload).map_err(|e| PkiError::invalid_claim(e.to_string()))?;

    let signing_input = format!("{}.{}", URL_SAFE_NO_PAD.encode(header), URL_SAFE_NO_PAD.encode(payload));
    let signature = keys::sign_message(signing_input.as_bytes(), key)?;

    Ok(format!("{}.{}", signing_input, URL_SAFE_NO_PAD.encode(signature)))
}

/// Decodes a token, verifying its signature when `key` is given.
///
/// Without a key the parse is structural only; callers use that to read the
/// claims before deciding which key to trust.
///
/// # Errors
///
/// - [`PkiError::InvalidToken`] if the token is not three base64url segments, the header is
///   malformed, or the signature does not verify
/// - [`PkiError::UnsupportedAlgorithm`] if the header names anything but `ES512`
/// - [`PkiError::InvalidClaim`] if the claims are missing or malformed
pub fn parse(token: &[u8], key: Option<&PublicKey>) -> PkiResult<Token> {
    let token = std::str::from_utf8(token).map_err(|_| PkiError::invalid_token("token is not UTF-8"))?;

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(PkiError::invalid_token("token must have 3 parts separated by dots"));
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(parts[0])
        .map_err(|e| PkiError::invalid_token(format!("failed to decode header: {}", e)))?;
    let header: TokenHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| PkiError::invalid_token(format!("failed to parse header: {}", e)))?;
    validate_algorithm(&header.alg)?;

    if let Some(key) = key {
        let signature = URL_SAFE_NO_PAD
            .decode(parts[2])
            .map_err(|e| PkiError::invalid_token(format!("failed to decode signature: {}", e)))?;
        let signing_input = &token[..parts[0].len() + 1 + parts[1].len()];
        keys::verify_message(signing_input.as_bytes(), key, &signature)
            .map_err(|_| PkiError::invalid_token("signature does not match"))?;
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| PkiError::invalid_claim(format!("failed to decode claims: {}", e)))?;
    let payload: Payload = serde_json::from_slice(&payload_bytes)
        .map_err(|e| PkiError::invalid_claim(format!("failed to parse claims: {}", e)))?;

    if payload.service.is_empty() {
        return Err(PkiError::invalid_claim("service"));
    }
    if payload.authz.is_empty() {
        return Err(PkiError::invalid_claim("authz"));
    }

    Ok(Token {
        header,
        claims: TokenClaims { service: payload.service, authz: payload.authz },
        issuer: payload.iss,
        issued_at: payload.iat,
        expires_at: payload.exp,
    })
}

/// Rejects tokens whose expiry has passed.
///
/// # Errors
///
/// Returns [`PkiError::TokenExpired`] if `exp <= now`.
pub fn validate_claims(token: &Token) -> PkiResult<()> {
    if token.expires_at <= Utc::now().timestamp() {
        return Err(PkiError::TokenExpired);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn hour_from_now() -> DateTime<Utc> {
        Utc::now() + Duration::hours(1)
    }

    #[test]
    fn test_issue_and_parse_with_key() {
        let key = PrivateKey::generate().unwrap();
        let exp = hour_from_now();

        let raw = issue(&key, "authz", exp, TokenClaims::new("svc-a", "authz")).unwrap();
        let token = parse(raw.as_bytes(), Some(&key.public_key().unwrap())).unwrap();

        assert_eq!(token.header.alg, "ES512");
        assert_eq!(token.claims, TokenClaims::new("svc-a", "authz"));
        assert_eq!(token.issuer, "authz");
        assert_eq!(token.expires_at, exp.timestamp());
        assert!(token.issued_at <= Utc::now().timestamp());
        validate_claims(&token).unwrap();
    }

    #[test]
    fn test_parse_without_key_is_structural() {
        let key = PrivateKey::generate().unwrap();
        let raw = issue(&key, "authz", hour_from_now(), TokenClaims::new("svc-a", "authz")).unwrap();

        let token = parse(raw.as_bytes(), None).unwrap();
        assert_eq!(token.claims.service, "svc-a");
    }

    #[test]
    fn test_parse_with_wrong_key_fails() {
        let key = PrivateKey::generate().unwrap();
        let other = PrivateKey::generate().unwrap().public_key().unwrap();
        let raw = issue(&key, "authz", hour_from_now(), TokenClaims::new("svc-a", "authz")).unwrap();

        assert!(matches!(parse(raw.as_bytes(), Some(&other)), Err(PkiError::InvalidToken(_))));
    }

    #[test]
    fn test_tampered_claims_fail_signature() {
        let key = PrivateKey::generate().unwrap();
        let raw = issue(&key, "authz", hour_from_now(), TokenClaims::new("svc-a", "authz")).unwrap();

        let parts: Vec<&str> = raw.split('.').collect();
        let forged = serde_json::json!({
            "service": "svc-b", "authz": "authz", "iss": "authz", "iat": 0, "exp": i64::MAX
        });
        let forged = format!("{}.{}.{}", parts[0], URL_SAFE_NO_PAD.encode(forged.to_string()), parts[2]);

        assert!(matches!(
            parse(forged.as_bytes(), Some(&key.public_key().unwrap())),
            Err(PkiError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_wrong_segment_count() {
        assert!(matches!(parse(b"a.b", None), Err(PkiError::InvalidToken(_))));
        assert!(matches!(parse(b"a.b.c.d", None), Err(PkiError::InvalidToken(_))));
        assert!(matches!(parse(b"", None), Err(PkiError::InvalidToken(_))));
    }

    #[test]
    fn test_missing_claim_is_invalid_claim() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"ES512","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(r#"{"authz":"authz","iss":"authz","iat":0,"exp":1}"#);
        let raw = format!("{header}.{payload}.");

        assert!(matches!(parse(raw.as_bytes(), None), Err(PkiError::InvalidClaim(_))));
    }

    #[test]
    fn test_empty_service_claim_is_invalid_claim() {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"ES512"}"#);
        let payload =
            URL_SAFE_NO_PAD.encode(r#"{"service":"","authz":"authz","iss":"authz","iat":0,"exp":1}"#);
        let raw = format!("{header}.{payload}.");

        let err = parse(raw.as_bytes(), None).unwrap_err();
        assert_eq!(err.to_string(), "Invalid claim: service");
    }

    #[test]
    fn test_issue_rejects_empty_claims() {
        let key = PrivateKey::generate().unwrap();
        assert!(matches!(
            issue(&key, "authz", hour_from_now(), TokenClaims::new("", "authz")),
            Err(PkiError::InvalidClaim(_))
        ));
        assert!(matches!(
            issue(&key, "authz", hour_from_now(), TokenClaims::new("svc", "")),
            Err(PkiError::InvalidClaim(_))
        ));
    }

    #[test]
    fn test_expired_token_fails_validation() {
        let key = PrivateKey::generate().unwrap();
        let raw = issue(
            &key,
            "authz",
            Utc::now() - Duration::minutes(1),
            TokenClaims::new("svc-a", "authz"),
        )
        .unwrap();

        let token = parse(raw.as_bytes(), Some(&key.public_key().unwrap())).unwrap();
        assert!(matches!(validate_claims(&token), Err(PkiError::TokenExpired)));
    }

    #[test]
    fn test_expiry_helper() {
        let key = PrivateKey::generate().unwrap();
        let exp = hour_from_now();
        let raw = issue(&key, "authz", exp, TokenClaims::new("svc-a", "authz")).unwrap();

        let token = parse(raw.as_bytes(), None).unwrap();
        assert_eq!(token.expiry().map(|e| e.timestamp()), Some(exp.timestamp()));
    }
}
