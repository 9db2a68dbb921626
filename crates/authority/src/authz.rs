//! Authorization service.
//!
//! Services sign up to receive a certificate issued under this service's own
//! identity, then prove possession of their key to obtain bearer tokens:
//!
//! ```text
//!   service                              authz
//!      │  sign_up(name, public key)        │
//!      │ ─────────────────────────────────▶│  issue leaf under own identity
//!      │ ◀──── certificate + authz identity│
//!      │  login(certificate, identities)   │
//!      │ ─────────────────────────────────▶│  store random challenge
//!      │ ◀──────────────────── challenge C │
//!      │  token(sign(SHA-512(C)))          │
//!      │ ─────────────────────────────────▶│  verify, store token, drop C
//!      │ ◀──────────────────────── token T │
//!      │  verify_token(T)                  │
//!      │ ─────────────────────────────────▶│  signature + stored copy
//! ```
//!
//! A token is valid only while an identical copy is stored, so deleting the
//! row revokes it even though its signature still verifies.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetauth_pki::{Certificate, PkiError, PublicKey, TokenClaims, keys, token};
use fleetauth_storage::Repository;

use crate::{
    ca::CertificateAuthority,
    config::AuthzConfig,
    error::{Domain, ServiceError, ServiceResult},
    identity::SigningIdentity,
    messages::{
        AuthRequest, AuthResponse, CertificateRequest, CertificateResponse, DeleteCertificateRequest,
        DeleteServiceRequest, DeletionResponse, ListCertificatesResponse, LoginRequest, LoginResponse,
        RootCertificateResponse, SignUpResponse, TokenRequest, TokenResponse, VerificationRequest,
        VerificationResponse, epoch_millis,
    },
    metrics::{Metrics, NoopMetrics, track},
    random::{OsRandomizer, Randomizer},
};

const DOMAIN: Domain = Domain::Authz;

/// Scheme prefix of the `Authorization` header.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Challenge-response login and token issuance.
pub struct AuthorizationService {
    config: AuthzConfig,
    identity: Arc<SigningIdentity>,
    ca: CertificateAuthority,
    repository: Arc<Repository>,
    randomizer: Arc<dyn Randomizer>,
    metrics: Arc<dyn Metrics>,
}

impl std::fmt::Debug for AuthorizationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationService")
            .field("config", &self.config)
            .field("identity", &self.identity.certificate())
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl AuthorizationService {
    /// Creates the service.
    ///
    /// `identity` must be allowed to sign certificates; obtain one with
    /// [`SigningIdentity::enroll`]. Challenges come from the operating
    /// system unless a `randomizer` is given.
    #[builder]
    pub fn new(
        config: AuthzConfig,
        identity: SigningIdentity,
        repository: Arc<Repository>,
        randomizer: Option<Arc<dyn Randomizer>>,
        metrics: Option<Arc<dyn Metrics>>,
    ) -> Self {
        let identity = Arc::new(identity);
        let metrics = metrics.unwrap_or_else(|| Arc::new(NoopMetrics));
        let randomizer = randomizer.unwrap_or_else(|| Arc::new(OsRandomizer::new(config.challenge_size())));
        let ca = CertificateAuthority::embedded(
            DOMAIN,
            config.ca().clone(),
            Arc::clone(&identity),
            Arc::clone(&repository),
            Arc::clone(&metrics),
        );
        Self { config, identity, ca, repository, randomizer, metrics }
    }
}

impl AuthorizationService {
    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &AuthzConfig {
        &self.config
    }

    /// Signing identity, used for certificates and tokens alike.
    #[must_use]
    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// Backing repository.
    #[must_use]
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Onboards a service.
    ///
    /// Returns the service's certificate together with this service's public
    /// key and certificate, which the caller presents again at login.
    /// Repeating the call with the same name and key returns the same
    /// certificate.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Invalid`] for a malformed request or key
    /// - [`ServiceError::PermissionDenied`] if the name is taken by another key
    #[tracing::instrument(skip_all, fields(service = %request.service))]
    pub async fn sign_up(&self, request: &CertificateRequest) -> ServiceResult<SignUpResponse> {
        track(self.metrics.as_ref(), "sign_up", async {
            let certificate = self.ca.register_or_reuse(request).await?;
            let (service_public_key, service_certificate) = self.own_identity_pem()?;
            Ok(SignUpResponse { certificate, service_public_key, service_certificate })
        })
        .await
    }

    /// Registers a service and returns only its certificate.
    ///
    /// # Errors
    ///
    /// See [`sign_up`](Self::sign_up).
    pub async fn register(&self, request: &CertificateRequest) -> ServiceResult<CertificateResponse> {
        self.ca.register_service(request).await
    }

    /// Starts a login: checks the caller's identity and hands out a
    /// challenge to sign.
    ///
    /// A live challenge is returned unchanged, so retries are safe.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Invalid`] if the presented authz identity is not ours, or the caller
    ///   certificate is malformed or not issued under this service
    /// - [`ServiceError::PermissionDenied`] if the certificate or key does not belong to the
    ///   service
    /// - [`ServiceError::Expired`] for an expired certificate
    /// - [`ServiceError::NotFound`] for unknown services
    #[tracing::instrument(skip_all, fields(service = %request.service))]
    pub async fn login(&self, request: &LoginRequest) -> ServiceResult<LoginResponse> {
        track(self.metrics.as_ref(), "login", async {
            request.validate(DOMAIN)?;
            self.check_own_identity(&request.authz_public_key, &request.authz_certificate)?;
            self.check_caller(request).await?;

            let now = Utc::now();
            match self.repository.get_challenge(&request.service).await {
                Ok(challenge) if challenge.expires_at > now => {
                    tracing::debug!("returning outstanding challenge");
                    return Ok(LoginResponse {
                        challenge: challenge.challenge,
                        expires_on: epoch_millis(challenge.expires_at),
                    });
                },
                Ok(_) => {
                    tracing::debug!("replacing expired challenge");
                    self.repository
                        .delete_challenge(&request.service)
                        .await
                        .map_err(ServiceError::repository(DOMAIN, "challenge"))?;
                },
                Err(err) if err.is_not_found() => {},
                Err(err) => return Err(ServiceError::repository(DOMAIN, "challenge")(err)),
            }

            let challenge = self.randomizer.random()?;
            let expires_at = now + chrono_duration(self.config.challenge_expiry(), "challenge expiry")?;
            let record = self
                .repository
                .create_challenge(&request.service, &challenge, expires_at)
                .await
                .map_err(ServiceError::repository(DOMAIN, "challenge"))?;

            tracing::info!(expires_on = epoch_millis(record.expires_at), "challenge issued");
            Ok(LoginResponse { challenge: record.challenge, expires_on: epoch_millis(record.expires_at) })
        })
        .await
    }

    /// Exchanges a signed challenge for a bearer token.
    ///
    /// The signature must cover `SHA-512(challenge)` under the service's
    /// registered key. The challenge is consumed. If the service already
    /// holds a live token, the one expiring last is returned.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Invalid`] for unknown services or a bad signature
    /// - [`ServiceError::Nil`] when no challenge is outstanding
    /// - [`ServiceError::Expired`] for an expired challenge
    #[tracing::instrument(skip_all, fields(service = %request.service))]
    pub async fn token(&self, request: &TokenRequest) -> ServiceResult<TokenResponse> {
        track(self.metrics.as_ref(), "token", async {
            request.validate(DOMAIN)?;
            let service = &request.service;

            let stored = match self.repository.get_service(service).await {
                Ok(record) => record,
                Err(err) if err.is_not_found() => return Err(ServiceError::invalid(DOMAIN, "service")),
                Err(err) => return Err(ServiceError::repository(DOMAIN, "service")(err)),
            };
            let public = keys::decode_public(&stored.public_key).map_err(ServiceError::own_key(DOMAIN, "service"))?;

            let challenge = match self.repository.get_challenge(service).await {
                Ok(challenge) => challenge,
                Err(err) if err.is_not_found() => {
                    return Err(ServiceError::Nil { domain: DOMAIN, entity: "challenge" });
                },
                Err(err) => return Err(ServiceError::repository(DOMAIN, "challenge")(err)),
            };
            let now = Utc::now();
            if challenge.expires_at <= now {
                return Err(ServiceError::Expired { domain: DOMAIN, entity: "challenge" });
            }

            keys::verify_message(&challenge.challenge, &public, &request.signed_challenge)
                .map_err(ServiceError::invalid_input(DOMAIN, "signature"))?;

            let existing = self
                .repository
                .list_tokens(service)
                .await
                .map_err(ServiceError::repository(DOMAIN, "token"))?;
            let response = match existing.first() {
                Some(latest) => {
                    tracing::debug!(live = existing.len(), "returning live token");
                    TokenResponse {
                        token: token_text(&latest.token)?,
                        expires_on: epoch_millis(latest.expires_at),
                    }
                },
                None => self.issue_token(service, now).await?,
            };

            self.repository
                .delete_challenge(service)
                .await
                .map_err(ServiceError::repository(DOMAIN, "challenge"))?;
            Ok(response)
        })
        .await
    }

    /// Verifies a bearer token.
    ///
    /// The signature must be ours and an identical copy, with the same
    /// expiry, must still be stored for the service it names.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Invalid`] for malformed, foreign or revoked tokens
    /// - [`ServiceError::Expired`] for expired tokens
    /// - [`ServiceError::Nil`] when the service holds no tokens
    #[tracing::instrument(skip_all, fields(service = tracing::field::Empty))]
    pub async fn verify_token(&self, request: &AuthRequest) -> ServiceResult<AuthResponse> {
        track(self.metrics.as_ref(), "verify_token", async {
            request.validate(DOMAIN)?;
            let public = self.identity.public_key().map_err(ServiceError::own_key(DOMAIN, "public key"))?;
            let parsed = token::parse(request.token.as_bytes(), Some(&public))
                .map_err(ServiceError::invalid_input(DOMAIN, "token"))?;

            if parsed.claims.authz != self.config.name() {
                return Err(ServiceError::invalid(DOMAIN, "token issuer"));
            }
            token::validate_claims(&parsed).map_err(|err| match err {
                PkiError::TokenExpired => ServiceError::Expired { domain: DOMAIN, entity: "token" },
                other => ServiceError::invalid_with_source(DOMAIN, "token", other),
            })?;

            let service = &parsed.claims.service;
            tracing::Span::current().record("service", service.as_str());
            let stored = self
                .repository
                .list_tokens(service)
                .await
                .map_err(ServiceError::repository(DOMAIN, "token"))?;
            if stored.is_empty() {
                return Err(ServiceError::Nil { domain: DOMAIN, entity: "tokens" });
            }

            let Some(matching) = stored.iter().find(|r| r.token == request.token.as_bytes()) else {
                tracing::warn!(service = %service, "token is not on record");
                return Err(ServiceError::invalid(DOMAIN, "token"));
            };
            if matching.expires_at.timestamp() != parsed.expires_at {
                return Err(ServiceError::invalid(DOMAIN, "token expiry"));
            }

            Ok(AuthResponse { service: service.clone(), expires_on: epoch_millis(matching.expires_at) })
        })
        .await
    }

    /// Checks an `Authorization: Bearer <token>` header value.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Invalid`] if the header is not a bearer
    /// credential, and any [`verify_token`](Self::verify_token) error.
    pub async fn authenticate(&self, header: &str) -> ServiceResult<AuthResponse> {
        let Some(token) = header.strip_prefix(BEARER_PREFIX) else {
            return Err(ServiceError::invalid(DOMAIN, "authorization header"));
        };
        self.verify_token(&AuthRequest { token: token.trim().to_owned() }).await
    }

    /// Lists a service's live certificates issued by this service.
    ///
    /// # Errors
    ///
    /// See [`CertificateAuthority::list_certificates`].
    pub async fn list_certificates(&self, request: &CertificateRequest) -> ServiceResult<ListCertificatesResponse> {
        self.ca.list_certificates(request).await
    }

    /// Deletes one of a service's certificates.
    ///
    /// # Errors
    ///
    /// See [`CertificateAuthority::delete_certificate`].
    pub async fn delete_certificate(&self, request: &DeleteCertificateRequest) -> ServiceResult<DeletionResponse> {
        self.ca.delete_certificate(request).await
    }

    /// Checks whether a certificate chains to this service's identity.
    ///
    /// # Errors
    ///
    /// See [`CertificateAuthority::verify_certificate`].
    pub async fn verify_certificate(&self, request: &VerificationRequest) -> ServiceResult<VerificationResponse> {
        self.ca.verify_certificate(request).await
    }

    /// Deletes a service along with its certificates, challenge and tokens.
    ///
    /// # Errors
    ///
    /// See [`CertificateAuthority::delete_service`].
    pub async fn delete_service(&self, request: &DeleteServiceRequest) -> ServiceResult<DeletionResponse> {
        self.ca.delete_service(request).await
    }

    /// The root and this service's own certificate.
    ///
    /// # Errors
    ///
    /// See [`CertificateAuthority::root_certificate`].
    pub async fn root_certificate(&self) -> ServiceResult<RootCertificateResponse> {
        self.ca.root_certificate().await
    }

    // ---------------------------------------------------------------------
    // internals
    // ---------------------------------------------------------------------

    fn own_identity_pem(&self) -> ServiceResult<(Vec<u8>, Vec<u8>)> {
        let public = self
            .identity
            .public_key()
            .and_then(|key| keys::encode_public(&key))
            .map_err(ServiceError::own_key(DOMAIN, "public key"))?;
        let certificate =
            self.identity.certificate().to_pem().map_err(ServiceError::own_key(DOMAIN, "certificate"))?;
        Ok((public, certificate))
    }

    /// The caller must be talking to us, not a relay holding another key.
    fn check_own_identity(&self, public_pem: &[u8], certificate_pem: &[u8]) -> ServiceResult<()> {
        let ours = self.identity.public_key().map_err(ServiceError::own_key(DOMAIN, "public key"))?;
        let presented =
            keys::decode_public(public_pem).map_err(ServiceError::invalid_input(DOMAIN, "authz public key"))?;
        if presented != ours {
            return Err(ServiceError::invalid(DOMAIN, "authz public key"));
        }

        let certificate = Certificate::from_pem(certificate_pem)
            .map_err(ServiceError::invalid_input(DOMAIN, "authz certificate"))?;
        if &certificate != self.identity.certificate() {
            return Err(ServiceError::invalid(DOMAIN, "authz certificate"));
        }
        Ok(())
    }

    async fn check_caller(&self, request: &LoginRequest) -> ServiceResult<()> {
        let certificate =
            Certificate::from_pem(&request.certificate).map_err(ServiceError::invalid_input(DOMAIN, "certificate"))?;
        if certificate.common_name().as_deref() != Some(request.service.as_str()) {
            return Err(ServiceError::PermissionDenied { domain: DOMAIN, entity: "certificate" });
        }

        let presented = self.ca.authorize(&request.service, &request.public_key).await?;
        let bound: PublicKey =
            certificate.public_key().map_err(ServiceError::invalid_input(DOMAIN, "certificate"))?;
        if bound != presented {
            return Err(ServiceError::PermissionDenied { domain: DOMAIN, entity: "certificate" });
        }

        let not_after = certificate.not_after().map_err(ServiceError::invalid_input(DOMAIN, "certificate"))?;
        if not_after <= Utc::now() {
            return Err(ServiceError::Expired { domain: DOMAIN, entity: "certificate" });
        }

        self.identity
            .verify(&request.certificate)
            .map_err(ServiceError::invalid_input(DOMAIN, "certificate"))?;
        Ok(())
    }

    async fn issue_token(&self, service: &str, now: DateTime<Utc>) -> ServiceResult<TokenResponse> {
        let expiry = now + chrono_duration(self.config.token_expiry(), "token expiry")?;
        // Stored at the token's own second granularity so the two compare equal.
        let expires_at = DateTime::from_timestamp(expiry.timestamp(), 0).unwrap_or(expiry);

        let name = self.config.name();
        let signed = token::issue(self.identity.key(), name, expires_at, TokenClaims::new(service, name))
            .map_err(ServiceError::own_key(DOMAIN, "token"))?;
        let record = self
            .repository
            .create_token(service, signed.as_bytes(), expires_at)
            .await
            .map_err(ServiceError::repository(DOMAIN, "token"))?;

        tracing::info!(expires_on = epoch_millis(record.expires_at), "token issued");
        Ok(TokenResponse { token: signed, expires_on: epoch_millis(record.expires_at) })
    }
}

fn chrono_duration(duration: std::time::Duration, entity: &'static str) -> ServiceResult<chrono::Duration> {
    chrono::Duration::from_std(duration).map_err(|e| ServiceError::internal(Domain::Config, entity, e))
}

fn token_text(raw: &[u8]) -> ServiceResult<String> {
    String::from_utf8(raw.to_vec()).map_err(|e| ServiceError::internal(DOMAIN, "token", e))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use chrono::Duration as ChronoDuration;
    use fleetauth_pki::{
        PrivateKey,
        testutil::{create_root, generate_keypair, issue_child, issue_expired},
    };
    use fleetauth_storage::testutil::memory_repository;

    use super::*;
    use crate::{config::CaConfig, error::Status};

    /// Yields the same bytes every time.
    struct FixedRandomizer(Vec<u8>);

    impl Randomizer for FixedRandomizer {
        fn random(&self) -> ServiceResult<Vec<u8>> {
            Ok(self.0.clone())
        }
    }

    struct Fixture {
        authz: AuthorizationService,
        key: PrivateKey,
        public_pem: Vec<u8>,
        signed_up: SignUpResponse,
    }

    impl Fixture {
        fn login_request(&self) -> LoginRequest {
            LoginRequest {
                service: "svc-a".into(),
                public_key: self.public_pem.clone(),
                certificate: self.signed_up.certificate.certificate.clone(),
                authz_public_key: self.signed_up.service_public_key.clone(),
                authz_certificate: self.signed_up.service_certificate.clone(),
            }
        }

        fn token_request(&self, challenge: &[u8]) -> TokenRequest {
            TokenRequest {
                service: "svc-a".into(),
                signed_challenge: keys::sign_message(challenge, &self.key).unwrap(),
            }
        }
    }

    fn service(config: AuthzConfig, randomizer: Option<Arc<dyn Randomizer>>) -> AuthorizationService {
        let root = create_root("root");
        let own = issue_child(&root, "authz", true);
        let identity =
            SigningIdentity::from_parts(own.key, own.certificate, Vec::new(), root.certificate).unwrap();
        let (repository, _) = memory_repository();
        AuthorizationService::builder()
            .config(config)
            .identity(identity)
            .repository(Arc::new(repository))
            .maybe_randomizer(randomizer)
            .build()
    }

    async fn signed_up(config: AuthzConfig) -> Fixture {
        let authz = service(config, None);
        let (key, public) = generate_keypair();
        let public_pem = keys::encode_public(&public).unwrap();
        let signed_up = authz.sign_up(&CertificateRequest::new("svc-a", public_pem.clone())).await.unwrap();
        Fixture { authz, key, public_pem, signed_up }
    }

    fn config() -> AuthzConfig {
        AuthzConfig::builder().name("authz").build().unwrap()
    }

    #[tokio::test]
    async fn test_sign_up_returns_own_identity() {
        let fx = signed_up(config()).await;

        assert_eq!(fx.signed_up.service_certificate, fx.authz.identity().certificate().to_pem().unwrap());
        let issued = Certificate::from_pem(&fx.signed_up.certificate.certificate).unwrap();
        assert_eq!(issued.common_name().as_deref(), Some("svc-a"));
        fx.authz.identity().verify(&fx.signed_up.certificate.certificate).unwrap();
    }

    #[tokio::test]
    async fn test_sign_up_is_idempotent() {
        let fx = signed_up(config()).await;
        let again = fx.authz.sign_up(&CertificateRequest::new("svc-a", fx.public_pem.clone())).await.unwrap();

        assert_eq!(again, fx.signed_up);
        assert_eq!(fx.authz.repository().list_certificates("svc-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_login_is_stable_within_expiry() {
        let fx = signed_up(config()).await;

        let first = fx.authz.login(&fx.login_request()).await.unwrap();
        let second = fx.authz.login(&fx.login_request()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.challenge.len(), 64);
    }

    #[tokio::test]
    async fn test_login_replaces_expired_challenge() {
        let fx = signed_up(config()).await;
        fx.authz
            .repository()
            .create_challenge("svc-a", b"stale", Utc::now() - ChronoDuration::seconds(1))
            .await
            .unwrap();

        let fresh = fx.authz.login(&fx.login_request()).await.unwrap();
        assert_ne!(fresh.challenge, b"stale");
        assert!(fresh.expires_on > Utc::now().timestamp_millis());
    }

    #[tokio::test]
    async fn test_login_rejects_impostor_authz_identity() {
        let fx = signed_up(config()).await;
        let (_, other) = generate_keypair();
        let mut request = fx.login_request();
        request.authz_public_key = keys::encode_public(&other).unwrap();

        let err = fx.authz.login(&request).await.unwrap_err();
        assert_eq!(err.to_string(), "authz: invalid authz public key");
        assert_eq!(err.status(), Status::InvalidArgument);
    }

    #[tokio::test]
    async fn test_login_rejects_foreign_key() {
        let fx = signed_up(config()).await;
        let (_, other) = generate_keypair();
        let mut request = fx.login_request();
        request.public_key = keys::encode_public(&other).unwrap();

        let err = fx.authz.login(&request).await.unwrap_err();
        assert_eq!(err.status(), Status::PermissionDenied);
    }

    #[tokio::test]
    async fn test_login_rejects_someone_elses_certificate() {
        let fx = signed_up(config()).await;
        let (_, other) = generate_keypair();
        let other_pem = keys::encode_public(&other).unwrap();
        let svc_b = fx.authz.sign_up(&CertificateRequest::new("svc-b", other_pem)).await.unwrap();

        let mut request = fx.login_request();
        request.certificate = svc_b.certificate.certificate;
        let err = fx.authz.login(&request).await.unwrap_err();
        assert!(matches!(err, ServiceError::PermissionDenied { entity: "certificate", .. }));
    }

    #[tokio::test]
    async fn test_login_rejects_expired_certificate() {
        let fx = signed_up(config()).await;
        let stale = issue_expired(&create_root("elsewhere"), "svc-a", &fx.key.public_key().unwrap());

        let mut request = fx.login_request();
        request.certificate = stale.to_pem().unwrap();
        let err = fx.authz.login(&request).await.unwrap_err();
        assert!(matches!(err, ServiceError::Expired { entity: "certificate", .. }));
        assert_eq!(err.status(), Status::InvalidArgument);
        assert_eq!(err.to_string(), "authz: expired certificate");
        assert!(fx.authz.repository().get_challenge("svc-a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_token_requires_challenge() {
        let fx = signed_up(config()).await;
        let err = fx.authz.token(&fx.token_request(b"anything")).await.unwrap_err();
        assert_eq!(err.to_string(), "authz: no challenge");
    }

    #[tokio::test]
    async fn test_token_rejects_expired_challenge() {
        let fx = signed_up(config()).await;
        fx.authz
            .repository()
            .create_challenge("svc-a", b"stale", Utc::now() - ChronoDuration::seconds(1))
            .await
            .unwrap();

        let err = fx.authz.token(&fx.token_request(b"stale")).await.unwrap_err();
        assert_eq!(err.to_string(), "authz: expired challenge");
    }

    #[tokio::test]
    async fn test_token_rejects_bad_signature() {
        let fx = signed_up(config()).await;
        let challenge = fx.authz.login(&fx.login_request()).await.unwrap().challenge;

        let (stranger, _) = generate_keypair();
        let request = TokenRequest {
            service: "svc-a".into(),
            signed_challenge: keys::sign_message(&challenge, &stranger).unwrap(),
        };
        let err = fx.authz.token(&request).await.unwrap_err();
        assert_eq!(err.to_string(), "authz: invalid signature");
        assert!(fx.authz.repository().get_challenge("svc-a").await.is_ok(), "challenge kept");
    }

    #[tokio::test]
    async fn test_token_unknown_service_is_invalid() {
        let fx = signed_up(config()).await;
        let mut request = fx.token_request(b"x");
        request.service = "ghost".into();
        let err = fx.authz.token(&request).await.unwrap_err();
        assert_eq!(err.to_string(), "authz: invalid service");
    }

    #[tokio::test]
    async fn test_token_reuses_live_token() {
        let fx = signed_up(config()).await;

        let challenge = fx.authz.login(&fx.login_request()).await.unwrap().challenge;
        let first = fx.authz.token(&fx.token_request(&challenge)).await.unwrap();
        assert!(fx.authz.repository().get_challenge("svc-a").await.unwrap_err().is_not_found());

        let challenge = fx.authz.login(&fx.login_request()).await.unwrap().challenge;
        let second = fx.authz.token(&fx.token_request(&challenge)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.authz.repository().list_tokens("svc-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fixed_randomizer_is_used() {
        let authz = service(config(), Some(Arc::new(FixedRandomizer(vec![7; 32]))));
        let (key, public) = generate_keypair();
        let public_pem = keys::encode_public(&public).unwrap();
        let signed_up = authz.sign_up(&CertificateRequest::new("svc-a", public_pem.clone())).await.unwrap();
        let fx = Fixture { authz, key, public_pem, signed_up };

        let login = fx.authz.login(&fx.login_request()).await.unwrap();
        assert_eq!(login.challenge, vec![7; 32]);
    }

    #[tokio::test]
    async fn test_verify_token_and_revocation() {
        let fx = signed_up(config()).await;
        let challenge = fx.authz.login(&fx.login_request()).await.unwrap().challenge;
        let issued = fx.authz.token(&fx.token_request(&challenge)).await.unwrap();

        let auth = fx.authz.verify_token(&AuthRequest { token: issued.token.clone() }).await.unwrap();
        assert_eq!(auth.service, "svc-a");
        assert_eq!(auth.expires_on, issued.expires_on);

        fx.authz.repository().delete_token("svc-a", issued.token.as_bytes()).await.unwrap();
        let err = fx.authz.verify_token(&AuthRequest { token: issued.token }).await.unwrap_err();
        assert_eq!(err.to_string(), "authz: no tokens");
        assert_eq!(err.status(), Status::InvalidArgument);
    }

    #[tokio::test]
    async fn test_verify_token_unmatched_is_explicit() {
        let fx = signed_up(config()).await;
        let challenge = fx.authz.login(&fx.login_request()).await.unwrap().challenge;
        let issued = fx.authz.token(&fx.token_request(&challenge)).await.unwrap();

        // A correctly signed token that was never stored.
        let forged = token::issue(
            fx.authz.identity().key(),
            "authz",
            Utc::now() + ChronoDuration::minutes(5),
            TokenClaims::new("svc-a", "authz"),
        )
        .unwrap();
        assert_ne!(forged, issued.token);

        let err = fx.authz.verify_token(&AuthRequest { token: forged }).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid { entity: "token", .. }));
    }

    #[tokio::test]
    async fn test_verify_token_requires_matching_stored_expiry() {
        let fx = signed_up(config()).await;
        let challenge = fx.authz.login(&fx.login_request()).await.unwrap().challenge;
        let issued = fx.authz.token(&fx.token_request(&challenge)).await.unwrap();

        // Same bytes on record, but with an expiry the token does not carry.
        let repository = fx.authz.repository();
        let stored = repository.list_tokens("svc-a").await.unwrap().remove(0);
        repository.delete_token("svc-a", issued.token.as_bytes()).await.unwrap();
        repository
            .create_token("svc-a", issued.token.as_bytes(), stored.expires_at + ChronoDuration::minutes(30))
            .await
            .unwrap();

        let err = fx.authz.verify_token(&AuthRequest { token: issued.token }).await.unwrap_err();
        assert!(matches!(err, ServiceError::Invalid { entity: "token expiry", .. }));
        assert_eq!(err.status(), Status::InvalidArgument);
    }

    #[tokio::test]
    async fn test_verify_token_rejects_foreign_signer() {
        let fx = signed_up(config()).await;
        let (stranger, _) = generate_keypair();
        let foreign = token::issue(
            &stranger,
            "authz",
            Utc::now() + ChronoDuration::minutes(5),
            TokenClaims::new("svc-a", "authz"),
        )
        .unwrap();

        let err = fx.authz.verify_token(&AuthRequest { token: foreign }).await.unwrap_err();
        assert_eq!(err.to_string(), "authz: invalid token");
    }

    #[tokio::test]
    async fn test_authenticate_header() {
        let fx = signed_up(config()).await;
        let challenge = fx.authz.login(&fx.login_request()).await.unwrap().challenge;
        let issued = fx.authz.token(&fx.token_request(&challenge)).await.unwrap();

        let auth = fx.authz.authenticate(&format!("Bearer {}", issued.token)).await.unwrap();
        assert_eq!(auth.service, "svc-a");

        let err = fx.authz.authenticate(&issued.token).await.unwrap_err();
        assert_eq!(err.to_string(), "authz: invalid authorization header");
    }

    #[tokio::test]
    async fn test_token_expiry_follows_config() {
        let config = AuthzConfig::builder()
            .name("authz")
            .token_expiry(Duration::from_secs(120))
            .ca(CaConfig::default())
            .build()
            .unwrap();
        let fx = signed_up(config).await;
        let challenge = fx.authz.login(&fx.login_request()).await.unwrap().challenge;
        let issued = fx.authz.token(&fx.token_request(&challenge)).await.unwrap();

        let remaining = issued.expires_on - Utc::now().timestamp_millis();
        assert!(remaining <= 120_000 && remaining > 100_000, "remaining {remaining}ms");
    }

    #[tokio::test]
    async fn test_root_certificate_includes_own_certificate() {
        let fx = signed_up(config()).await;
        let anchors = fx.authz.root_certificate().await.unwrap();
        assert_eq!(anchors.intermediates, vec![fx.signed_up.service_certificate.clone()]);
        assert_eq!(anchors.root, fx.authz.identity().root().to_pem().unwrap());
    }
}
