//! Certificate Authority service.
//!
//! [`CertificateAuthority`] issues leaf certificates to registered services,
//! caps how many may be live per service, and verifies and deletes them on
//! the owner's behalf. Ownership is proved by presenting the public key the
//! service registered with.
//!
//! | Operation | Checks | Failure |
//! |-----------|--------|---------|
//! | [`register_service`](CertificateAuthority::register_service) | key matches an existing service | `PermissionDenied` |
//! | [`create_certificate`](CertificateAuthority::create_certificate) | ownership, cap | returns latest when capped |
//! | [`list_certificates`](CertificateAuthority::list_certificates) | ownership | `NotFound` when none are live |
//! | [`delete_certificate`](CertificateAuthority::delete_certificate) | ownership, chain | `InvalidArgument` for foreign certificates |
//! | [`delete_service`](CertificateAuthority::delete_service) | ownership | cascades |
//!
//! The same type backs the Authorization service's certificate surface, with
//! errors reported under that service's [`Domain`].

use std::sync::Arc;

use async_trait::async_trait;
use fleetauth_pki::{CertificateRequest as RequestDescriptor, PkiError, PublicKey, SigningRequest, keys};
use fleetauth_storage::Repository;

use crate::{
    config::CaConfig,
    error::{Domain, ServiceError, ServiceResult},
    identity::SigningIdentity,
    messages::{
        CertificateRequest, CertificateResponse, DeleteCertificateRequest, DeleteServiceRequest,
        DeletionResponse, ListCertificatesResponse, PublicKeyResponse, RootCertificateResponse,
        VerificationRequest, VerificationResponse, epoch_millis,
    },
    metrics::{Metrics, NoopMetrics, track},
};

/// The part of a CA another authority needs to enroll with it.
#[async_trait]
pub trait CertificateIssuer: Send + Sync {
    /// Registers a service and returns its certificate.
    async fn register(&self, request: &CertificateRequest) -> ServiceResult<CertificateResponse>;

    /// Returns the issuer's trust anchors.
    async fn root_certificate(&self) -> ServiceResult<RootCertificateResponse>;
}

/// Issues and manages service certificates.
pub struct CertificateAuthority {
    domain: Domain,
    identity: Arc<SigningIdentity>,
    repository: Arc<Repository>,
    config: CaConfig,
    metrics: Arc<dyn Metrics>,
}

impl std::fmt::Debug for CertificateAuthority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateAuthority")
            .field("domain", &self.domain)
            .field("identity", &self.identity.certificate())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[bon::bon]
impl CertificateAuthority {
    /// Creates a CA.
    ///
    /// Without an `identity`, a key and a self-signed root named after
    /// [`CaConfig::name`] are generated.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Internal`] if the root cannot be generated.
    #[builder]
    pub fn new(
        config: CaConfig,
        repository: Arc<Repository>,
        identity: Option<SigningIdentity>,
        metrics: Option<Arc<dyn Metrics>>,
    ) -> ServiceResult<Self> {
        let identity = match identity {
            Some(identity) => identity,
            None => SigningIdentity::self_signed(config.name(), config.root_validity_months())
                .map_err(ServiceError::own_key(Domain::Ca, "root certificate"))?,
        };
        tracing::info!(
            name = config.name(),
            serial = ?identity.certificate().serial_hex().ok(),
            "certificate authority ready"
        );
        Ok(Self::embedded(
            Domain::Ca,
            config,
            Arc::new(identity),
            repository,
            metrics.unwrap_or_else(|| Arc::new(NoopMetrics)),
        ))
    }
}

impl CertificateAuthority {
    /// A CA reporting errors under `domain`, for services that sign with
    /// their own identity.
    pub(crate) fn embedded(
        domain: Domain,
        config: CaConfig,
        identity: Arc<SigningIdentity>,
        repository: Arc<Repository>,
        metrics: Arc<dyn Metrics>,
    ) -> Self {
        Self { domain, identity, repository, config, metrics }
    }

    /// Signing identity.
    #[must_use]
    pub fn identity(&self) -> &SigningIdentity {
        &self.identity
    }

    /// Issuance policy.
    #[must_use]
    pub fn config(&self) -> &CaConfig {
        &self.config
    }

    /// Backing repository.
    #[must_use]
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Registers a service, or re-registers a known one, and returns a
    /// certificate for it.
    ///
    /// A known service must present the key it registered with. If it
    /// already holds a live certificate, the latest one is returned and
    /// nothing is issued.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Invalid`] for a malformed request or key
    /// - [`ServiceError::PermissionDenied`] for a key mismatch
    #[tracing::instrument(skip_all, fields(service = %request.service))]
    pub async fn register_service(&self, request: &CertificateRequest) -> ServiceResult<CertificateResponse> {
        track(self.metrics.as_ref(), "register", self.register_or_reuse(request)).await
    }

    /// Issues another certificate for a registered service.
    ///
    /// Once the service holds [`CaConfig::certificate_limit`] live
    /// certificates, the one expiring last is returned instead.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::Invalid`] for a malformed request or key
    /// - [`ServiceError::NotFound`] for unknown services
    /// - [`ServiceError::PermissionDenied`] for a key mismatch
    #[tracing::instrument(skip_all, fields(service = %request.service))]
    pub async fn create_certificate(&self, request: &CertificateRequest) -> ServiceResult<CertificateResponse> {
        track(self.metrics.as_ref(), "create_certificate", async {
            request.validate(self.domain)?;
            self.check_ca_request(request)?;
            let public = self.authorize(&request.service, &request.public_key).await?;

            let live = self
                .repository
                .list_certificates(&request.service)
                .await
                .map_err(ServiceError::repository(self.domain, "certificate"))?;
            let limit = self.config.certificate_limit();
            if let Some(latest) = live.first().filter(|_| live.len() >= limit) {
                tracing::debug!(live = live.len(), limit, "certificate limit reached, returning latest");
                return Ok(CertificateResponse::from(latest));
            }

            self.issue_and_store(&request.service, public, request.signing_request.as_ref()).await
        })
        .await
    }

    /// Lists a service's live certificates, latest expiry first.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] for unknown services or when none are live
    /// - [`ServiceError::PermissionDenied`] for a key mismatch
    #[tracing::instrument(skip_all, fields(service = %request.service))]
    pub async fn list_certificates(&self, request: &CertificateRequest) -> ServiceResult<ListCertificatesResponse> {
        track(self.metrics.as_ref(), "list_certificates", async {
            request.validate(self.domain)?;
            self.authorize(&request.service, &request.public_key).await?;

            let live = self
                .repository
                .list_certificates(&request.service)
                .await
                .map_err(ServiceError::repository(self.domain, "certificate"))?;
            if live.is_empty() {
                return Err(ServiceError::NotFound { domain: self.domain, entity: "certificate" });
            }
            Ok(ListCertificatesResponse { certificates: live.iter().map(CertificateResponse::from).collect() })
        })
        .await
    }

    /// Deletes one of a service's certificates.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::PermissionDenied`] for a key mismatch
    /// - [`ServiceError::Invalid`] if the certificate was not issued under this authority
    /// - [`ServiceError::DeleteFailed`] if the service does not hold it
    #[tracing::instrument(skip_all, fields(service = %request.service))]
    pub async fn delete_certificate(&self, request: &DeleteCertificateRequest) -> ServiceResult<DeletionResponse> {
        track(self.metrics.as_ref(), "delete_certificate", async {
            request.validate(self.domain)?;
            self.authorize(&request.service, &request.public_key).await?;
            self.identity
                .verify(&request.certificate)
                .map_err(ServiceError::invalid_input(self.domain, "certificate"))?;

            self.repository
                .delete_certificate(&request.service, &request.certificate)
                .await
                .map_err(ServiceError::repository(self.domain, "certificate"))?;
            Ok(DeletionResponse::default())
        })
        .await
    }

    /// Checks whether a certificate chains to this authority.
    ///
    /// A certificate that does not chain is a normal answer, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Invalid`] for an empty request.
    #[tracing::instrument(skip_all)]
    pub async fn verify_certificate(&self, request: &VerificationRequest) -> ServiceResult<VerificationResponse> {
        track(self.metrics.as_ref(), "verify_certificate", async {
            request.validate(self.domain)?;
            Ok(match self.identity.verify(&request.certificate) {
                Ok(_) => VerificationResponse { valid: true, reason: None },
                Err(err) => {
                    tracing::debug!(error = %err, "certificate does not verify");
                    VerificationResponse { valid: false, reason: Some(err.to_string()) }
                },
            })
        })
        .await
    }

    /// Deletes a service with all its certificates, challenge and tokens.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] for unknown services
    /// - [`ServiceError::PermissionDenied`] for a key mismatch
    #[tracing::instrument(skip_all, fields(service = %request.service))]
    pub async fn delete_service(&self, request: &DeleteServiceRequest) -> ServiceResult<DeletionResponse> {
        track(self.metrics.as_ref(), "delete_service", async {
            request.validate(self.domain)?;
            self.authorize(&request.service, &request.public_key).await?;
            self.repository
                .delete_service(&request.service)
                .await
                .map_err(ServiceError::repository(self.domain, "service"))?;
            tracing::info!("service deleted");
            Ok(DeletionResponse::default())
        })
        .await
    }

    /// The root certificate and any intermediates leaves are issued under.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Internal`] if encoding fails.
    #[tracing::instrument(skip_all)]
    pub async fn root_certificate(&self) -> ServiceResult<RootCertificateResponse> {
        track(self.metrics.as_ref(), "root_certificate", async {
            self.identity.anchors().map_err(ServiceError::own_key(self.domain, "root certificate"))
        })
        .await
    }

    /// The public key certificates are signed with.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Internal`] if encoding fails.
    #[tracing::instrument(skip_all)]
    pub async fn public_key(&self) -> ServiceResult<PublicKeyResponse> {
        track(self.metrics.as_ref(), "public_key", async {
            let public_key = self
                .identity
                .public_key()
                .and_then(|key| keys::encode_public(&key))
                .map_err(ServiceError::own_key(self.domain, "public key"))?;
            Ok(PublicKeyResponse { public_key })
        })
        .await
    }

    // ---------------------------------------------------------------------
    // internals
    // ---------------------------------------------------------------------

    /// Registration without its own metrics entry; sign-up reports under
    /// its own operation name.
    pub(crate) async fn register_or_reuse(&self, request: &CertificateRequest) -> ServiceResult<CertificateResponse> {
        request.validate(self.domain)?;
        self.check_ca_request(request)?;
        let public = keys::decode_public(&request.public_key)
            .map_err(ServiceError::invalid_input(self.domain, "public key"))?;

        match self.repository.get_service(&request.service).await {
            Ok(record) => {
                self.check_owner(&record.public_key, &public)?;
                let live = self
                    .repository
                    .list_certificates(&request.service)
                    .await
                    .map_err(ServiceError::repository(self.domain, "certificate"))?;
                if let Some(latest) = live.first() {
                    tracing::debug!("service already registered, returning latest certificate");
                    return Ok(CertificateResponse::from(latest));
                }
            },
            Err(err) if err.is_not_found() => {
                let encoded =
                    keys::encode_public(&public).map_err(ServiceError::invalid_input(self.domain, "public key"))?;
                self.repository
                    .create_service(&request.service, &encoded)
                    .await
                    .map_err(ServiceError::repository(self.domain, "service"))?;
                tracing::info!("service registered");
            },
            Err(err) => return Err(ServiceError::repository(self.domain, "service")(err)),
        }

        self.issue_and_store(&request.service, public, request.signing_request.as_ref()).await
    }

    /// Checks that `presented_pem` is the key `service` registered with.
    pub(crate) async fn authorize(&self, service: &str, presented_pem: &[u8]) -> ServiceResult<PublicKey> {
        let presented =
            keys::decode_public(presented_pem).map_err(ServiceError::invalid_input(self.domain, "public key"))?;
        let record = self
            .repository
            .get_service(service)
            .await
            .map_err(ServiceError::repository(self.domain, "service"))?;
        self.check_owner(&record.public_key, &presented)?;
        Ok(presented)
    }

    fn check_owner(&self, stored_pem: &[u8], presented: &PublicKey) -> ServiceResult<()> {
        let stored = keys::decode_public(stored_pem).map_err(ServiceError::own_key(self.domain, "service"))?;
        if &stored != presented {
            return Err(ServiceError::PermissionDenied { domain: self.domain, entity: "public key" });
        }
        Ok(())
    }

    fn check_ca_request(&self, request: &CertificateRequest) -> ServiceResult<()> {
        let wants_ca = request.signing_request.as_ref().is_some_and(|r| r.is_ca);
        if wants_ca && !self.config.may_issue_ca(&request.service) {
            tracing::warn!("CA certificate requested by a service not allowed to hold one");
            return Err(ServiceError::invalid(self.domain, "certificate request"));
        }
        Ok(())
    }

    async fn issue_and_store(
        &self,
        service: &str,
        public: PublicKey,
        signing_request: Option<&SigningRequest>,
    ) -> ServiceResult<CertificateResponse> {
        let (template, public) = RequestDescriptor::build(service, public, signing_request)
            .into_template(self.config.certificate_validity_months());
        let certificate = self.identity.issue(&template, &public).map_err(|err| match err {
            PkiError::InvalidEncoding { .. } => {
                ServiceError::invalid_with_source(self.domain, "certificate request", err)
            },
            other => ServiceError::internal(self.domain, "certificate", other),
        })?;

        let pem = certificate.to_pem().map_err(ServiceError::own_key(self.domain, "certificate"))?;
        let expires_at = certificate.not_after().map_err(ServiceError::own_key(self.domain, "certificate"))?;
        let record = self
            .repository
            .create_certificate(service, &pem, expires_at)
            .await
            .map_err(ServiceError::repository(self.domain, "certificate"))?;

        tracing::info!(
            serial = ?certificate.serial_hex().ok(),
            expires_on = epoch_millis(expires_at),
            is_ca = template.is_ca,
            "certificate issued"
        );
        Ok(CertificateResponse::from(&record))
    }
}

#[async_trait]
impl CertificateIssuer for CertificateAuthority {
    async fn register(&self, request: &CertificateRequest) -> ServiceResult<CertificateResponse> {
        self.register_service(request).await
    }

    async fn root_certificate(&self) -> ServiceResult<RootCertificateResponse> {
        CertificateAuthority::root_certificate(self).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use fleetauth_pki::{Certificate, testutil::generate_keypair};
    use fleetauth_storage::testutil::memory_repository;

    use super::*;
    use crate::{error::Status, metrics::{InMemoryMetrics, Outcome}};

    fn authority() -> CertificateAuthority {
        let (repository, _) = memory_repository();
        CertificateAuthority::builder()
            .config(CaConfig::builder().name("test-root").build().unwrap())
            .repository(Arc::new(repository))
            .build()
            .unwrap()
    }

    fn request(service: &str, public: &PublicKey) -> CertificateRequest {
        CertificateRequest::new(service, keys::encode_public(public).unwrap())
    }

    #[tokio::test]
    async fn test_register_issues_leaf_under_root() {
        let ca = authority();
        let (_, public) = generate_keypair();

        let issued = ca.register_service(&request("svc-a", &public)).await.unwrap();
        let certificate = Certificate::from_pem(&issued.certificate).unwrap();

        assert_eq!(certificate.common_name().as_deref(), Some("svc-a"));
        assert_eq!(certificate.public_key().unwrap(), public);
        assert_eq!(issued.expires_on, certificate.not_after().unwrap().timestamp_millis());
        ca.identity().verify(&issued.certificate).unwrap();
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let ca = authority();
        let (_, public) = generate_keypair();

        let first = ca.register_service(&request("svc-a", &public)).await.unwrap();
        let second = ca.register_service(&request("svc-a", &public)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(ca.repository().list_certificates("svc-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_rejects_other_key() {
        let ca = authority();
        let (_, owner) = generate_keypair();
        let (_, intruder) = generate_keypair();

        ca.register_service(&request("svc-a", &owner)).await.unwrap();
        let err = ca.register_service(&request("svc-a", &intruder)).await.unwrap_err();

        assert!(matches!(err, ServiceError::PermissionDenied { domain: Domain::Ca, entity: "public key" }));
        assert_eq!(err.status(), Status::PermissionDenied);
    }

    #[tokio::test]
    async fn test_register_rejects_garbage_key() {
        let ca = authority();
        let err = ca.register_service(&CertificateRequest::new("svc-a", b"not a key".to_vec())).await.unwrap_err();
        assert_eq!(err.to_string(), "ca: invalid public key");
    }

    #[tokio::test]
    async fn test_certificate_cap_returns_latest() {
        let ca = authority();
        let (_, public) = generate_keypair();
        let req = request("svc-a", &public);

        ca.register_service(&req).await.unwrap();
        let second = ca.create_certificate(&req).await.unwrap();
        let third = ca.create_certificate(&req).await.unwrap();

        let live = ca.repository().list_certificates("svc-a").await.unwrap();
        assert_eq!(live.len(), 2);
        assert_eq!(third.certificate, live[0].certificate);
        assert!(live.iter().any(|r| r.certificate == second.certificate));
    }

    #[tokio::test]
    async fn test_create_certificate_requires_registration() {
        let ca = authority();
        let (_, public) = generate_keypair();
        let err = ca.create_certificate(&request("ghost", &public)).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound { entity: "service", .. }));
    }

    #[tokio::test]
    async fn test_list_certificates() {
        let ca = authority();
        let (_, public) = generate_keypair();
        let req = request("svc-a", &public);

        ca.register_service(&req).await.unwrap();
        ca.create_certificate(&req).await.unwrap();

        let listed = ca.list_certificates(&req).await.unwrap();
        assert_eq!(listed.certificates.len(), 2);
        assert!(listed.certificates[0].expires_on >= listed.certificates[1].expires_on);
    }

    #[tokio::test]
    async fn test_list_certificates_not_found_when_none_live() {
        let ca = authority();
        let (_, public) = generate_keypair();
        let req = request("svc-a", &public);

        let issued = ca.register_service(&req).await.unwrap();
        ca.delete_certificate(&DeleteCertificateRequest {
            service: "svc-a".into(),
            public_key: req.public_key.clone(),
            certificate: issued.certificate,
        })
        .await
        .unwrap();

        let err = ca.list_certificates(&req).await.unwrap_err();
        assert_eq!(err.status(), Status::NotFound);
        assert_eq!(err.to_string(), "ca: certificate not found");
    }

    #[tokio::test]
    async fn test_delete_certificate_rejects_foreign_certificate() {
        let ca = authority();
        let other = authority();
        let (_, public) = generate_keypair();
        let req = request("svc-a", &public);

        ca.register_service(&req).await.unwrap();
        let foreign = other.register_service(&req).await.unwrap();

        let err = ca
            .delete_certificate(&DeleteCertificateRequest {
                service: "svc-a".into(),
                public_key: req.public_key.clone(),
                certificate: foreign.certificate,
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ca: invalid certificate");
        assert_eq!(ca.repository().list_certificates("svc-a").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_verify_certificate() {
        let ca = authority();
        let other = authority();
        let (_, public) = generate_keypair();

        let ours = ca.register_service(&request("svc-a", &public)).await.unwrap();
        let theirs = other.register_service(&request("svc-a", &public)).await.unwrap();

        let ok = ca.verify_certificate(&VerificationRequest { certificate: ours.certificate }).await.unwrap();
        assert!(ok.valid);
        assert!(ok.reason.is_none());

        let bad = ca.verify_certificate(&VerificationRequest { certificate: theirs.certificate }).await.unwrap();
        assert!(!bad.valid);
        assert!(bad.reason.is_some());
    }

    #[tokio::test]
    async fn test_delete_service_checks_owner_and_cascades() {
        let ca = authority();
        let (_, owner) = generate_keypair();
        let (_, intruder) = generate_keypair();
        ca.register_service(&request("svc-a", &owner)).await.unwrap();

        let denied = ca
            .delete_service(&DeleteServiceRequest {
                service: "svc-a".into(),
                public_key: keys::encode_public(&intruder).unwrap(),
            })
            .await
            .unwrap_err();
        assert_eq!(denied.status(), Status::PermissionDenied);

        ca.delete_service(&DeleteServiceRequest {
            service: "svc-a".into(),
            public_key: keys::encode_public(&owner).unwrap(),
        })
        .await
        .unwrap();
        assert!(ca.repository().get_service("svc-a").await.unwrap_err().is_not_found());
        assert!(ca.repository().list_certificates("svc-a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ca_certificates_need_permission() {
        let (repository, _) = memory_repository();
        let ca = CertificateAuthority::builder()
            .config(CaConfig::builder().intermediate_services(vec!["authz".to_owned()]).build().unwrap())
            .repository(Arc::new(repository))
            .build()
            .unwrap();
        let (_, public) = generate_keypair();
        let ca_request = SigningRequest { is_ca: true, ..SigningRequest::default() };

        let err = ca
            .register_service(&request("svc-a", &public).with_signing_request(ca_request.clone()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ca: invalid certificate request");
        assert!(ca.repository().get_service("svc-a").await.unwrap_err().is_not_found());

        ca.register_service(&request("authz", &public).with_signing_request(ca_request)).await.unwrap();
    }

    #[tokio::test]
    async fn test_root_and_public_key() {
        let ca = authority();
        let anchors = ca.root_certificate().await.unwrap();
        assert!(anchors.intermediates.is_empty());
        let root = Certificate::from_pem(&anchors.root).unwrap();
        assert_eq!(root.common_name().as_deref(), Some("test-root"));

        let key = ca.public_key().await.unwrap();
        assert_eq!(keys::decode_public(&key.public_key).unwrap(), root.public_key().unwrap());
    }

    #[tokio::test]
    async fn test_operations_are_observed() {
        let (repository, _) = memory_repository();
        let metrics = Arc::new(InMemoryMetrics::new());
        let ca = CertificateAuthority::builder()
            .config(CaConfig::default())
            .repository(Arc::new(repository))
            .metrics(metrics.clone())
            .build()
            .unwrap();
        let (_, public) = generate_keypair();

        ca.register_service(&request("svc-a", &public)).await.unwrap();
        let _ = ca.list_certificates(&request("ghost", &public)).await;

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.count("register", Outcome::Success), 1);
        assert_eq!(snapshot.count("list_certificates", Outcome::Failure(Status::NotFound)), 1);
    }
}
