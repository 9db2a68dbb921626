//! Full onboarding and token flow: a root CA, an Authorization service
//! enrolled under it, and a service signing up, logging in and presenting
//! its token.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use chrono::Utc;
use fleetauth_authority::{
    AuthorizationService, AuthzConfig, CaConfig, CertificateAuthority, InMemoryMetrics, Outcome,
    SigningIdentity, Status,
    messages::{AuthRequest, CertificateRequest, LoginRequest, SignUpResponse, TokenRequest, VerificationRequest},
};
use fleetauth_pki::{Certificate, PrivateKey, keys, testutil::generate_keypair};
use fleetauth_storage::{Repository, testutil::memory_repository};

const AUTHZ: &str = "authz.internal";

struct Deployment {
    ca: CertificateAuthority,
    authz: AuthorizationService,
    metrics: Arc<InMemoryMetrics>,
}

async fn deploy() -> Deployment {
    let (ca_repository, _) = memory_repository();
    let ca = CertificateAuthority::builder()
        .config(CaConfig::builder().name("fleet-root").intermediate_services(vec![AUTHZ.to_owned()]).build().unwrap())
        .repository(Arc::new(ca_repository))
        .build()
        .unwrap();

    let identity = SigningIdentity::enroll(&ca, AUTHZ).await.unwrap();
    let (authz_repository, _) = memory_repository();
    let metrics = Arc::new(InMemoryMetrics::new());
    let authz = AuthorizationService::builder()
        .config(AuthzConfig::builder().name(AUTHZ).build().unwrap())
        .identity(identity)
        .repository(Arc::new(authz_repository))
        .metrics(metrics.clone())
        .build();

    Deployment { ca, authz, metrics }
}

fn login_request(service: &str, public_pem: &[u8], signed_up: &SignUpResponse) -> LoginRequest {
    LoginRequest {
        service: service.to_owned(),
        public_key: public_pem.to_vec(),
        certificate: signed_up.certificate.certificate.clone(),
        authz_public_key: signed_up.service_public_key.clone(),
        authz_certificate: signed_up.service_certificate.clone(),
    }
}

fn sign(challenge: &[u8], key: &PrivateKey) -> Vec<u8> {
    keys::sign_message(challenge, key).unwrap()
}

fn repository(d: &Deployment) -> &Repository {
    d.authz.repository()
}

#[tokio::test]
async fn test_sign_up_login_token_verify_revoke() {
    let d = deploy().await;
    let (key, public) = generate_keypair();
    let public_pem = keys::encode_public(&public).unwrap();

    let signed_up = d.authz.sign_up(&CertificateRequest::new("svc-a", public_pem.clone())).await.unwrap();

    let login = d.authz.login(&login_request("svc-a", &public_pem, &signed_up)).await.unwrap();
    let ten_minutes = 10 * 60 * 1000;
    let remaining = login.expires_on - Utc::now().timestamp_millis();
    assert!(remaining > ten_minutes - 5_000 && remaining <= ten_minutes, "remaining {remaining}ms");

    let issued = d
        .authz
        .token(&TokenRequest { service: "svc-a".into(), signed_challenge: sign(&login.challenge, &key) })
        .await
        .unwrap();
    let one_hour = 60 * 60 * 1000;
    let remaining = issued.expires_on - Utc::now().timestamp_millis();
    assert!(remaining > one_hour - 5_000 && remaining <= one_hour, "remaining {remaining}ms");
    assert!(repository(&d).get_challenge("svc-a").await.unwrap_err().is_not_found(), "challenge consumed");

    let auth = d.authz.verify_token(&AuthRequest { token: issued.token.clone() }).await.unwrap();
    assert_eq!(auth.service, "svc-a");

    repository(&d).delete_token("svc-a", issued.token.as_bytes()).await.unwrap();
    let err = d.authz.verify_token(&AuthRequest { token: issued.token }).await.unwrap_err();
    assert_eq!(err.status(), Status::InvalidArgument);

    let snapshot = d.metrics.snapshot();
    assert_eq!(snapshot.count("verify_token", Outcome::Success), 1);
    assert_eq!(snapshot.count("verify_token", Outcome::Failure(Status::InvalidArgument)), 1);
}

#[tokio::test]
async fn test_issued_certificates_chain_to_the_ca_root() {
    let d = deploy().await;
    let (_, public) = generate_keypair();
    let signed_up =
        d.authz.sign_up(&CertificateRequest::new("svc-a", keys::encode_public(&public).unwrap())).await.unwrap();

    let anchors = d.ca.root_certificate().await.unwrap();
    let root = Certificate::from_pem(&anchors.root).unwrap();
    let authz_certificate = Certificate::from_pem(&signed_up.service_certificate).unwrap();

    let chain = fleetauth_pki::certificate::verify(
        &signed_up.certificate.certificate,
        Some(&root),
        &[authz_certificate],
    )
    .unwrap();
    assert_eq!(chain.len(), 3);

    // The CA alone cannot vouch for the leaf without the intermediate.
    let verdict = d
        .ca
        .verify_certificate(&VerificationRequest { certificate: signed_up.certificate.certificate.clone() })
        .await
        .unwrap();
    assert!(!verdict.valid);

    let verdict = d
        .authz
        .verify_certificate(&VerificationRequest { certificate: signed_up.certificate.certificate })
        .await
        .unwrap();
    assert!(verdict.valid);
}

#[tokio::test]
async fn test_sign_up_twice_creates_nothing_new() {
    let d = deploy().await;
    let (_, public) = generate_keypair();
    let request = CertificateRequest::new("svc-a", keys::encode_public(&public).unwrap());

    let first = d.authz.sign_up(&request).await.unwrap();
    let second = d.authz.sign_up(&request).await.unwrap();

    assert_eq!(first.certificate.certificate, second.certificate.certificate);
    assert_eq!(repository(&d).list_certificates("svc-a").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_login_with_certificate_from_foreign_authority() {
    let d = deploy().await;
    let other = deploy().await;
    let (_, public) = generate_keypair();
    let public_pem = keys::encode_public(&public).unwrap();

    let ours = d.authz.sign_up(&CertificateRequest::new("svc-a", public_pem.clone())).await.unwrap();
    let theirs = other.authz.sign_up(&CertificateRequest::new("svc-a", public_pem.clone())).await.unwrap();

    let mut request = login_request("svc-a", &public_pem, &ours);
    request.certificate = theirs.certificate.certificate;
    let err = d.authz.login(&request).await.unwrap_err();
    assert_eq!(err.status(), Status::InvalidArgument);
    assert_eq!(err.to_string(), "authz: invalid certificate");
}

#[tokio::test]
async fn test_deleting_service_revokes_everything() {
    let d = deploy().await;
    let (key, public) = generate_keypair();
    let public_pem = keys::encode_public(&public).unwrap();

    let signed_up = d.authz.sign_up(&CertificateRequest::new("svc-a", public_pem.clone())).await.unwrap();
    let login = d.authz.login(&login_request("svc-a", &public_pem, &signed_up)).await.unwrap();
    let issued = d
        .authz
        .token(&TokenRequest { service: "svc-a".into(), signed_challenge: sign(&login.challenge, &key) })
        .await
        .unwrap();

    d.authz
        .delete_service(&fleetauth_authority::messages::DeleteServiceRequest {
            service: "svc-a".into(),
            public_key: public_pem.clone(),
        })
        .await
        .unwrap();

    let err = d.authz.authenticate(&format!("Bearer {}", issued.token)).await.unwrap_err();
    assert_eq!(err.status(), Status::InvalidArgument);

    let err = d.authz.login(&login_request("svc-a", &public_pem, &signed_up)).await.unwrap_err();
    assert_eq!(err.status(), Status::NotFound);
}

#[tokio::test]
async fn test_enroll_requires_intermediate_permission() {
    let (repository, _) = memory_repository();
    let ca = CertificateAuthority::builder()
        .config(CaConfig::default())
        .repository(Arc::new(repository))
        .build()
        .unwrap();

    let err = SigningIdentity::enroll(&ca, AUTHZ).await.unwrap_err();
    assert_eq!(err.status(), Status::InvalidArgument);
    assert_eq!(err.to_string(), "ca: invalid certificate request");
}
