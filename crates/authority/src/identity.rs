//! Key material an authority signs with.
//!
//! A [`SigningIdentity`] is a private key, the certificate binding it, and
//! the chain above that certificate up to a root. A root CA's identity is its
//! self-signed certificate. The Authorization service's identity is a CA
//! certificate issued to it by a root, which makes it an intermediate for
//! everything it signs.

use fleetauth_pki::{
    Certificate, CertificateTemplate, PkiError, PkiResult, PrivateKey, PublicKey, SigningRequest,
    Subject, certificate, keys,
};

use crate::{
    ca::CertificateIssuer,
    error::{Domain, ServiceError, ServiceResult},
    messages::{CertificateRequest, RootCertificateResponse},
};

/// A signing key with its certificate chain.
#[derive(Debug, Clone)]
pub struct SigningIdentity {
    key: PrivateKey,
    certificate: Certificate,
    chain: Vec<Certificate>,
    root: Certificate,
}

impl SigningIdentity {
    /// Generates a key and a self-signed root named `name`.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::Crypto`] if key generation or signing fails.
    pub fn self_signed(name: &str, validity_months: u32) -> PkiResult<Self> {
        let key = PrivateKey::generate()?;
        let template = CertificateTemplate {
            validity_months,
            ..CertificateTemplate::root(Subject::with_common_name(name))
        };
        let root = certificate::self_sign(&template, &key)?;
        Ok(Self { key, certificate: root.clone(), chain: Vec::new(), root })
    }

    /// Assembles an identity from existing key material.
    ///
    /// `chain` lists the certificates between `certificate` and `root`,
    /// nearest first. Pass `certificate == root` for a root identity.
    ///
    /// # Errors
    ///
    /// - [`PkiError::InvalidEncoding`] if `key` does not belong to `certificate`
    /// - [`PkiError::ChainVerification`] if `certificate` does not chain to `root`
    pub fn from_parts(
        key: PrivateKey,
        certificate: Certificate,
        chain: Vec<Certificate>,
        root: Certificate,
    ) -> PkiResult<Self> {
        if certificate.public_key()? != key.public_key()? {
            return Err(PkiError::invalid_encoding("private key"));
        }
        if certificate != root {
            certificate::verify(&certificate.to_pem()?, Some(&root), &chain)?;
        }
        Ok(Self { key, certificate, chain, root })
    }

    /// Generates a key and obtains a CA certificate for it from `issuer`.
    ///
    /// The issuer must allow `name` to hold an intermediate certificate.
    ///
    /// # Errors
    ///
    /// Returns whatever the issuer rejects the request with, and
    /// [`ServiceError::Internal`] if the key cannot be generated or the
    /// issuer's answer does not form a valid chain.
    #[tracing::instrument(skip(issuer))]
    pub async fn enroll(issuer: &dyn CertificateIssuer, name: &str) -> ServiceResult<Self> {
        let domain = Domain::Config;
        let key = PrivateKey::generate().map_err(ServiceError::own_key(domain, "private key"))?;
        let public = key
            .public_key()
            .and_then(|p| keys::encode_public(&p))
            .map_err(ServiceError::own_key(domain, "public key"))?;

        let request = CertificateRequest::new(name, public)
            .with_signing_request(SigningRequest { is_ca: true, ..SigningRequest::default() });
        let issued = issuer.register(&request).await?;
        let anchors = issuer.root_certificate().await?;

        let certificate =
            Certificate::from_pem(&issued.certificate).map_err(ServiceError::own_key(domain, "certificate"))?;
        let root = Certificate::from_pem(&anchors.root).map_err(ServiceError::own_key(domain, "root certificate"))?;
        let chain = anchors
            .intermediates
            .iter()
            .map(|pem| Certificate::from_pem(pem))
            .collect::<PkiResult<Vec<_>>>()
            .map_err(ServiceError::own_key(domain, "intermediate certificate"))?;

        let identity =
            Self::from_parts(key, certificate, chain, root).map_err(ServiceError::own_key(domain, "certificate"))?;
        tracing::info!(expires = ?identity.certificate.not_after().ok(), "enrolled with certificate authority");
        Ok(identity)
    }

    /// The signing key.
    #[must_use]
    pub fn key(&self) -> &PrivateKey {
        &self.key
    }

    /// The certificate binding the signing key.
    #[must_use]
    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// The root at the top of the chain.
    #[must_use]
    pub fn root(&self) -> &Certificate {
        &self.root
    }

    /// Whether this identity is its own root.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.certificate == self.root
    }

    /// The public half of the signing key.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::Crypto`] if the key cannot be converted.
    pub fn public_key(&self) -> PkiResult<PublicKey> {
        self.key.public_key()
    }

    /// Certificates between issued leaves and the root, nearest first.
    #[must_use]
    pub fn intermediates(&self) -> Vec<Certificate> {
        if self.is_root() {
            return self.chain.clone();
        }
        let mut intermediates = Vec::with_capacity(self.chain.len() + 1);
        intermediates.push(self.certificate.clone());
        intermediates.extend(self.chain.iter().cloned());
        intermediates
    }

    /// Verifies that `cert_pem` chains to this identity's root.
    ///
    /// # Errors
    ///
    /// See [`certificate::verify`].
    pub fn verify(&self, cert_pem: &[u8]) -> PkiResult<Vec<Certificate>> {
        certificate::verify(cert_pem, Some(&self.root), &self.intermediates())
    }

    /// Signs a certificate for `public_key` from a template.
    ///
    /// # Errors
    ///
    /// See [`certificate::issue`].
    pub fn issue(&self, template: &CertificateTemplate, public_key: &PublicKey) -> PkiResult<Certificate> {
        certificate::issue(template, &self.certificate, public_key, &self.key)
    }

    /// The trust anchors as PEM.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::Crypto`] if encoding fails.
    pub fn anchors(&self) -> PkiResult<RootCertificateResponse> {
        Ok(RootCertificateResponse {
            root: self.root.to_pem()?,
            intermediates: self.intermediates().iter().map(Certificate::to_pem).collect::<PkiResult<_>>()?,
        })
    }
}
