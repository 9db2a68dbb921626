//! Elliptic-curve keys and raw signatures.
//!
//! All identities use a single scheme: ECDSA over NIST P-521 with SHA-512
//! digests. Keys travel as PEM text blocks:
//!
//! | Key | PEM label | Structure |
//! |-----|-----------|-----------|
//! | Private | `EC PRIVATE KEY` | SEC 1 |
//! | Public | `PUBLIC KEY` | SubjectPublicKeyInfo |
//!
//! Signatures are the fixed-width concatenation `r || s`, each scalar
//! left-padded to [`SCALAR_LEN`] bytes, which is also the JWS `ES512` layout.
//!
//! # Example
//!
//! ```
//! use fleetauth_pki::keys::{self, PrivateKey};
//!
//! let key = PrivateKey::generate()?;
//! let pem = key.public_key()?.to_pem()?;
//! let public = keys::decode_public(&pem)?;
//!
//! let signature = keys::sign_message(b"hello", &key)?;
//! keys::verify_message(b"hello", &public, &signature)?;
//! # Ok::<(), fleetauth_pki::PkiError>(())
//! ```

use std::fmt;

use openssl::{
    bn::{BigNum, BigNumContext},
    ec::{EcGroup, EcKey, PointConversionForm},
    ecdsa::EcdsaSig,
    nid::Nid,
    pkey::{PKey, Private, Public},
    sha::sha512,
};
use zeroize::Zeroizing;

use crate::error::{PkiError, PkiResult};

/// Curve used for every key in the system.
pub const CURVE: Nid = Nid::SECP521R1;

/// Width in bytes of a P-521 scalar.
pub const SCALAR_LEN: usize = 66;

/// Width in bytes of an encoded signature (`r || s`).
pub const SIGNATURE_LEN: usize = SCALAR_LEN * 2;

/// Length of a SHA-512 digest.
pub const DIGEST_LEN: usize = 64;

/// A P-521 private key.
///
/// The `Debug` output never includes key material.
#[derive(Clone)]
pub struct PrivateKey {
    key: EcKey<Private>,
}

/// A P-521 public key.
///
/// Equality compares the encoded point, so two keys decoded from different
/// PEM renderings of the same point are equal.
#[derive(Clone)]
pub struct PublicKey {
    key: EcKey<Public>,
}

fn curve() -> PkiResult<EcGroup> {
    EcGroup::from_curve_name(CURVE).map_err(PkiError::crypto("load curve"))
}

impl PrivateKey {
    /// Generates a new random keypair.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::Crypto`] if the entropy source or crypto backend
    /// fails. This is not retryable.
    pub fn generate() -> PkiResult<Self> {
        let group = curve()?;
        let key = EcKey::generate(&group).map_err(PkiError::crypto("generate key"))?;
        Ok(Self { key })
    }

    /// Derives the public half of this key.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::Crypto`] if the public point cannot be copied.
    pub fn public_key(&self) -> PkiResult<PublicKey> {
        let key = EcKey::from_public_key(self.key.group(), self.key.public_key())
            .map_err(PkiError::crypto("derive public key"))?;
        Ok(PublicKey { key })
    }

    /// Encodes this key as an `EC PRIVATE KEY` PEM block.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::Crypto`] if serialization fails.
    pub fn to_pem(&self) -> PkiResult<Zeroizing<Vec<u8>>> {
        self.key.private_key_to_pem().map(Zeroizing::new).map_err(PkiError::crypto("encode private key"))
    }

    pub(crate) fn to_pkey(&self) -> PkiResult<PKey<Private>> {
        PKey::from_ec_key(self.key.clone()).map_err(PkiError::crypto("wrap private key"))
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivateKey").field("curve", &"P-521").finish_non_exhaustive()
    }
}

impl PublicKey {
    /// Encodes this key as a `PUBLIC KEY` PEM block.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::Crypto`] if serialization fails.
    pub fn to_pem(&self) -> PkiResult<Vec<u8>> {
        self.key.public_key_to_pem().map_err(PkiError::crypto("encode public key"))
    }

    /// Returns the uncompressed SEC 1 point encoding.
    ///
    /// # Errors
    ///
    /// Returns [`PkiError::Crypto`] if serialization fails.
    pub fn to_point_bytes(&self) -> PkiResult<Vec<u8>> {
        let mut ctx = BigNumContext::new().map_err(PkiError::crypto("allocate context"))?;
        self.key
            .public_key()
            .to_bytes(self.key.group(), PointConversionForm::UNCOMPRESSED, &mut ctx)
            .map_err(PkiError::crypto("encode public point"))
    }

    pub(crate) fn to_pkey(&self) -> PkiResult<PKey<Public>> {
        PKey::from_ec_key(self.key.clone()).map_err(PkiError::crypto("wrap public key"))
    }

    pub(crate) fn from_pkey(pkey: &PKey<Public>) -> PkiResult<Self> {
        let key = pkey
            .ec_key()
            .map_err(|e| PkiError::invalid_encoding_with_source("public key", e))?;
        ensure_curve(key.group())?;
        Ok(Self { key })
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        match (self.to_point_bytes(), other.to_point_bytes()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for PublicKey {}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey").field("curve", &"P-521").finish_non_exhaustive()
    }
}

fn ensure_curve(group: &openssl::ec::EcGroupRef) -> PkiResult<()> {
    if group.curve_name() != Some(CURVE) {
        return Err(PkiError::invalid_encoding("key curve"));
    }
    Ok(())
}

/// Decodes an `EC PRIVATE KEY` PEM block.
///
/// # Errors
///
/// Returns [`PkiError::InvalidEncoding`] if the input is not a PEM encoded
/// EC private key on P-521, or if the key fails its consistency check.
pub fn decode_private(pem: &[u8]) -> PkiResult<PrivateKey> {
    let key = EcKey::private_key_from_pem(pem)
        .map_err(|e| PkiError::invalid_encoding_with_source("private key", e))?;
    ensure_curve(key.group())?;
    key.check_key().map_err(|e| PkiError::invalid_encoding_with_source("private key", e))?;
    Ok(PrivateKey { key })
}

/// Encodes a private key as an `EC PRIVATE KEY` PEM block.
///
/// # Errors
///
/// Returns [`PkiError::Crypto`] if encoding fails.
pub fn encode_private(key: &PrivateKey) -> PkiResult<Zeroizing<Vec<u8>>> {
    key.to_pem()
}

/// Encodes a public key as a `PUBLIC KEY` PEM block.
///
/// # Errors
///
/// Returns [`PkiError::Crypto`] if encoding fails.
pub fn encode_public(key: &PublicKey) -> PkiResult<Vec<u8>> {
    key.to_pem()
}

/// Decodes a `PUBLIC KEY` PEM block.
///
/// # Errors
///
/// Returns [`PkiError::InvalidEncoding`] if the input is not a PEM encoded
/// EC public key on P-521.
pub fn decode_public(pem: &[u8]) -> PkiResult<PublicKey> {
    let pkey = PKey::public_key_from_pem(pem)
        .map_err(|e| PkiError::invalid_encoding_with_source("public key", e))?;
    PublicKey::from_pkey(&pkey)
}

/// Computes the SHA-512 digest used by every signature in the system.
#[must_use]
pub fn digest(data: &[u8]) -> [u8; DIGEST_LEN] {
    sha512(data)
}

/// Signs a precomputed digest, returning `r || s`.
///
/// # Errors
///
/// Returns [`PkiError::Crypto`] if signing fails.
pub fn sign(hash: &[u8], key: &PrivateKey) -> PkiResult<Vec<u8>> {
    let sig = EcdsaSig::sign(hash, &key.key).map_err(PkiError::crypto("sign digest"))?;

    let mut out = sig.r().to_vec_padded(SCALAR_LEN as i32).map_err(PkiError::crypto("encode r"))?;
    out.extend(sig.s().to_vec_padded(SCALAR_LEN as i32).map_err(PkiError::crypto("encode s"))?);
    Ok(out)
}

/// Verifies an `r || s` signature over a precomputed digest.
///
/// # Errors
///
/// Returns [`PkiError::InvalidSignature`] if the signature has the wrong
/// length or does not verify. It is never reported as a plain `false`.
pub fn verify(hash: &[u8], key: &PublicKey, signature: &[u8]) -> PkiResult<()> {
    if signature.len() != SIGNATURE_LEN {
        return Err(PkiError::InvalidSignature);
    }

    let (r, s) = signature.split_at(SCALAR_LEN);
    let r = BigNum::from_slice(r).map_err(|_| PkiError::InvalidSignature)?;
    let s = BigNum::from_slice(s).map_err(|_| PkiError::InvalidSignature)?;
    let sig = EcdsaSig::from_private_components(r, s).map_err(|_| PkiError::InvalidSignature)?;

    match sig.verify(hash, &key.key) {
        Ok(true) => Ok(()),
        _ => Err(PkiError::InvalidSignature),
    }
}

/// Hashes `data` with SHA-512 and signs the digest.
///
/// # Errors
///
/// Returns [`PkiError::Crypto`] if signing fails.
pub fn sign_message(data: &[u8], key: &PrivateKey) -> PkiResult<Vec<u8>> {
    sign(&digest(data), key)
}

/// Hashes `data` with SHA-512 and verifies the signature over the digest.
///
/// # Errors
///
/// Returns [`PkiError::InvalidSignature`] if verification fails.
pub fn verify_message(data: &[u8], key: &PublicKey, signature: &[u8]) -> PkiResult<()> {
    verify(&digest(data), key, signature)
}
