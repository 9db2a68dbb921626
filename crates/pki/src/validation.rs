//! Token algorithm validation.
//!
//! Tokens are only ever signed with ECDSA P-521 over SHA-512 (`ES512`).
//! Everything else is rejected before any signature work happens, which
//! rules out algorithm substitution (`none`, HMAC keyed with a public key).

use crate::error::PkiError;

/// Algorithms that are never accepted.
///
/// - `none`: no signature at all
/// - `HS256`, `HS384`, `HS512`: symmetric, so a published public key could be used as the secret
pub const FORBIDDEN_ALGORITHMS: &[&str] = &["none", "HS256", "HS384", "HS512"];

/// Accepted token algorithms.
pub const ACCEPTED_ALGORITHMS: &[&str] = &["ES512"];

/// Validates a token header algorithm.
///
/// # Errors
///
/// Returns [`PkiError::UnsupportedAlgorithm`] if `alg` is forbidden or not in
/// [`ACCEPTED_ALGORITHMS`].
///
/// # Examples
///
/// ```
/// use fleetauth_pki::validation::validate_algorithm;
///
/// assert!(validate_algorithm("ES512").is_ok());
/// assert!(validate_algorithm("ES256").is_err());
/// assert!(validate_algorithm("none").is_err());
/// ```
pub fn validate_algorithm(alg: &str) -> Result<(), PkiError> {
    if FORBIDDEN_ALGORITHMS.contains(&alg) {
        return Err(PkiError::UnsupportedAlgorithm(format!(
            "Algorithm '{}' is not allowed for security reasons",
            alg
        )));
    }

    if !ACCEPTED_ALGORITHMS.contains(&alg) {
        return Err(PkiError::UnsupportedAlgorithm(format!(
            "Algorithm '{}' is not in accepted list (only ES512 is supported)",
            alg
        )));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_algorithm_es512_accepted() {
        assert!(validate_algorithm("ES512").is_ok());
    }

    #[test]
    fn test_other_ecdsa_curves_rejected() {
        for alg in ["ES256", "ES384", "EdDSA", "RS256"] {
            let result = validate_algorithm(alg);
            assert!(
                matches!(result, Err(PkiError::UnsupportedAlgorithm(ref msg)) if msg.contains("not in accepted list")),
                "expected '{alg}' to be rejected as unsupported"
            );
        }
    }

    #[test]
    fn test_forbidden_algorithms_each_rejected_with_security_message() {
        for alg in FORBIDDEN_ALGORITHMS {
            let result = validate_algorithm(alg);
            assert!(
                matches!(result, Err(PkiError::UnsupportedAlgorithm(ref msg)) if msg.contains("not allowed for security reasons")),
                "Expected security rejection for forbidden algorithm '{alg}'"
            );
        }
    }

    #[test]
    fn test_algorithm_match_is_case_sensitive() {
        assert!(validate_algorithm("es512").is_err());
    }
}
