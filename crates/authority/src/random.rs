//! Challenge randomness.

use rand::{TryRngCore, rngs::OsRng};

use crate::error::{Domain, ServiceError, ServiceResult};

/// Source of login challenges.
pub trait Randomizer: Send + Sync {
    /// Returns a fresh random challenge.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Internal`] if no randomness is available.
    fn random(&self) -> ServiceResult<Vec<u8>>;
}

/// Draws challenges from the operating system's generator.
#[derive(Debug, Clone, Copy)]
pub struct OsRandomizer {
    size: usize,
}

impl OsRandomizer {
    /// Creates a randomizer producing `size` bytes per challenge.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    /// Bytes per challenge.
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }
}

impl Randomizer for OsRandomizer {
    fn random(&self) -> ServiceResult<Vec<u8>> {
        let mut buf = vec![0u8; self.size];
        OsRng.try_fill_bytes(&mut buf).map_err(|e| {
            tracing::error!(error = %e, "operating system randomness unavailable");
            ServiceError::internal(Domain::Authz, "randomness", e)
        })?;
        Ok(buf)
    }
}
