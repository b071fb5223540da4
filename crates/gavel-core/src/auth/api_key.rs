//! Static API key validation.

use crate::auth::{AuthError, Identity};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// The configured set of accepted static API keys.
///
/// Membership is checked in constant time with respect to key contents: the
/// presented key is compared against every configured key and the results are
/// OR-combined, so neither a partial prefix match nor the position of the
/// matching key shifts the timing. Key length is not hidden.
pub struct ApiKeySet {
    keys: Vec<String>,
}

impl ApiKeySet {
    #[must_use]
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Checks a presented key against the configured set.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidApiKey`] when the key matches no entry,
    /// including when no keys are configured at all.
    pub fn verify(&self, presented: &str) -> Result<Identity, AuthError> {
        let mut matched = subtle::Choice::from(0u8);
        for key in &self.keys {
            matched |= key.as_bytes().ct_eq(presented.as_bytes());
        }

        if bool::from(matched) {
            Ok(Identity { subject: fingerprint(presented) })
        } else {
            Err(AuthError::InvalidApiKey)
        }
    }
}

/// Short non-reversible identifier for logging which key was used.
fn fingerprint(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    format!("key-{}", &hex::encode(digest)[..8])
}
