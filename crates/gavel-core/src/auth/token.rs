//! Signed bearer tokens.
//!
//! Wire format: `subject.expiry_unix.signature` where the signature is the
//! hex-encoded HMAC-SHA256 of `subject.expiry_unix` under the configured
//! secret. Subjects are restricted to ASCII alphanumerics plus `-` and `_`
//! so the dot separators stay unambiguous.

use crate::auth::{AuthError, Identity};
use chrono::{DateTime, Duration, Utc};
use ring::hmac;

/// Verifies (and, for operators and tests, issues) signed bearer tokens.
pub struct TokenVerifier {
    key: hmac::Key,
}

impl TokenVerifier {
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self { key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()) }
    }

    /// Issues a token for `subject` expiring `ttl` after `issued_at`.
    ///
    /// Token issuance normally happens outside this service; this helper
    /// exists so operators can mint tokens with the same secret and so tests
    /// can exercise the verification path.
    #[must_use]
    pub fn issue(&self, subject: &str, ttl: Duration, issued_at: DateTime<Utc>) -> String {
        let expiry = (issued_at + ttl).timestamp();
        let payload = format!("{subject}.{expiry}");
        let tag = hmac::sign(&self.key, payload.as_bytes());
        format!("{payload}.{}", hex::encode(tag.as_ref()))
    }

    /// Verifies a token at the given instant.
    ///
    /// The signature is checked before the expiry so a forged token can never
    /// learn whether its claimed expiry would have been acceptable. Expiry is
    /// strict: a token whose expiry equals `now` is already expired.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidToken`] for malformed tokens, bad subjects,
    /// or signature mismatches, and [`AuthError::ExpiredToken`] for
    /// authentic-but-stale tokens.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        let mut parts = token.splitn(3, '.');
        let (Some(subject), Some(expiry_raw), Some(signature_hex)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::InvalidToken);
        };

        if subject.is_empty() ||
            !subject.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(AuthError::InvalidToken);
        }

        let expiry: i64 = expiry_raw.parse().map_err(|_| AuthError::InvalidToken)?;
        let signature = hex::decode(signature_hex).map_err(|_| AuthError::InvalidToken)?;

        let payload = format!("{subject}.{expiry}");
        hmac::verify(&self.key, payload.as_bytes(), &signature)
            .map_err(|_| AuthError::InvalidToken)?;

        if expiry <= now.timestamp() {
            return Err(AuthError::ExpiredToken);
        }

        Ok(Identity { subject: subject.to_string() })
    }
}
