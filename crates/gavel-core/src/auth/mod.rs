//! Caller authentication.
//!
//! Two credential shapes are accepted: a static API key checked in constant
//! time against the configured set, and a signed bearer token carrying a
//! subject and an expiry timestamp. Both are validated as pure functions over
//! (credential, current time, configured secret) — there is no session state
//! and nothing is persisted.
//!
//! The HTTP layer extracts credentials from headers (`X-API-Key` or
//! `Authorization: Bearer`) and calls [`Authenticator::authenticate`]; every
//! failure maps to a 401 response before the request can reach the cache or
//! the model.

pub mod api_key;
pub mod token;

use chrono::{DateTime, Utc};
use thiserror::Error;

pub use api_key::ApiKeySet;
pub use token::TokenVerifier;

/// Errors produced by credential validation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No credential was supplied with the request.
    #[error("missing credentials")]
    MissingCredentials,

    /// The presented API key is not in the configured set.
    #[error("invalid API key")]
    InvalidApiKey,

    /// The bearer token is malformed or its signature does not verify.
    #[error("invalid token")]
    InvalidToken,

    /// The bearer token signature verifies but the token has expired.
    #[error("token expired")]
    ExpiredToken,
}

impl AuthError {
    /// Stable snake_case token for metrics labels.
    #[must_use]
    pub fn as_metric_str(&self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::InvalidApiKey => "invalid_api_key",
            Self::InvalidToken => "invalid_token",
            Self::ExpiredToken => "token_expired",
        }
    }
}

/// A credential as extracted from the request, before validation.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Static key from the `X-API-Key` header.
    ApiKey(String),
    /// Signed token from the `Authorization: Bearer` header.
    Bearer(String),
}

/// The authenticated principal behind a request.
///
/// Carries only what downstream logging needs; never the credential itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Token subject, or a short key fingerprint for static keys.
    pub subject: String,
}

/// Validates credentials against the configured key set and signing secret.
pub struct Authenticator {
    keys: ApiKeySet,
    tokens: Option<TokenVerifier>,
}

impl Authenticator {
    #[must_use]
    pub fn new(keys: ApiKeySet, tokens: Option<TokenVerifier>) -> Self {
        Self { keys, tokens }
    }

    /// Validates a credential at the given instant.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidApiKey`] for unknown keys,
    /// [`AuthError::InvalidToken`] for malformed or forged tokens, and
    /// [`AuthError::ExpiredToken`] when the signature verifies but the token
    /// expiry lies at or before `now` (expiry is checked at validation time,
    /// not at issuance time).
    pub fn authenticate(&self, credential: &Credential, now: DateTime<Utc>) -> Result<Identity, AuthError> {
        match credential {
            Credential::ApiKey(presented) => self.keys.verify(presented),
            Credential::Bearer(token) => match &self.tokens {
                Some(verifier) => verifier.verify(token, now),
                None => Err(AuthError::InvalidToken),
            },
        }
    }
}
