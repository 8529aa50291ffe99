//! Authentication errors.

use thiserror::Error;

/// Failures building a provider or minting a token.
///
/// Token *validation* failures are not errors: the provider answers
/// `Ok(None)` for credentials that do not identify anyone.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No signing secret configured.
    #[error("jwt secret is empty")]
    EmptySecret,

    /// Encoding or decoding failed.
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
}
