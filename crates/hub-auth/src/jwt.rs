//! HS256 token validation and issuance.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use hub_core::{
    CollaboratorError, DisplayIdentity, HandshakePayload, Identity, IdentityProvider, UserId,
};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::AuthError;

/// Session token claims.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Account email.
    #[serde(default)]
    pub email: String,
    /// Given name.
    #[serde(default)]
    pub first_name: String,
    /// Family name.
    #[serde(default)]
    pub last_name: String,
    /// Role name.
    #[serde(default)]
    pub role: String,
    /// Issued-at (unix seconds).
    #[serde(default)]
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
}

impl Claims {
    fn into_identity(self) -> Identity {
        Identity {
            user_id: UserId::from_string(self.sub),
            display: DisplayIdentity {
                email: self.email,
                first_name: self.first_name,
                last_name: self.last_name,
                role_name: self.role,
            },
        }
    }
}

/// Mint a token for `identity` valid for `ttl`.
pub fn issue_token(secret: &str, identity: &Identity, ttl: Duration) -> Result<String, AuthError> {
    if secret.is_empty() {
        return Err(AuthError::EmptySecret);
    }
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: identity.user_id.as_str().to_owned(),
        email: identity.display.email.clone(),
        first_name: identity.display.first_name.clone(),
        last_name: identity.display.last_name.clone(),
        role: identity.display.role_name.clone(),
        iat: now,
        exp: now + ttl.num_seconds(),
    };
    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?)
}

/// [`IdentityProvider`] that accepts HS256 tokens signed with a shared secret.
#[derive(Clone)]
pub struct JwtIdentityProvider {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for JwtIdentityProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtIdentityProvider").finish_non_exhaustive()
    }
}

impl JwtIdentityProvider {
    /// Build a provider for `secret`.
    pub fn new(secret: &str) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::EmptySecret);
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Decode and validate `token`. `None` for anything that does not verify.
    pub fn verify(&self, token: &str) -> Option<Claims> {
        match decode::<Claims>(token, &self.key, &self.validation) {
            Ok(data) if !data.claims.sub.is_empty() => Some(data.claims),
            Ok(_) => {
                debug!("token has empty subject");
                None
            }
            Err(e) => {
                match e.kind() {
                    ErrorKind::ExpiredSignature => debug!("token expired"),
                    kind => debug!(?kind, "token rejected"),
                }
                None
            }
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn authenticate(
        &self,
        handshake: &HandshakePayload,
    ) -> Result<Option<Identity>, CollaboratorError> {
        let Some(token) = handshake.token.as_deref() else {
            return Ok(None);
        };
        Ok(self.verify(token).map(Claims::into_identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const SECRET: &str = "test-secret";

    fn identity() -> Identity {
        Identity {
            user_id: UserId::from("user-42"),
            display: DisplayIdentity {
                email: "ada@example.com".into(),
                first_name: "Ada".into(),
                last_name: "Lovelace".into(),
                role_name: "analyst".into(),
            },
        }
    }

    #[tokio::test]
    async fn issued_token_authenticates() {
        let token = issue_token(SECRET, &identity(), Duration::minutes(5)).unwrap();
        let provider = JwtIdentityProvider::new(SECRET).unwrap();
        let resolved = provider
            .authenticate(&HandshakePayload::with_token(token))
            .await
            .unwrap();
        assert_eq!(resolved, Some(identity()));
    }

    #[tokio::test]
    async fn missing_token_is_anonymous() {
        let provider = JwtIdentityProvider::new(SECRET).unwrap();
        let resolved = provider.authenticate(&HandshakePayload::default()).await.unwrap();
        assert!(resolved.is_none());
    }

    #[test]
    fn wrong_secret_rejected() {
        let token = issue_token("other-secret", &identity(), Duration::minutes(5)).unwrap();
        let provider = JwtIdentityProvider::new(SECRET).unwrap();
        assert!(provider.verify(&token).is_none());
    }

    #[test]
    fn expired_token_rejected() {
        let token = issue_token(SECRET, &identity(), Duration::minutes(-5)).unwrap();
        let provider = JwtIdentityProvider::new(SECRET).unwrap();
        assert!(provider.verify(&token).is_none());
    }

    #[test]
    fn garbage_rejected() {
        let provider = JwtIdentityProvider::new(SECRET).unwrap();
        assert!(provider.verify("not.a.jwt").is_none());
    }

    #[test]
    fn empty_secret_refused() {
        assert_matches!(JwtIdentityProvider::new(""), Err(AuthError::EmptySecret));
        assert_matches!(
            issue_token("", &identity(), Duration::minutes(1)),
            Err(AuthError::EmptySecret)
        );
    }

    #[test]
    fn claims_use_camel_case() {
        let provider = JwtIdentityProvider::new(SECRET).unwrap();
        let token = issue_token(SECRET, &identity(), Duration::minutes(5)).unwrap();
        let claims = provider.verify(&token).unwrap();
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["firstName"], "Ada");
        assert_eq!(json["role"], "analyst");
    }
}
