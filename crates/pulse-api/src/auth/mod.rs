// Authentication
//
// Credentials are either HS256 tokens issued by the host application or opaque
// session ids looked up in its session table. The composite verifier picks the
// mode from the credential's shape.

pub mod config;
pub mod jwt;
pub mod middleware;

pub use config::AuthConfig;
pub use jwt::{JwtService, JwtVerifier};
pub use middleware::{AuthError, AuthUser, MaybeAuthUser};

use async_trait::async_trait;
use pulse_core::{AuthVerifier, Identity};
use std::sync::Arc;

/// Routes JWT-shaped credentials to the token verifier and everything else to
/// the session verifier (when one is configured)
pub struct CompositeVerifier {
    jwt: JwtVerifier,
    sessions: Option<Arc<dyn AuthVerifier>>,
}

impl CompositeVerifier {
    pub fn new(jwt: JwtVerifier, sessions: Option<Arc<dyn AuthVerifier>>) -> Self {
        Self { jwt, sessions }
    }
}

#[async_trait]
impl AuthVerifier for CompositeVerifier {
    async fn verify(&self, credential: &str) -> pulse_core::Result<Option<Identity>> {
        if credential.is_empty() {
            return Ok(None);
        }
        if jwt::looks_like_jwt(credential) {
            return self.jwt.verify(credential).await;
        }
        match &self.sessions {
            Some(sessions) => sessions.verify(credential).await,
            None => Ok(None),
        }
    }
}
