// Opaque session verification
//
// Session ids are never stored in clear; the host writes SHA-256(hex) of the
// id into auth_sessions.token_hash and we look it up the same way.

use async_trait::async_trait;
use pulse_core::traits::AuthVerifier;
use pulse_core::{Identity, PulseError, Result};
use tracing::debug;

use crate::repositories::Database;

/// Hash a token for database lookup (SHA-256, hex encoded)
pub fn hash_token(token: &str) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(token.as_bytes());
    hex::encode(hash)
}

#[derive(Clone)]
pub struct DbSessionVerifier {
    db: Database,
}

impl DbSessionVerifier {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuthVerifier for DbSessionVerifier {
    async fn verify(&self, credential: &str) -> Result<Option<Identity>> {
        if credential.is_empty() {
            return Ok(None);
        }
        let row = self
            .db
            .session_identity(&hash_token(credential))
            .await
            .map_err(|e| PulseError::store(e.to_string()))?;

        let identity = row.and_then(|row| row.into_identity());
        if identity.is_none() {
            debug!("Session lookup found no live session");
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token() {
        let hash = hash_token("session-123");
        assert_eq!(hash, hash_token("session-123"));
        assert_ne!(hash, hash_token("session-124"));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
