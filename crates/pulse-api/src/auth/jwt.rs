// Signed-token verification
// Decision: HS256 with a shared secret; the host application issues the tokens
// Decision: Claims carry the role so a connection is resolved without a DB round trip

use anyhow::{Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
#[cfg(test)]
use jsonwebtoken::{encode, EncodingKey, Header};
use pulse_core::{AuthVerifier, Identity, UserRole};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::JwtConfig;

/// JWT claims for access tokens
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AccessTokenClaims {
    /// Subject (user ID)
    pub sub: String,
    /// User role (jobseeker, employer, admin)
    pub role: String,
    /// Display name
    #[serde(default)]
    pub name: Option<String>,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
}

impl AccessTokenClaims {
    /// `None` when the role claim is not a known role
    pub fn into_identity(self) -> Option<Identity> {
        let role: UserRole = self.role.parse().ok()?;
        let name = self
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| self.sub.clone());
        Some(Identity::new(self.sub, role, name))
    }
}

/// Lifetime of tokens issued by tests
#[cfg(test)]
const TEST_TOKEN_LIFETIME_MINUTES: i64 = 15;

/// JWT service for token validation; the server never issues tokens
#[derive(Clone)]
pub struct JwtService {
    decoding_key: DecodingKey,
    #[cfg(test)]
    encoding_key: EncodingKey,
}

impl JwtService {
    pub fn new(config: JwtConfig) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            #[cfg(test)]
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
        }
    }

    /// Issue an access token for an identity
    #[cfg(test)]
    pub fn generate_access_token(&self, identity: &Identity) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::minutes(TEST_TOKEN_LIFETIME_MINUTES);

        let claims = AccessTokenClaims {
            sub: identity.user_id.clone(),
            role: identity.role.to_string(),
            name: Some(identity.display_name.clone()),
            exp: exp.timestamp(),
            iat: now.timestamp(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .context("Failed to encode access token")
    }

    /// Validate and decode an access token
    pub fn validate_access_token(&self, token: &str) -> Result<AccessTokenClaims> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        let token_data = decode::<AccessTokenClaims>(token, &self.decoding_key, &validation)
            .context("Invalid access token")?;

        Ok(token_data.claims)
    }
}

/// Three non-empty dot-separated segments
pub fn looks_like_jwt(credential: &str) -> bool {
    let mut parts = 0;
    for segment in credential.split('.') {
        if segment.is_empty() {
            return false;
        }
        parts += 1;
    }
    parts == 3
}

/// Resolves signed tokens; unknown, expired or malformed tokens resolve to `None`
pub struct JwtVerifier {
    service: JwtService,
}

impl JwtVerifier {
    pub fn new(service: JwtService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl AuthVerifier for JwtVerifier {
    async fn verify(&self, credential: &str) -> pulse_core::Result<Option<Identity>> {
        let claims = match self.service.validate_access_token(credential) {
            Ok(claims) => claims,
            Err(e) => {
                debug!("JWT validation failed: {:#}", e);
                return Ok(None);
            }
        };
        let identity = claims.into_identity();
        if identity.is_none() {
            debug!("JWT carries an unknown role");
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-testing".to_string(),
        }
    }

    #[test]
    fn test_generate_and_validate() {
        let service = JwtService::new(test_config());
        let identity = Identity::new("user-1", UserRole::Employer, "Ada Lovelace");
        let token = service.generate_access_token(&identity).unwrap();

        assert!(looks_like_jwt(&token));

        let claims = service.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.role, "employer");
        assert_eq!(claims.exp - claims.iat, TEST_TOKEN_LIFETIME_MINUTES * 60);
        assert_eq!(claims.into_identity(), Some(identity));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = JwtService::new(test_config());
        let other = JwtService::new(JwtConfig {
            secret: "another-secret".to_string(),
        });
        let token = issuer
            .generate_access_token(&Identity::new("u", UserRole::Admin, "U"))
            .unwrap();
        assert!(other.validate_access_token(&token).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let service = JwtService::new(test_config());
        let past = Utc::now() - Duration::hours(2);
        let claims = AccessTokenClaims {
            sub: "u".to_string(),
            role: "jobseeker".to_string(),
            name: None,
            exp: past.timestamp(),
            iat: (past - Duration::minutes(15)).timestamp(),
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret-key-for-testing"),
        )
        .unwrap();
        assert!(service.validate_access_token(&token).is_err());
    }

    #[test]
    fn test_name_falls_back_to_subject() {
        let claims = AccessTokenClaims {
            sub: "user-9".to_string(),
            role: "jobseeker".to_string(),
            name: Some("  ".to_string()),
            exp: 0,
            iat: 0,
        };
        let identity = claims.into_identity().unwrap();
        assert_eq!(identity.display_name, "user-9");
    }

    #[test]
    fn test_unknown_role_is_none() {
        let claims = AccessTokenClaims {
            sub: "u".to_string(),
            role: "superuser".to_string(),
            name: None,
            exp: 0,
            iat: 0,
        };
        assert!(claims.into_identity().is_none());
    }

    #[test]
    fn test_looks_like_jwt() {
        assert!(looks_like_jwt("a.b.c"));
        assert!(!looks_like_jwt("a.b"));
        assert!(!looks_like_jwt("a..c"));
        assert!(!looks_like_jwt("session-id-0123"));
    }

    #[tokio::test]
    async fn test_verifier_maps_failures_to_none() {
        let service = JwtService::new(test_config());
        let verifier = JwtVerifier::new(service.clone());

        assert!(verifier.verify("x.y.z").await.unwrap().is_none());

        let token = service
            .generate_access_token(&Identity::new("u1", UserRole::Jobseeker, "U One"))
            .unwrap();
        let identity = verifier.verify(&token).await.unwrap().unwrap();
        assert_eq!(identity.user_id, "u1");
    }
}
