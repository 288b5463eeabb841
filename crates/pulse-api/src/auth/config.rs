// Authentication configuration loaded from environment variables.
// Decision: AUTH_ prefix for all auth config
// Decision: Without AUTH_JWT_SECRET a random secret is generated so dev setups start;
// tokens signed with it do not survive a restart
// Decision: Tokens are issued by the host application, so no lifetime is configured here

use rand::Rng;

/// JWT configuration
#[derive(Debug, Clone, Default)]
pub struct JwtConfig {
    /// Secret key for verifying HS256 tokens
    pub secret: String,
}

/// Complete authentication configuration
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    pub jwt: JwtConfig,
    /// True when the secret was generated at startup
    pub ephemeral_secret: bool,
}

impl AuthConfig {
    /// Environment variables:
    /// - `AUTH_JWT_SECRET`: HS256 secret (random when unset)
    pub fn from_env() -> Self {
        let configured = std::env::var("AUTH_JWT_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let ephemeral_secret = configured.is_none();
        let secret = configured.unwrap_or_else(generate_secret);

        Self {
            jwt: JwtConfig { secret },
            ephemeral_secret,
        }
    }

    #[cfg(test)]
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            jwt: JwtConfig {
                secret: secret.into(),
            },
            ephemeral_secret: false,
        }
    }
}

fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}
