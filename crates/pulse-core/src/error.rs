// Error types for the event pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PulseError>;

/// Errors that can occur inside the pipeline
#[derive(Debug, Error)]
pub enum PulseError {
    /// Durable store error
    #[error("Store error: {0}")]
    Store(String),

    /// Cache error
    #[error("Cache error: {0}")]
    Cache(String),

    /// Pub/sub bus error
    #[error("Bus error: {0}")]
    Bus(String),

    /// Credential could not be resolved to an identity
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Payload could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PulseError {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        PulseError::Store(msg.into())
    }

    /// Create a cache error
    pub fn cache(msg: impl Into<String>) -> Self {
        PulseError::Cache(msg.into())
    }

    /// Create a bus error
    pub fn bus(msg: impl Into<String>) -> Self {
        PulseError::Bus(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        PulseError::Authentication(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        PulseError::Configuration(msg.into())
    }

    /// True when the error came from credential verification
    pub fn is_auth(&self) -> bool {
        matches!(self, PulseError::Authentication(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            PulseError::store("connection refused").to_string(),
            "Store error: connection refused"
        );
        assert_eq!(
            PulseError::auth("unknown token").to_string(),
            "Authentication failed: unknown token"
        );
    }

    #[test]
    fn test_is_auth() {
        assert!(PulseError::auth("x").is_auth());
        assert!(!PulseError::cache("x").is_auth());
    }

    #[test]
    fn test_from_serde() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: PulseError = err.into();
        assert!(matches!(err, PulseError::Serialization(_)));
    }
}
