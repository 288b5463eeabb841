// Authentication extractors
// Decision: Bearer header for HTTP routes; the WebSocket endpoint takes ?token= instead
// Decision: A present-but-invalid credential is rejected even on routes that allow anonymous callers

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use pulse_core::{Identity, UserRole};
use serde::Serialize;

use crate::state::AppState;

/// Authentication error
#[derive(Debug, Clone, Serialize)]
pub struct AuthError {
    pub error: String,
    #[serde(skip)]
    pub status: StatusCode,
}

impl AuthError {
    pub fn unauthorized(message: &str) -> Self {
        Self {
            error: message.to_string(),
            status: StatusCode::UNAUTHORIZED,
        }
    }

    pub fn forbidden(message: &str) -> Self {
        Self {
            error: message.to_string(),
            status: StatusCode::FORBIDDEN,
        }
    }

    pub fn unavailable(message: &str) -> Self {
        Self {
            error: message.to_string(),
            status: StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Authenticated caller. Returns 401 if the request carries no valid credential.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Identity);

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.0.role == UserRole::Admin
    }

    pub fn require_admin(&self) -> Result<(), AuthError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AuthError::forbidden("Admin access required"))
        }
    }
}

/// Caller that may be anonymous
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<Identity>);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);
        match bearer_token(parts, state).await? {
            Some(token) => authenticate(&app, &token).await.map(AuthUser),
            None => Err(AuthError::unauthorized("Authentication required")),
        }
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = AppState::from_ref(state);
        match bearer_token(parts, state).await? {
            Some(token) => authenticate(&app, &token).await.map(|id| MaybeAuthUser(Some(id))),
            None => Ok(MaybeAuthUser(None)),
        }
    }
}

async fn bearer_token<S>(parts: &mut Parts, state: &S) -> Result<Option<String>, AuthError>
where
    S: Send + Sync,
{
    match TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state).await {
        Ok(TypedHeader(Authorization(bearer))) => Ok(Some(bearer.token().to_string())),
        Err(rejection) if rejection.is_missing() => Ok(None),
        Err(_) => Err(AuthError::unauthorized("Invalid authorization header")),
    }
}

/// Resolve a credential through the configured verifier
pub async fn authenticate(state: &AppState, credential: &str) -> Result<Identity, AuthError> {
    match state.verifier.verify(credential).await {
        Ok(Some(identity)) => Ok(identity),
        Ok(None) => Err(AuthError::unauthorized("Invalid or expired token")),
        Err(e) => {
            tracing::error!("Credential verification failed: {}", e);
            Err(AuthError::unavailable("Authentication unavailable"))
        }
    }
}
