// HTTP routes over the pipeline services
// Decision: Ingest answers 202 as soon as the event is queued; persistence happens on flush
// Decision: Authenticated ingest takes user and role from the credential, never from the body

use axum::{
    extract::{ConnectInfo, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use pulse_core::{
    Actor, DashboardMetrics, EventStats, FeedFilter, FeedItem, NewEvent, RealTimeMetrics,
    RequestContext, StatsRange,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use uuid::Uuid;

use crate::auth::{AuthUser, MaybeAuthUser};
use crate::error::ApiError;
use crate::state::{AppState, Backends};
use crate::ws::ws_handler;

const DEFAULT_FEED_LIMIT: usize = 20;
const MAX_FEED_LIMIT: usize = 100;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/ws", get(ws_handler))
        .route("/v1/events", post(ingest_event))
        .route("/v1/events/stats", get(event_stats))
        .route("/v1/dashboard", get(dashboard))
        .route("/v1/metrics/realtime", get(realtime_metrics))
        .route("/v1/activity", get(activity_feed))
        .route("/v1/notifications/read", post(mark_notification_read))
        .with_state(state)
}

// ============================================
// Health
// ============================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub storage: String,
    pub bus: String,
    pub connections: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let Backends { storage, bus } = state.backends;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage: storage.to_string(),
        bus: bus.to_string(),
        connections: state.registry().connection_count(),
    })
}

// ============================================
// Ingest
// ============================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub event_type: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub metadata: Option<Value>,
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub accepted: bool,
}

/// First hop from X-Forwarded-For, then X-Real-IP, then the peer address
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(',').next().unwrap_or(v).trim().to_string())
            .filter(|v| !v.is_empty())
    };
    header("x-forwarded-for")
        .or_else(|| header("x-real-ip"))
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
}

async fn ingest_event(
    State(state): State<AppState>,
    MaybeAuthUser(caller): MaybeAuthUser,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(req): Json<IngestRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let event_type = req.event_type.trim();
    if event_type.is_empty() {
        return Err(ApiError::bad_request("eventType is required"));
    }

    let mut event = NewEvent::new(event_type);
    if let Some(identity) = caller {
        event = event.with_user(identity.user_id, Some(identity.role));
    }
    event.entity_type = req.entity_type;
    event.entity_id = req.entity_id;
    match req.metadata {
        None | Some(Value::Null) => {}
        Some(metadata @ Value::Object(_)) => event = event.with_metadata(metadata),
        Some(_) => return Err(ApiError::bad_request("metadata must be an object")),
    }

    let context = RequestContext {
        ip_address: client_ip(&headers, connect_info.map(|ConnectInfo(addr)| addr)),
        user_agent: headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        session_id: req.session_id,
    };

    state.collector.collect(event.with_request_context(context));
    Ok((StatusCode::ACCEPTED, Json(IngestResponse { accepted: true })))
}

// ============================================
// Dashboards and metrics
// ============================================

async fn dashboard(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<DashboardMetrics>, ApiError> {
    let metrics = state
        .analytics
        .get_dashboard_metrics(&identity.user_id, identity.role)
        .await?;
    state.collector.track_dashboard_view(
        &Actor::user(identity.user_id.clone(), identity.role),
        identity.role,
        None,
    );
    Ok(Json(metrics))
}

async fn realtime_metrics(State(state): State<AppState>) -> Result<Json<RealTimeMetrics>, ApiError> {
    Ok(Json(state.analytics.get_real_time_metrics().await?))
}

#[derive(Debug, Deserialize)]
pub struct StatsQuery {
    pub range: Option<StatsRange>,
}

async fn event_stats(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<StatsQuery>,
) -> Result<Json<EventStats>, ApiError> {
    user.require_admin()?;
    let range = query.range.unwrap_or_default();
    Ok(Json(state.analytics.get_event_stats(range).await?))
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<usize>,
}

/// Admins see every event; everyone else sees their own and their role's
async fn activity_feed(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<FeedItem>>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_FEED_LIMIT)
        .clamp(1, MAX_FEED_LIMIT);
    let filter = if user.is_admin() {
        FeedFilter::default()
    } else {
        FeedFilter {
            user_id: Some(user.0.user_id.clone()),
            role: Some(user.0.role),
        }
    };
    Ok(Json(state.analytics.get_activity_feed(&filter, limit).await?))
}

// ============================================
// Notifications
// ============================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    pub notification_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ReadResponse {
    pub updated: bool,
}

async fn mark_notification_read(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<ReadRequest>,
) -> Result<Json<ReadResponse>, ApiError> {
    let updated = state
        .fanout
        .acknowledge_read(req.notification_id, &identity.user_id)
        .await?;
    Ok(Json(ReadResponse { updated }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Collaborators;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use pulse_core::memory::{InMemoryCache, InMemoryJobBoard, InMemoryStore, StaticVerifier};
    use pulse_core::{Cache, Identity, NotificationInput, NotificationType, PipelineConfig, UserRole};
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt;

    struct TestApp {
        state: AppState,
        store: Arc<InMemoryStore>,
    }

    impl TestApp {
        fn new() -> Self {
            let store = Arc::new(InMemoryStore::new());
            let board = Arc::new(InMemoryJobBoard::new());
            board.add_user("seeker", UserRole::Jobseeker);
            board.add_user("root", UserRole::Admin);

            let verifier = StaticVerifier::new()
                .with("tok-seeker", Identity::new("seeker", UserRole::Jobseeker, "Sam Seeker"))
                .with("tok-root", Identity::new("root", UserRole::Admin, "Root"));

            let state = AppState::build(
                &PipelineConfig::default(),
                Collaborators {
                    events: store.clone(),
                    aggregations: store.clone(),
                    notifications: store.clone(),
                    board: board.clone(),
                    directory: board,
                    cache: Some(Arc::new(InMemoryCache::new()) as Arc<dyn Cache>),
                    bus: None,
                    verifier: Arc::new(verifier),
                    backends: Backends {
                        storage: "memory",
                        bus: "none",
                    },
                },
            );
            Self { state, store }
        }

        async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
            let response = router(self.state.clone()).oneshot(request).await.unwrap();
            let status = response.status();
            let body = response.into_body().collect().await.unwrap().to_bytes();
            let json = if body.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&body).unwrap()
            };
            (status, json)
        }
    }

    fn get(uri: &str, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = TestApp::new();
        let (status, body) = app.send(get("/health", None)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(body["storage"], "memory");
        assert_eq!(body["bus"], "none");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn test_anonymous_ingest_captures_request_context() {
        let app = TestApp::new();
        let request = Request::builder()
            .method("POST")
            .uri("/v1/events")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::USER_AGENT, "pulse-test/1.0")
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .body(Body::from(
                json!({"eventType": "job_view", "entityType": "job", "entityId": "j1", "metadata": {"jobTitle": "SRE"}})
                    .to_string(),
            ))
            .unwrap();

        let (status, body) = app.send(request).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["accepted"], true);

        assert_eq!(app.state.collector.flush().await, 1);
        let events = app.store.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, None);
        assert_eq!(events[0].ip_address.as_deref(), Some("203.0.113.7"));
        assert_eq!(events[0].user_agent.as_deref(), Some("pulse-test/1.0"));
        assert_eq!(events[0].metadata["jobTitle"], "SRE");
    }

    #[tokio::test]
    async fn test_authenticated_ingest_uses_credential_identity() {
        let app = TestApp::new();
        let (status, _) = app
            .send(post_json(
                "/v1/events",
                Some("tok-seeker"),
                json!({"eventType": "job_search", "metadata": {"query": "rust"}}),
            ))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);

        app.state.collector.flush().await;
        let events = app.store.events();
        assert_eq!(events[0].user_id.as_deref(), Some("seeker"));
        assert_eq!(events[0].user_role, Some(UserRole::Jobseeker));
    }

    #[tokio::test]
    async fn test_ingest_rejects_bad_input() {
        let app = TestApp::new();

        let (status, _) = app
            .send(post_json("/v1/events", None, json!({"eventType": "  "})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .send(post_json("/v1/events", None, json!({"eventType": "x", "metadata": [1, 2]})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = app
            .send(post_json("/v1/events", Some("nope"), json!({"eventType": "job_view"})))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        assert_eq!(app.state.collector.queue_len(), 0);
    }

    #[tokio::test]
    async fn test_dashboard_requires_auth_and_tracks_view() {
        let app = TestApp::new();

        let (status, _) = app.send(get("/v1/dashboard", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = app.send(get("/v1/dashboard", Some("tok-seeker"))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.get("jobseeker").is_some());
        assert_eq!(app.state.collector.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_event_stats_is_admin_only() {
        let app = TestApp::new();
        app.state
            .collector
            .collect(NewEvent::new("job_view").with_user("seeker", Some(UserRole::Jobseeker)));
        app.state.collector.flush().await;

        let (status, _) = app.send(get("/v1/events/stats", Some("tok-seeker"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app.send(get("/v1/events/stats?range=hour", Some("tok-root"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["totalEvents"], 1);
        assert_eq!(body["eventsByType"]["job_view"], 1);

        let (status, _) = app.send(get("/v1/events/stats?range=year", Some("tok-root"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_activity_feed_is_scoped_to_caller() {
        let app = TestApp::new();
        app.state
            .collector
            .collect(NewEvent::new("job_view").with_user("seeker", Some(UserRole::Jobseeker)));
        app.state
            .collector
            .collect(NewEvent::new("job_create").with_user("emp", Some(UserRole::Employer)));
        app.state.collector.flush().await;

        let (status, body) = app.send(get("/v1/activity", Some("tok-seeker"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["type"], "job_view");

        let (_, body) = app.send(get("/v1/activity?limit=1", Some("tok-root"))).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        let (_, body) = app.send(get("/v1/activity", Some("tok-root"))).await;
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_realtime_metrics() {
        let app = TestApp::new();
        app.state
            .collector
            .collect(NewEvent::new("job_view").with_user("seeker", Some(UserRole::Jobseeker)));
        app.state.collector.flush().await;

        let (status, body) = app.send(get("/v1/metrics/realtime", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["activeUsers"], 1);
        assert_eq!(body["jobViews"], 1);
    }

    #[tokio::test]
    async fn test_mark_notification_read_over_http() {
        let app = TestApp::new();
        let notification = app
            .state
            .fanout
            .notify(
                "seeker",
                NotificationInput::new(NotificationType::Welcome, "Hi", "Welcome aboard"),
            )
            .await
            .unwrap();

        let body = json!({"notificationId": notification.id});

        let (status, _) = app
            .send(post_json("/v1/notifications/read", Some("tok-root"), body.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, resp) = app
            .send(post_json("/v1/notifications/read", Some("tok-seeker"), body.clone()))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resp["updated"], true);

        let (_, resp) = app
            .send(post_json("/v1/notifications/read", Some("tok-seeker"), body))
            .await;
        assert_eq!(resp["updated"], false);
    }

    #[tokio::test]
    async fn test_ws_rejects_before_upgrade() {
        let app = TestApp::new();

        let (status, _) = app.send(get("/v1/ws", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = app.send(get("/v1/ws?token=bogus", None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(app.state.registry().connection_count(), 0);
    }

    #[tokio::test]
    async fn test_ws_without_upgrade_headers_is_not_registered() {
        let app = TestApp::new();

        let (status, _) = app.send(get("/v1/ws?token=tok-seeker", None)).await;
        assert_eq!(status, StatusCode::UPGRADE_REQUIRED);
        assert_eq!(app.state.registry().connection_count(), 0);
        assert!(!app.state.registry().is_user_online("seeker"));
    }
}
