// Pulse API server
// Decision: Runs against PostgreSQL when DATABASE_URL is set, in-memory collaborators otherwise
// Decision: The pub/sub bus is chosen by PULSE_BUS (memory, postgres, none)
// Decision: ctrl-c stops accepting requests, then the collector flushes its queue before exit

mod auth;
mod error;
mod routes;
mod state;
mod telemetry;
mod ws;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use pulse_core::memory::{InMemoryBus, InMemoryCache, InMemoryJobBoard, InMemoryStore};
use pulse_core::{AuthVerifier, Cache, EventBus, PipelineConfig};
use pulse_storage::{
    Database, DbEventStore, DbJobBoard, DbNotificationStore, DbSessionVerifier, PgEventBus,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{AuthConfig, CompositeVerifier, JwtService, JwtVerifier};
use crate::state::{AppState, Backends, Collaborators};
use crate::telemetry::{init_telemetry, TelemetryConfig};

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:9100";
const IN_MEMORY_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BusKind {
    Memory,
    Postgres,
    Disabled,
}

impl BusKind {
    fn from_env() -> Self {
        match std::env::var("PULSE_BUS")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "postgres" | "pg" => BusKind::Postgres,
            "none" | "off" => BusKind::Disabled,
            _ => BusKind::Memory,
        }
    }
}

fn build_bus(kind: BusKind, db: Option<&Database>) -> (Option<Arc<dyn EventBus>>, &'static str) {
    match (kind, db) {
        (BusKind::Disabled, _) => (None, "none"),
        (BusKind::Postgres, Some(db)) => (
            Some(Arc::new(PgEventBus::start(db.pool().clone())) as Arc<dyn EventBus>),
            "postgres",
        ),
        (BusKind::Postgres, None) => {
            tracing::warn!("PULSE_BUS=postgres needs DATABASE_URL; using the in-process bus");
            (
                Some(Arc::new(InMemoryBus::new(IN_MEMORY_BUS_CAPACITY)) as Arc<dyn EventBus>),
                "memory",
            )
        }
        (BusKind::Memory, _) => (
            Some(Arc::new(InMemoryBus::new(IN_MEMORY_BUS_CAPACITY)) as Arc<dyn EventBus>),
            "memory",
        ),
    }
}

async fn collaborators(auth_config: &AuthConfig) -> Result<Collaborators> {
    let jwt = JwtVerifier::new(JwtService::new(auth_config.jwt.clone()));
    let cache: Option<Arc<dyn Cache>> = Some(Arc::new(InMemoryCache::new()));
    let bus_kind = BusKind::from_env();

    match std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()) {
        Some(database_url) => {
            let db = Database::from_url(&database_url)
                .await
                .context("Failed to connect to database")?;
            db.migrate().await.context("Failed to run migrations")?;
            tracing::info!("Connected to database");

            let events = Arc::new(DbEventStore::new(db.clone()));
            let board = Arc::new(DbJobBoard::new(db.clone()));
            let sessions: Arc<dyn AuthVerifier> = Arc::new(DbSessionVerifier::new(db.clone()));
            let (bus, bus_name) = build_bus(bus_kind, Some(&db));

            Ok(Collaborators {
                events: events.clone(),
                aggregations: events,
                notifications: Arc::new(DbNotificationStore::new(db.clone())),
                board: board.clone(),
                directory: board,
                cache,
                bus,
                verifier: Arc::new(CompositeVerifier::new(jwt, Some(sessions))),
                backends: Backends {
                    storage: "postgres",
                    bus: bus_name,
                },
            })
        }
        None => {
            tracing::warn!(
                "DATABASE_URL not set; events and notifications are kept in memory and lost on exit"
            );
            let store = Arc::new(InMemoryStore::new());
            let board = Arc::new(InMemoryJobBoard::new());
            let (bus, bus_name) = build_bus(bus_kind, None);

            Ok(Collaborators {
                events: store.clone(),
                aggregations: store.clone(),
                notifications: store,
                board: board.clone(),
                directory: board,
                cache,
                bus,
                verifier: Arc::new(CompositeVerifier::new(jwt, None)),
                backends: Backends {
                    storage: "memory",
                    bus: bus_name,
                },
            })
        }
    }
}

fn cors_layer() -> Option<CorsLayer> {
    let cors_origins: Vec<HeaderValue> = std::env::var("CORS_ALLOWED_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(origin) => Some(origin),
            Err(_) => {
                tracing::warn!(origin = s, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if cors_origins.is_empty() {
        tracing::info!("CORS not configured (same-origin requests only)");
        return None;
    }
    tracing::info!(origins = ?cors_origins, "CORS origins configured");

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(cors_origins))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                header::CONTENT_TYPE,
                header::AUTHORIZATION,
                header::ACCEPT,
                header::ORIGIN,
                header::CACHE_CONTROL,
            ])
            .allow_credentials(true),
    )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let telemetry_config = TelemetryConfig::from_env();
    init_telemetry(&telemetry_config);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "pulse-api starting...");

    let config = PipelineConfig::from_env().context("Invalid pipeline configuration")?;
    tracing::info!(
        sampling_rate = config.collector.sampling_rate,
        batch_size = config.collector.batch_size,
        flush_interval_ms = config.collector.flush_interval.as_millis() as u64,
        broadcast_interval_ms = config.fanout.broadcast_interval.as_millis() as u64,
        "Pipeline configured"
    );

    let auth_config = AuthConfig::from_env();
    if auth_config.ephemeral_secret {
        tracing::warn!("AUTH_JWT_SECRET not set; using a random secret, issued tokens will not verify");
    }

    let state = AppState::build(&config, collaborators(&auth_config).await?);
    state.start();

    let app = routes::router(state.clone());
    let app = match cors_layer() {
        Some(cors) => app.layer(cors),
        None => app,
    };
    let app = app.layer(TraceLayer::new_for_http());

    let addr = std::env::var("PULSE_LISTEN_ADDR").unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    state.shutdown().await;
    Ok(())
}
