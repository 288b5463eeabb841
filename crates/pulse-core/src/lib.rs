// Pulse event pipeline
//
// DB-agnostic core of a multi-tenant real-time event pipeline: producers hand
// events to a batching collector, an analytics processor turns stored events
// into dashboards and windowed aggregations, and a fan-out service delivers
// notifications and live updates to authenticated connections.
//
// Key design decisions:
// - Every external collaborator (store, cache, bus, verifier, job board) is a trait
// - Services are constructed explicitly and shared behind Arc; start/stop are explicit
// - Producer-facing calls never return errors
// - Notifications are persisted before they are pushed

// Domain types
pub mod aggregation;
pub mod dashboard;
pub mod event;
pub mod identity;
pub mod messages;
pub mod notification;

pub mod config;
pub mod error;
pub mod traits;

// Services
pub mod analytics;
pub mod collector;
pub mod fanout;
pub mod registry;

// In-memory implementations for local development and testing
pub mod memory;

// Re-exports for convenience
pub use aggregation::{Aggregation, AggregationMetrics, AggregationType, AggregationWindow};
pub use analytics::AnalyticsProcessor;
pub use collector::{Actor, EventCollector, JobRef, SearchQuery};
pub use config::{AnalyticsConfig, CollectorConfig, FanOutConfig, PipelineConfig};
pub use dashboard::{DashboardMetrics, EventStats, FeedItem, RealTimeMetrics, StatsRange};
pub use error::{PulseError, Result};
pub use event::{Event, NewEvent, RequestContext};
pub use fanout::FanOutService;
pub use identity::{Identity, UserRole};
pub use messages::{ClientMessage, ServerMessage};
pub use notification::{Notification, NotificationInput, NotificationType};
pub use registry::{Channel, ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use traits::{
    AggregationStore, AuthVerifier, Cache, EventBus, EventStore, FeedFilter, JobBoardReader,
    NotificationStore, RecipientDirectory,
};
