// Postgres storage layer with sqlx
//
// This crate provides database implementations for pulse-core traits:
// - DbEventStore: EventStore + AggregationStore
// - DbNotificationStore: NotificationStore
// - DbJobBoard: JobBoardReader + RecipientDirectory over host-owned tables
// - DbSessionVerifier: AuthVerifier for opaque session ids
// - PgEventBus: EventBus over LISTEN/NOTIFY

pub mod bus;
pub mod event_store;
pub mod job_board;
pub mod models;
pub mod notification_store;
pub mod repositories;
pub mod session;

pub use bus::PgEventBus;
pub use event_store::DbEventStore;
pub use job_board::DbJobBoard;
pub use notification_store::DbNotificationStore;
pub use repositories::Database;
pub use session::{hash_token, DbSessionVerifier};
