// Core traits for pluggable backends
//
// These traits keep the pipeline independent of where data lives:
// - In-memory implementations (crate::memory) for dev mode and tests
// - Postgres implementations in pulse-storage for production
//
// Stores and the cache are awaited; nothing in the pipeline holds a lock
// across one of these calls.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;
use std::time::Duration;
use uuid::Uuid;

use crate::aggregation::{Aggregation, AggregationType};
use crate::dashboard::{
    ApplicationRecord, BookmarkRecord, EventTypeCount, PlatformCounts, PostingRecord,
    ProfileSnapshot, ReceivedApplicationRecord, SectorCount,
};
use crate::error::Result;
use crate::event::Event;
use crate::identity::{Identity, UserRole};
use crate::notification::{CreateNotification, Notification, NotificationStats, NotificationType};

// ============================================================================
// EventStore - Persisted analytics events
// ============================================================================

/// Which events an activity feed shows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedFilter {
    /// When set, only events by this user or by the given role are shown
    pub user_id: Option<String>,
    pub role: Option<UserRole>,
}

impl FeedFilter {
    pub fn matches(&self, event: &Event) -> bool {
        match &self.user_id {
            None => true,
            Some(user_id) => {
                event.user_id.as_deref() == Some(user_id.as_str())
                    || (self.role.is_some() && event.user_role == self.role)
            }
        }
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a batch, skipping rows whose `event_id` already exists.
    /// Returns the number of newly inserted rows.
    async fn insert_events(&self, events: &[Event]) -> Result<usize>;

    /// Events with `start <= created_at < end`
    async fn events_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Event>>;

    /// Newest first
    async fn recent_events(&self, limit: usize) -> Result<Vec<Event>>;

    /// Distinct non-null user ids with an event since `since`
    async fn count_distinct_users_since(&self, since: DateTime<Utc>) -> Result<u64>;

    async fn count_by_type_since(&self, event_type: &str, since: DateTime<Utc>) -> Result<u64>;

    /// Most frequent event types since `since`, highest count first
    async fn top_event_types_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EventTypeCount>>;

    /// Newest first, restricted by `filter`
    async fn activity_feed(
        &self,
        filter: &FeedFilter,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>>;
}

// ============================================================================
// AggregationStore - Windowed summaries
// ============================================================================

#[async_trait]
pub trait AggregationStore: Send + Sync {
    /// Insert or replace the row keyed by `(aggregation_type, time_period)`
    async fn upsert_aggregation(&self, aggregation: &Aggregation) -> Result<()>;

    async fn get_aggregation(
        &self,
        aggregation_type: AggregationType,
        time_period: &str,
    ) -> Result<Option<Aggregation>>;
}

// ============================================================================
// NotificationStore - Persisted per-recipient notifications
// ============================================================================

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(&self, input: CreateNotification) -> Result<Notification>;

    async fn create_notifications(&self, inputs: Vec<CreateNotification>) -> Result<Vec<Notification>> {
        let mut created = Vec::with_capacity(inputs.len());
        for input in inputs {
            created.push(self.create_notification(input).await?);
        }
        Ok(created)
    }

    /// Mark read only if `id` belongs to `user_id` and is unread.
    /// Returns whether a row changed.
    async fn mark_read(&self, id: Uuid, user_id: &str) -> Result<bool>;

    /// Returns the number of rows changed
    async fn mark_read_by_type(&self, user_id: &str, kind: NotificationType) -> Result<u64>;

    async fn count_unread(&self, user_id: &str) -> Result<u64>;

    async fn notification_stats(&self, user_id: &str) -> Result<NotificationStats>;
}

// ============================================================================
// JobBoardReader / RecipientDirectory - Read-only views of the host app
// ============================================================================

/// Read-only queries against the surrounding job board
#[async_trait]
pub trait JobBoardReader: Send + Sync {
    async fn profile(&self, user_id: &str) -> Result<Option<ProfileSnapshot>>;

    async fn count_applications(&self, user_id: &str) -> Result<u64>;

    async fn count_bookmarks(&self, user_id: &str) -> Result<u64>;

    async fn count_searches(&self, user_id: &str) -> Result<u64>;

    /// Newest first
    async fn recent_applications(&self, user_id: &str, limit: usize) -> Result<Vec<ApplicationRecord>>;

    /// Newest first
    async fn recent_bookmarks(&self, user_id: &str, limit: usize) -> Result<Vec<BookmarkRecord>>;

    /// Postings created by an employer
    async fn employer_postings(&self, user_id: &str) -> Result<Vec<PostingRecord>>;

    /// `(status, applied_at)` for every application to the employer's postings
    async fn employer_applications(&self, user_id: &str) -> Result<Vec<(String, DateTime<Utc>)>>;

    /// Newest first
    async fn employer_recent_applications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ReceivedApplicationRecord>>;

    async fn platform_counts(&self) -> Result<PlatformCounts>;

    /// Sectors by posting count, highest first
    async fn top_sectors(&self, limit: usize) -> Result<Vec<SectorCount>>;
}

/// Resolves channel targets to recipient user ids
#[async_trait]
pub trait RecipientDirectory: Send + Sync {
    async fn users_with_role(&self, role: UserRole) -> Result<Vec<String>>;

    /// Employer users tied to a company
    async fn company_members(&self, company_id: &str) -> Result<Vec<String>>;

    /// Companies an employer administers
    async fn companies_for_user(&self, user_id: &str) -> Result<Vec<String>>;
}

// ============================================================================
// AuthVerifier - Credential to identity
// ============================================================================

#[async_trait]
pub trait AuthVerifier: Send + Sync {
    /// `Ok(None)` for unknown or expired credentials
    async fn verify(&self, credential: &str) -> Result<Option<Identity>>;
}

// ============================================================================
// Cache - Short-lived key/value with tag invalidation
// ============================================================================

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[String]) -> Result<()>;

    /// Drop every key tagged with `tag`. Returns how many were removed.
    async fn invalidate_tag(&self, tag: &str) -> Result<u64>;
}

// ============================================================================
// EventBus - Cross-process pub/sub
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Value,
}

pub type BusStream = Pin<Box<dyn Stream<Item = BusMessage> + Send>>;

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Non-blocking publish. Delivery is best effort.
    fn publish(&self, topic: &str, payload: &Value) -> Result<()>;

    /// Stream of messages on any of `topics`
    async fn subscribe(&self, topics: &[String]) -> Result<BusStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NewEvent;

    #[test]
    fn test_feed_filter() {
        let mine = NewEvent::new("job_view").with_user("u1", Some(UserRole::Jobseeker)).into_event();
        let peer = NewEvent::new("job_view").with_user("u2", Some(UserRole::Jobseeker)).into_event();
        let other = NewEvent::new("job_view").with_user("e1", Some(UserRole::Employer)).into_event();

        let all = FeedFilter::default();
        assert!(all.matches(&other));

        let scoped = FeedFilter {
            user_id: Some("u1".into()),
            role: Some(UserRole::Jobseeker),
        };
        assert!(scoped.matches(&mine));
        assert!(scoped.matches(&peer));
        assert!(!scoped.matches(&other));

        let user_only = FeedFilter {
            user_id: Some("u1".into()),
            role: None,
        };
        assert!(!user_only.matches(&peer));
    }
}
