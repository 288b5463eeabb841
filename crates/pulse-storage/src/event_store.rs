// Database-backed EventStore and AggregationStore
//
// Batch inserts rely on ON CONFLICT (event_id) DO NOTHING, so a batch that
// is re-queued after a partial failure never produces duplicate rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pulse_core::aggregation::{Aggregation, AggregationType};
use pulse_core::dashboard::EventTypeCount;
use pulse_core::traits::{AggregationStore, EventStore, FeedFilter};
use pulse_core::{Event, PulseError, Result};

use crate::models::non_negative;
use crate::repositories::Database;

fn limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[derive(Clone)]
pub struct DbEventStore {
    db: Database,
}

impl DbEventStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventStore for DbEventStore {
    async fn insert_events(&self, events: &[Event]) -> Result<usize> {
        let inserted = self
            .db
            .insert_events(events)
            .await
            .map_err(|e| PulseError::store(e.to_string()))?;
        Ok(inserted as usize)
    }

    async fn events_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Event>> {
        let rows = self
            .db
            .events_between(start, end)
            .await
            .map_err(|e| PulseError::store(e.to_string()))?;
        Ok(rows.into_iter().map(Event::from).collect())
    }

    async fn recent_events(&self, n: usize) -> Result<Vec<Event>> {
        let rows = self
            .db
            .recent_events(limit(n))
            .await
            .map_err(|e| PulseError::store(e.to_string()))?;
        Ok(rows.into_iter().map(Event::from).collect())
    }

    async fn count_distinct_users_since(&self, since: DateTime<Utc>) -> Result<u64> {
        self.db
            .count_distinct_users_since(since)
            .await
            .map(non_negative)
            .map_err(|e| PulseError::store(e.to_string()))
    }

    async fn count_by_type_since(&self, event_type: &str, since: DateTime<Utc>) -> Result<u64> {
        self.db
            .count_events_by_type_since(event_type, since)
            .await
            .map(non_negative)
            .map_err(|e| PulseError::store(e.to_string()))
    }

    async fn top_event_types_since(
        &self,
        since: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<EventTypeCount>> {
        let rows = self
            .db
            .top_event_types_since(since, limit(n))
            .await
            .map_err(|e| PulseError::store(e.to_string()))?;
        Ok(rows
            .into_iter()
            .map(|row| EventTypeCount {
                count: row.count(),
                event_type: row.event_type,
            })
            .collect())
    }

    async fn activity_feed(
        &self,
        filter: &FeedFilter,
        since: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<Event>> {
        let rows = self
            .db
            .activity_feed(
                filter.user_id.as_deref(),
                filter.role.map(|r| r.as_str()),
                since,
                limit(n),
            )
            .await
            .map_err(|e| PulseError::store(e.to_string()))?;
        Ok(rows.into_iter().map(Event::from).collect())
    }
}

#[async_trait]
impl AggregationStore for DbEventStore {
    async fn upsert_aggregation(&self, aggregation: &Aggregation) -> Result<()> {
        self.db
            .upsert_aggregation(aggregation)
            .await
            .map_err(|e| PulseError::store(e.to_string()))
    }

    async fn get_aggregation(
        &self,
        aggregation_type: AggregationType,
        time_period: &str,
    ) -> Result<Option<Aggregation>> {
        let row = self
            .db
            .get_aggregation(aggregation_type.as_str(), time_period)
            .await
            .map_err(|e| PulseError::store(e.to_string()))?;
        row.map(Aggregation::try_from)
            .transpose()
            .map_err(|e| PulseError::store(e.to_string()))
    }
}
