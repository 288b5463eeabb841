// Database-backed NotificationStore
//
// Read acknowledgement is a single conditional UPDATE scoped by owner, so a
// foreign or already-read id changes nothing.

use async_trait::async_trait;
use pulse_core::notification::{CreateNotification, NotificationStats, NotificationType};
use pulse_core::traits::NotificationStore;
use pulse_core::{Notification, PulseError, Result};
use tracing::warn;
use uuid::Uuid;

use crate::models::{non_negative, NotificationRow};
use crate::repositories::Database;

fn into_notification(row: NotificationRow) -> Result<Notification> {
    Notification::try_from(row).map_err(|e| PulseError::store(e.to_string()))
}

#[derive(Clone)]
pub struct DbNotificationStore {
    db: Database,
}

impl DbNotificationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl NotificationStore for DbNotificationStore {
    async fn create_notification(&self, input: CreateNotification) -> Result<Notification> {
        let row = self
            .db
            .create_notification(&input)
            .await
            .map_err(|e| PulseError::store(e.to_string()))?;
        into_notification(row)
    }

    async fn create_notifications(&self, inputs: Vec<CreateNotification>) -> Result<Vec<Notification>> {
        let rows = self
            .db
            .create_notifications(&inputs)
            .await
            .map_err(|e| PulseError::store(e.to_string()))?;
        rows.into_iter().map(into_notification).collect()
    }

    async fn mark_read(&self, id: Uuid, user_id: &str) -> Result<bool> {
        self.db
            .mark_notification_read(id, user_id)
            .await
            .map_err(|e| PulseError::store(e.to_string()))
    }

    async fn mark_read_by_type(&self, user_id: &str, kind: NotificationType) -> Result<u64> {
        self.db
            .mark_notifications_read_by_type(user_id, kind.as_str())
            .await
            .map_err(|e| PulseError::store(e.to_string()))
    }

    async fn count_unread(&self, user_id: &str) -> Result<u64> {
        self.db
            .count_unread_notifications(user_id)
            .await
            .map(non_negative)
            .map_err(|e| PulseError::store(e.to_string()))
    }

    async fn notification_stats(&self, user_id: &str) -> Result<NotificationStats> {
        let rows = self
            .db
            .notification_read_counts(user_id)
            .await
            .map_err(|e| PulseError::store(e.to_string()))?;

        let mut stats = NotificationStats::new();
        for row in rows {
            let kind: NotificationType = match row.kind.parse() {
                Ok(kind) => kind,
                Err(e) => {
                    warn!(user_id, "Skipping notification stats row: {}", e);
                    continue;
                }
            };
            let counts = stats.entry(kind).or_default();
            if row.is_read {
                counts.read += non_negative(row.count);
            } else {
                counts.unread += non_negative(row.count);
            }
        }
        Ok(stats)
    }
}
