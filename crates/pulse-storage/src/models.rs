// Database models (internal, converted into pulse-core types at the store boundary)

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use pulse_core::aggregation::{Aggregation, AggregationType};
use pulse_core::dashboard::{
    ApplicationRecord, BookmarkRecord, PostingRecord, ProfileSnapshot, ReceivedApplicationRecord,
};
use pulse_core::{Event, Identity, Notification, UserRole};
use sqlx::FromRow;
use tracing::warn;
use uuid::Uuid;

pub(crate) fn non_negative(n: i64) -> u64 {
    u64::try_from(n).unwrap_or(0)
}

fn parse_role(role: Option<&str>) -> Option<UserRole> {
    let role = role?;
    match role.parse() {
        Ok(role) => Some(role),
        Err(e) => {
            warn!("Ignoring stored role: {}", e);
            None
        }
    }
}

// ============================================
// Events and aggregations
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub event_id: Uuid,
    pub user_id: Option<String>,
    pub user_role: Option<String>,
    pub event_type: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub metadata: sqlx::types::JsonValue,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<EventRow> for Event {
    fn from(row: EventRow) -> Self {
        Event {
            event_id: row.event_id,
            user_id: row.user_id,
            user_role: parse_role(row.user_role.as_deref()),
            event_type: row.event_type,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            metadata: row.metadata,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            session_id: row.session_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AggregationRow {
    pub aggregation_type: String,
    pub time_period: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub metrics: sqlx::types::JsonValue,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<AggregationRow> for Aggregation {
    type Error = anyhow::Error;

    fn try_from(row: AggregationRow) -> Result<Self> {
        let aggregation_type = match row.aggregation_type.as_str() {
            "hourly" => AggregationType::Hourly,
            "daily" => AggregationType::Daily,
            other => return Err(anyhow!("unknown aggregation type: {}", other)),
        };
        Ok(Aggregation {
            aggregation_type,
            time_period: row.time_period,
            start_time: row.start_time,
            end_time: row.end_time,
            metrics: serde_json::from_value(row.metrics).context("malformed aggregation metrics")?,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct TypeCountRow {
    pub event_type: String,
    pub count: i64,
}

impl TypeCountRow {
    pub fn count(&self) -> u64 {
        non_negative(self.count)
    }
}

// ============================================
// Notifications
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct NotificationRow {
    pub id: Uuid,
    pub user_id: String,
    #[sqlx(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    pub data: Option<sqlx::types::JsonValue>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Notification {
            id: row.id,
            user_id: row.user_id,
            kind: row.kind.parse().map_err(|e: String| anyhow!(e))?,
            title: row.title,
            message: row.message,
            data: row.data,
            is_read: row.is_read,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ReadCountRow {
    #[sqlx(rename = "type")]
    pub kind: String,
    pub is_read: bool,
    pub count: i64,
}

// ============================================
// Job board (read-only)
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct ProfileRow {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub skills: Option<String>,
    pub experience: Option<String>,
    pub education: Option<String>,
    pub profile_picture: Option<String>,
    pub location: Option<String>,
    pub phone: Option<String>,
}

impl From<ProfileRow> for ProfileSnapshot {
    fn from(row: ProfileRow) -> Self {
        ProfileSnapshot {
            first_name: row.first_name,
            last_name: row.last_name,
            bio: row.bio,
            skills: row.skills,
            experience: row.experience,
            education: row.education,
            profile_picture: row.profile_picture,
            location: row.location,
            phone: row.phone,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ApplicationRow {
    pub id: String,
    pub job_title: String,
    pub company: Option<String>,
    pub status: String,
    pub applied_at: DateTime<Utc>,
}

impl From<ApplicationRow> for ApplicationRecord {
    fn from(row: ApplicationRow) -> Self {
        ApplicationRecord {
            id: row.id,
            job_title: row.job_title,
            company: row.company,
            status: row.status,
            applied_at: row.applied_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct BookmarkRow {
    pub id: String,
    pub job_title: String,
    pub company: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<BookmarkRow> for BookmarkRecord {
    fn from(row: BookmarkRow) -> Self {
        BookmarkRecord {
            id: row.id,
            job_title: row.job_title,
            company: row.company,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PostingRow {
    pub id: String,
    pub title: String,
    pub is_active: bool,
    pub views: i64,
    pub applications_count: i64,
}

impl From<PostingRow> for PostingRecord {
    fn from(row: PostingRow) -> Self {
        PostingRecord {
            id: row.id,
            title: row.title,
            is_active: row.is_active,
            views: non_negative(row.views),
            applications_count: non_negative(row.applications_count),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct StatusRow {
    pub status: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ReceivedApplicationRow {
    pub id: String,
    pub job_title: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub status: String,
    pub applied_at: DateTime<Utc>,
}

impl From<ReceivedApplicationRow> for ReceivedApplicationRecord {
    fn from(row: ReceivedApplicationRow) -> Self {
        ReceivedApplicationRecord {
            id: row.id,
            job_title: row.job_title,
            first_name: row.first_name,
            last_name: row.last_name,
            status: row.status,
            applied_at: row.applied_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PlatformCountsRow {
    pub total_users: i64,
    pub active_users: i64,
    pub total_jobs: i64,
    pub active_jobs: i64,
    pub total_applications: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct SectorRow {
    pub sector: String,
    pub count: i64,
}

// ============================================
// Sessions
// ============================================

#[derive(Debug, Clone, FromRow)]
pub struct SessionIdentityRow {
    pub user_id: String,
    pub role: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

impl SessionIdentityRow {
    /// `None` when the stored role is not one the pipeline knows
    pub fn into_identity(self) -> Option<Identity> {
        let role = parse_role(Some(&self.role))?;
        let name = match (self.first_name.as_deref(), self.last_name.as_deref()) {
            (Some(first), Some(last)) => format!("{} {}", first, last),
            (Some(first), None) => first.to_string(),
            (None, Some(last)) => last.to_string(),
            (None, None) => self.email.unwrap_or_else(|| self.user_id.clone()),
        };
        Some(Identity::new(self.user_id, role, name))
    }
}
