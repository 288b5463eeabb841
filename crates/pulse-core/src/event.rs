// Analytics event types
//
// Events are immutable once persisted. `event_id` is a UUID v7 assigned at
// collection time and doubles as the dedup key on batch retry.
//
// Decision: event_type stays an open string. Producers add new analytics types
// without a core change; the well-known ones are classified via KnownEventType
// for human-readable descriptions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::identity::UserRole;

/// Well-known event type strings
pub mod event_types {
    pub const JOB_VIEW: &str = "job_view";
    pub const JOB_SEARCH: &str = "job_search";
    pub const JOB_APPLICATION: &str = "job_application";
    pub const JOB_BOOKMARK: &str = "job_bookmark";
    pub const JOB_UNBOOKMARK: &str = "job_unbookmark";
    pub const JOB_CREATE: &str = "job_create";
    pub const JOB_UPDATE: &str = "job_update";
    pub const JOB_DELETE: &str = "job_delete";
    pub const PROFILE_UPDATE: &str = "profile_update";
    pub const DASHBOARD_VIEW: &str = "dashboard_view";
}

/// Classification of an event type string for description formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnownEventType {
    JobView,
    JobSearch,
    JobApplication,
    JobBookmark,
    ProfileUpdate,
    DashboardView,
    Other,
}

impl KnownEventType {
    pub fn classify(event_type: &str) -> Self {
        match event_type {
            event_types::JOB_VIEW => Self::JobView,
            event_types::JOB_SEARCH => Self::JobSearch,
            event_types::JOB_APPLICATION => Self::JobApplication,
            event_types::JOB_BOOKMARK => Self::JobBookmark,
            event_types::PROFILE_UPDATE => Self::ProfileUpdate,
            event_types::DASHBOARD_VIEW => Self::DashboardView,
            _ => Self::Other,
        }
    }
}

/// Request-scoped context attached to an event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
}

/// Event as submitted by a producer (id and timestamp are assigned by the collector)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEvent {
    pub event_type: String,
    pub user_id: Option<String>,
    pub user_role: Option<UserRole>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    #[serde(flatten)]
    pub context: RequestContext,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl NewEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            user_id: None,
            user_role: None,
            entity_type: None,
            entity_id: None,
            metadata: empty_object(),
            context: RequestContext::default(),
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>, role: Option<UserRole>) -> Self {
        self.user_id = Some(user_id.into());
        self.user_role = role;
        self
    }

    pub fn with_role(mut self, role: UserRole) -> Self {
        self.user_role = Some(role);
        self
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_request_context(mut self, context: RequestContext) -> Self {
        self.context = context;
        self
    }

    /// Stamp with a fresh id and the current time
    pub fn into_event(self) -> Event {
        self.into_event_at(Utc::now())
    }

    pub fn into_event_at(self, created_at: DateTime<Utc>) -> Event {
        Event {
            event_id: Uuid::now_v7(),
            user_id: self.user_id,
            user_role: self.user_role,
            event_type: self.event_type,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            metadata: self.metadata,
            ip_address: self.context.ip_address,
            user_agent: self.context.user_agent,
            session_id: self.context.session_id,
            created_at,
        }
    }
}

/// A collected (and possibly persisted) event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: Uuid,
    pub user_id: Option<String>,
    pub user_role: Option<UserRole>,
    pub event_type: String,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub metadata: Value,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Event {
    fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }

    fn fallback_description(&self) -> String {
        format!(
            "{} on {}",
            self.event_type.replace('_', " "),
            self.entity_type.as_deref().unwrap_or("unknown")
        )
    }

    /// Description used in the admin dashboard's recent system events
    pub fn admin_description(&self) -> String {
        match KnownEventType::classify(&self.event_type) {
            KnownEventType::JobView => {
                format!("Job viewed: {}", self.meta_str("jobTitle").unwrap_or("Unknown Job"))
            }
            KnownEventType::JobApplication => format!(
                "New application: {}",
                self.meta_str("jobTitle").unwrap_or("Unknown Job")
            ),
            KnownEventType::JobSearch => format!(
                "Search performed: \"{}\"",
                self.meta_str("query").unwrap_or("No query")
            ),
            KnownEventType::ProfileUpdate => format!(
                "Profile updated: {}",
                self.meta_str("updateType").unwrap_or("Unknown")
            ),
            _ => self.fallback_description(),
        }
    }

    /// Description used in the live activity feed
    pub fn feed_description(&self) -> String {
        match KnownEventType::classify(&self.event_type) {
            KnownEventType::JobView => {
                format!("Viewed job: {}", self.meta_str("jobTitle").unwrap_or("Unknown Job"))
            }
            KnownEventType::JobApplication => {
                format!("Applied to: {}", self.meta_str("jobTitle").unwrap_or("Unknown Job"))
            }
            KnownEventType::JobSearch => {
                format!("Searched for: \"{}\"", self.meta_str("query").unwrap_or("jobs"))
            }
            KnownEventType::JobBookmark => {
                format!("Bookmarked: {}", self.meta_str("jobTitle").unwrap_or("Unknown Job"))
            }
            KnownEventType::ProfileUpdate => format!(
                "Updated profile: {}",
                self.meta_str("updateType").unwrap_or("Unknown")
            ),
            KnownEventType::DashboardView => {
                format!("Viewed {}", self.meta_str("dashboardType").unwrap_or("dashboard"))
            }
            KnownEventType::Other => self.fallback_description(),
        }
    }
}

/// Merge `extra` object fields over `base` (extra wins on key collision)
pub fn merge_metadata(base: Value, extra: Option<Value>) -> Value {
    match (base, extra) {
        (Value::Object(mut base), Some(Value::Object(extra))) => {
            base.extend(extra);
            Value::Object(base)
        }
        (base, _) => base,
    }
}
