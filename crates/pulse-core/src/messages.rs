// Wire messages exchanged with connected clients
//
// Every frame is `{"event": <kind>, "data": <payload>}` with camelCase payload
// fields. Outbound frames are built once and shared between recipients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::identity::UserRole;
use crate::notification::{Notification, NotificationInput, NotificationType};

/// Server -> client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected(ConnectedPayload),
    NewNotification(NotificationPayload),
    NotificationCount(NotificationCount),
    DashboardMetrics(DashboardUpdate),
    DashboardUpdate(DashboardUpdate),
    BroadcastNotification(NotificationPayload),
    UserTyping(TypingPayload),
    Pong(PongPayload),
}

impl ServerMessage {
    /// Event name on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected(_) => "connected",
            ServerMessage::NewNotification(_) => "new_notification",
            ServerMessage::NotificationCount(_) => "notification_count",
            ServerMessage::DashboardMetrics(_) => "dashboard_metrics",
            ServerMessage::DashboardUpdate(_) => "dashboard_update",
            ServerMessage::BroadcastNotification(_) => "broadcast_notification",
            ServerMessage::UserTyping(_) => "user_typing",
            ServerMessage::Pong(_) => "pong",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub message: String,
    pub connection_id: u64,
    pub user_id: String,
    pub role: UserRole,
    pub user_room: String,
    pub channels: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Notification as pushed live. Room-wide pushes carry no per-recipient
/// fields (id, userId, isRead, createdAt, updatedAt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub is_read: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub updated_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationPayload {
    pub fn persisted(notification: &Notification, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Some(notification.id),
            user_id: Some(notification.user_id.clone()),
            kind: notification.kind,
            title: notification.title.clone(),
            message: notification.message.clone(),
            data: notification.data.clone(),
            is_read: Some(notification.is_read),
            created_at: Some(notification.created_at),
            updated_at: Some(notification.updated_at),
            timestamp,
        }
    }

    pub fn room(input: &NotificationInput, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            user_id: None,
            kind: input.kind,
            title: input.title.clone(),
            message: input.message.clone(),
            data: input.data.clone(),
            is_read: None,
            created_at: None,
            updated_at: None,
            timestamp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationCount {
    pub count: u64,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateKind {
    Metrics,
    Notification,
    Activity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardUpdate {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub user_role: Option<UserRole>,
}

impl DashboardUpdate {
    pub fn new(kind: UpdateKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
            user_id: None,
            user_role: None,
        }
    }

    pub fn scoped(mut self, user_id: Option<String>, user_role: Option<UserRole>) -> Self {
        self.user_id = user_id;
        self.user_role = user_role;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub user_id: String,
    pub user_name: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PongPayload {
    pub timestamp: DateTime<Utc>,
}

/// Client -> server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    NotificationRead(NotificationReadPayload),
    TypingStart(TypingTarget),
    TypingStop(TypingTarget),
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationReadPayload {
    pub notification_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingTarget {
    pub receiver_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_count_frame_shape() {
        let frame = ServerMessage::NotificationCount(NotificationCount {
            count: 2,
            user_id: "u1".into(),
        });
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({"event": "notification_count", "data": {"count": 2, "userId": "u1"}})
        );
        assert_eq!(frame.kind(), "notification_count");
    }

    #[test]
    fn test_room_payload_omits_recipient_fields() {
        let input = NotificationInput::new(NotificationType::SystemAnnouncement, "Hi", "All hands");
        let payload = NotificationPayload::room(&input, Utc::now());
        let value = serde_json::to_value(ServerMessage::NewNotification(payload)).unwrap();
        let data = value["data"].as_object().unwrap();
        assert!(!data.contains_key("id"));
        assert!(!data.contains_key("userId"));
        assert!(!data.contains_key("isRead"));
        assert_eq!(data["type"], "SYSTEM_ANNOUNCEMENT");
    }

    #[test]
    fn test_dashboard_update_shape() {
        let update = DashboardUpdate::new(UpdateKind::Activity, json!({"eventType": "job_view"}))
            .scoped(Some("u1".into()), Some(UserRole::Jobseeker));
        let value = serde_json::to_value(ServerMessage::DashboardUpdate(update)).unwrap();
        assert_eq!(value["event"], "dashboard_update");
        assert_eq!(value["data"]["type"], "activity");
        assert_eq!(value["data"]["userRole"], "jobseeker");
    }

    #[test]
    fn test_parse_client_messages() {
        let id = Uuid::now_v7();
        let raw = json!({"event": "notification_read", "data": {"notificationId": id}}).to_string();
        assert_eq!(
            serde_json::from_str::<ClientMessage>(&raw).unwrap(),
            ClientMessage::NotificationRead(NotificationReadPayload { notification_id: id })
        );
        assert_eq!(
            serde_json::from_str::<ClientMessage>(r#"{"event":"ping"}"#).unwrap(),
            ClientMessage::Ping
        );
        assert!(serde_json::from_str::<ClientMessage>(r#"{"event":"teleport"}"#).is_err());
    }
}
