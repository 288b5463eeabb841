// Real-time fan-out service
// Decision: Persist before push; a failed persist is returned to the caller and nothing is pushed
// Decision: Unread counts are recomputed from the store, never tracked in memory
// Decision: Room pushes send one shared frame; per-recipient counts follow it
// Decision: Activity relay consumes bus topics; without a bus only direct calls fan out

use chrono::Utc;
use futures::future::join_all;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analytics::AnalyticsProcessor;
use crate::collector::topics;
use crate::config::FanOutConfig;
use crate::error::Result;
use crate::event::Event;
use crate::identity::{Identity, UserRole};
use crate::messages::{
    ClientMessage, DashboardUpdate, NotificationCount, NotificationPayload, PongPayload,
    ServerMessage, TypingPayload, UpdateKind,
};
use crate::notification::{
    CreateNotification, Notification, NotificationInput, NotificationStats, NotificationType,
};
use crate::registry::{Channel, ConnectionId, ConnectionRegistry};
use crate::traits::{BusMessage, EventBus, NotificationStore, RecipientDirectory};

pub struct FanOutService {
    config: FanOutConfig,
    registry: Arc<ConnectionRegistry>,
    analytics: Arc<AnalyticsProcessor>,
    notifications: Arc<dyn NotificationStore>,
    directory: Arc<dyn RecipientDirectory>,
    bus: Option<Arc<dyn EventBus>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl FanOutService {
    pub fn new(
        config: FanOutConfig,
        registry: Arc<ConnectionRegistry>,
        analytics: Arc<AnalyticsProcessor>,
        notifications: Arc<dyn NotificationStore>,
        directory: Arc<dyn RecipientDirectory>,
        bus: Option<Arc<dyn EventBus>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            registry,
            analytics,
            notifications,
            directory,
            bus,
            shutdown_tx,
            shutdown_rx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn analytics(&self) -> &Arc<AnalyticsProcessor> {
        &self.analytics
    }

    // ========================================================================
    // Notifications
    // ========================================================================

    /// Persist a notification for one user, then push it and the new unread count
    pub async fn notify(&self, user_id: &str, input: NotificationInput) -> Result<Notification> {
        let notification = self
            .notifications
            .create_notification(CreateNotification::new(user_id, &input))
            .await?;

        let channel = Channel::User(user_id.to_string());
        let delivered = self.registry.send_to_channel(
            &channel,
            ServerMessage::NewNotification(NotificationPayload::persisted(&notification, Utc::now())),
        );
        debug!(
            user_id,
            notification_id = %notification.id,
            kind = %notification.kind,
            delivered,
            "Notification stored"
        );

        if delivered > 0 {
            self.push_count_logged(user_id).await;
        }
        Ok(notification)
    }

    /// `notify` for each user independently. Failures are logged and skipped.
    pub async fn notify_users(&self, user_ids: &[String], input: NotificationInput) -> Vec<Notification> {
        let mut created = Vec::with_capacity(user_ids.len());
        for user_id in user_ids {
            match self.notify(user_id, input.clone()).await {
                Ok(notification) => created.push(notification),
                Err(e) => error!(user_id = %user_id, "Failed to notify user: {}", e),
            }
        }
        created
    }

    pub async fn notify_role(&self, role: UserRole, input: NotificationInput) -> Result<Vec<Notification>> {
        self.notify_room(&Channel::Role(role), input).await
    }

    /// Persist one notification per member of `channel`, push the content once
    /// to the channel, then push each live member's unread count.
    pub async fn notify_room(&self, channel: &Channel, input: NotificationInput) -> Result<Vec<Notification>> {
        let recipients = self.channel_members(channel).await?;
        if recipients.is_empty() {
            debug!(channel = %channel, "No recipients for room notification");
            return Ok(Vec::new());
        }

        let rows = recipients
            .iter()
            .map(|user_id| CreateNotification::new(user_id.as_str(), &input))
            .collect();
        let created = self.notifications.create_notifications(rows).await?;

        // Only users with a stored row see the push
        let persisted: HashSet<String> = created.iter().map(|n| n.user_id.clone()).collect();
        let delivered = self.registry.send_to_channel_filtered(
            channel,
            &persisted,
            ServerMessage::NewNotification(NotificationPayload::room(&input, Utc::now())),
        );

        let online: Vec<&str> = persisted
            .iter()
            .map(String::as_str)
            .filter(|user_id| self.registry.is_user_online(user_id))
            .collect();
        join_all(online.iter().map(|user_id| self.push_count_logged(user_id))).await;

        info!(
            channel = %channel,
            kind = %input.kind,
            persisted = created.len(),
            delivered,
            "Room notification sent"
        );
        Ok(created)
    }

    async fn channel_members(&self, channel: &Channel) -> Result<Vec<String>> {
        let mut members = match channel {
            Channel::User(user_id) => vec![user_id.clone()],
            Channel::Role(role) => self.directory.users_with_role(*role).await?,
            Channel::Company(company_id) => self.directory.company_members(company_id).await?,
            Channel::Admin => self.directory.users_with_role(UserRole::Admin).await?,
        };
        members.sort();
        members.dedup();
        Ok(members)
    }

    /// Mark one notification read if `user_id` owns it. Someone else's id is
    /// a silent no-op. Returns whether anything changed.
    pub async fn acknowledge_read(&self, notification_id: Uuid, user_id: &str) -> Result<bool> {
        let changed = self.notifications.mark_read(notification_id, user_id).await?;
        if changed {
            self.push_unread_count(user_id).await?;
        } else {
            debug!(user_id, %notification_id, "Read acknowledgement had no effect");
        }
        Ok(changed)
    }

    pub async fn mark_read_by_type(&self, user_id: &str, kind: NotificationType) -> Result<u64> {
        let changed = self.notifications.mark_read_by_type(user_id, kind).await?;
        if changed > 0 {
            self.push_unread_count(user_id).await?;
        }
        Ok(changed)
    }

    pub async fn notification_stats(&self, user_id: &str) -> Result<NotificationStats> {
        self.notifications.notification_stats(user_id).await
    }

    /// Recompute and push the unread count. Returns the count.
    pub async fn push_unread_count(&self, user_id: &str) -> Result<u64> {
        let count = self.notifications.count_unread(user_id).await?;
        self.registry.send_to_channel(
            &Channel::User(user_id.to_string()),
            ServerMessage::NotificationCount(NotificationCount {
                count,
                user_id: user_id.to_string(),
            }),
        );
        Ok(count)
    }

    async fn push_count_logged(&self, user_id: &str) {
        if let Err(e) = self.push_unread_count(user_id).await {
            warn!(user_id, "Failed to push unread count: {}", e);
        }
    }

    /// Ephemeral announcement to every connection; nothing is stored
    pub fn broadcast_announcement(&self, input: &NotificationInput) -> usize {
        self.registry.broadcast_all(ServerMessage::BroadcastNotification(
            NotificationPayload::room(input, Utc::now()),
        ))
    }

    // ========================================================================
    // Dashboard pushes
    // ========================================================================

    /// Push the current real-time metrics to every connection
    pub async fn broadcast_metrics(&self) -> Result<usize> {
        if self.registry.connection_count() == 0 {
            return Ok(0);
        }
        let metrics = self.analytics.get_real_time_metrics().await?;
        let update = DashboardUpdate::new(UpdateKind::Metrics, serde_json::to_value(metrics)?);
        Ok(self.registry.broadcast_all(ServerMessage::DashboardMetrics(update)))
    }

    pub fn send_user_update(&self, user_id: &str, kind: UpdateKind, data: Value) -> usize {
        let update = DashboardUpdate::new(kind, data).scoped(Some(user_id.to_string()), None);
        self.registry.send_to_channel(
            &Channel::User(user_id.to_string()),
            ServerMessage::DashboardUpdate(update),
        )
    }

    pub fn send_role_update(&self, role: UserRole, kind: UpdateKind, data: Value) -> usize {
        let update = DashboardUpdate::new(kind, data).scoped(None, Some(role));
        self.registry
            .send_to_channel(&Channel::Role(role), ServerMessage::DashboardUpdate(update))
    }

    pub fn send_admin_update(&self, kind: UpdateKind, data: Value) -> usize {
        let update = DashboardUpdate::new(kind, data).scoped(None, Some(UserRole::Admin));
        self.registry
            .send_to_channel(&Channel::Admin, ServerMessage::DashboardUpdate(update))
    }

    /// Compute a user's dashboard and push it to their channel
    pub async fn user_dashboard(&self, user_id: &str, role: UserRole) -> Result<usize> {
        let metrics = self.analytics.get_dashboard_metrics(user_id, role).await?;
        Ok(self.send_user_update(user_id, UpdateKind::Metrics, serde_json::to_value(metrics)?))
    }

    /// Relay a collected event to its user, its role and the admins as an
    /// activity update. A connection in several of those channels gets it once.
    pub fn handle_bus_event(&self, message: &BusMessage) -> usize {
        let event: Event = match serde_json::from_value(message.payload.clone()) {
            Ok(event) => event,
            Err(e) => {
                warn!(topic = %message.topic, "Ignoring malformed bus payload: {}", e);
                return 0;
            }
        };

        let mut data = message.payload.clone();
        if let Value::Object(map) = &mut data {
            map.insert("description".to_string(), Value::String(event.feed_description()));
        }

        let mut channels = Vec::with_capacity(3);
        if let Some(user_id) = &event.user_id {
            channels.push(Channel::User(user_id.clone()));
        }
        if let Some(role) = event.user_role {
            channels.push(Channel::Role(role));
        }
        channels.push(Channel::Admin);

        let update = DashboardUpdate::new(UpdateKind::Activity, data)
            .scoped(event.user_id.clone(), event.user_role);
        self.registry
            .send_to_channels(&channels, ServerMessage::DashboardUpdate(update))
    }

    // ========================================================================
    // Inbound client frames
    // ========================================================================

    pub async fn handle_client_message(
        &self,
        connection_id: ConnectionId,
        identity: &Identity,
        message: ClientMessage,
    ) -> Result<()> {
        match message {
            ClientMessage::NotificationRead(payload) => {
                self.acknowledge_read(payload.notification_id, &identity.user_id)
                    .await?;
            }
            ClientMessage::TypingStart(target) => {
                self.relay_typing(identity, &target.receiver_id, true);
            }
            ClientMessage::TypingStop(target) => {
                self.relay_typing(identity, &target.receiver_id, false);
            }
            ClientMessage::Ping => {
                self.registry.send_to_connection(
                    connection_id,
                    ServerMessage::Pong(PongPayload { timestamp: Utc::now() }),
                );
            }
        }
        Ok(())
    }

    fn relay_typing(&self, sender: &Identity, receiver_id: &str, is_typing: bool) {
        if receiver_id == sender.user_id {
            return;
        }
        self.registry.send_to_channel(
            &Channel::User(receiver_id.to_string()),
            ServerMessage::UserTyping(TypingPayload {
                user_id: sender.user_id.clone(),
                user_name: sender.display_name.clone(),
                is_typing,
            }),
        );
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the metrics broadcast timer and, with a bus, the activity relay
    pub fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock();
        if !handles.is_empty() {
            return;
        }

        let service = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let interval = self.config.broadcast_interval;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = service.broadcast_metrics().await {
                            error!("Metrics broadcast failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
            debug!("Metrics broadcast loop exited");
        }));

        if let Some(bus) = self.bus.clone() {
            let service = Arc::clone(self);
            let mut shutdown_rx = self.shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                let mut stream = match bus.subscribe(&topics::relayed()).await {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!("Activity relay disabled, bus subscribe failed: {}", e);
                        return;
                    }
                };
                loop {
                    tokio::select! {
                        message = stream.next() => match message {
                            Some(message) => {
                                service.handle_bus_event(&message);
                            }
                            None => {
                                warn!("Bus stream ended, activity relay stopped");
                                break;
                            }
                        },
                        _ = shutdown_rx.changed() => break,
                    }
                }
                debug!("Activity relay loop exited");
            }));
        }

        info!(
            broadcast_interval_ms = interval.as_millis() as u64,
            relay = self.bus.is_some(),
            "Fan-out service started"
        );
    }

    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Fan-out task panicked: {}", e);
            }
        }
        info!("Fan-out service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyticsConfig;
    use crate::event::NewEvent;
    use crate::memory::{InMemoryJobBoard, InMemoryStore, StaticVerifier};
    use crate::messages::TypingTarget;
    use crate::registry::{ConnectionHandle, Frame};
    use serde_json::json;

    struct Fixture {
        service: Arc<FanOutService>,
        store: Arc<InMemoryStore>,
        board: Arc<InMemoryJobBoard>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let board = Arc::new(InMemoryJobBoard::new());
        board.add_user("j1", UserRole::Jobseeker);
        board.add_user("j2", UserRole::Jobseeker);
        board.add_user("a1", UserRole::Admin);

        let verifier = StaticVerifier::new()
            .with("tok-j1", Identity::new("j1", UserRole::Jobseeker, "Jo"))
            .with("tok-j2", Identity::new("j2", UserRole::Jobseeker, "Jay"))
            .with("tok-a1", Identity::new("a1", UserRole::Admin, "Ad"));
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(verifier), board.clone(), 16));
        let analytics = Arc::new(AnalyticsProcessor::new(
            AnalyticsConfig::default(),
            store.clone(),
            store.clone(),
            board.clone(),
            None,
        ));
        let service = Arc::new(FanOutService::new(
            FanOutConfig::default(),
            registry,
            analytics,
            store.clone(),
            board.clone(),
            None,
        ));
        Fixture {
            service,
            store,
            board,
        }
    }

    async fn connect(service: &FanOutService, token: &str) -> ConnectionHandle {
        let mut handle = service.registry().connect(token).await.unwrap();
        // connected frame
        handle.receiver.recv().await.unwrap();
        handle
    }

    fn drain(handle: &mut ConnectionHandle) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = handle.receiver.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn test_role_push_skips_members_without_a_row() {
        let f = fixture();
        let mut j1 = connect(&f.service, "tok-j1").await;
        let mut j2 = connect(&f.service, "tok-j2").await;
        // still holds a live connection in role:jobseeker
        f.board.deactivate_user("j2");

        let created = f
            .service
            .notify_role(
                UserRole::Jobseeker,
                NotificationInput::new(NotificationType::SystemAnnouncement, "Heads up", "Maintenance"),
            )
            .await
            .unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].user_id, "j1");
        assert!(f.store.notifications_for("j2").is_empty());

        let j1_kinds: Vec<_> = drain(&mut j1).iter().map(|frame| frame.kind()).collect();
        assert_eq!(j1_kinds, vec!["new_notification", "notification_count"]);
        assert!(drain(&mut j2).is_empty());
    }

    #[tokio::test]
    async fn test_notify_offline_user_still_persists() {
        let f = fixture();
        let input = NotificationInput::new(NotificationType::Welcome, "Hi", "Welcome aboard");
        let stored = f.service.notify("j1", input).await.unwrap();
        assert_eq!(stored.user_id, "j1");
        assert_eq!(f.store.notifications_for("j1").len(), 1);
    }

    #[tokio::test]
    async fn test_notify_failure_pushes_nothing() {
        let f = fixture();
        let mut j1 = connect(&f.service, "tok-j1").await;
        f.store.fail_next_notification_writes(1);

        let input = NotificationInput::new(NotificationType::Welcome, "Hi", "Welcome");
        assert!(f.service.notify("j1", input).await.is_err());
        assert!(drain(&mut j1).is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_read_ignores_foreign_notification() {
        let f = fixture();
        let input = NotificationInput::new(NotificationType::Welcome, "Hi", "Welcome");
        let theirs = f.service.notify("j2", input).await.unwrap();

        assert!(!f.service.acknowledge_read(theirs.id, "j1").await.unwrap());
        assert!(!f.store.notifications_for("j2")[0].is_read);
        assert!(f.service.acknowledge_read(theirs.id, "j2").await.unwrap());
    }

    #[tokio::test]
    async fn test_typing_reaches_only_receiver() {
        let f = fixture();
        let j1 = connect(&f.service, "tok-j1").await;
        let mut j2 = connect(&f.service, "tok-j2").await;
        let mut a1 = connect(&f.service, "tok-a1").await;

        f.service
            .handle_client_message(
                j1.id,
                &j1.identity,
                ClientMessage::TypingStart(TypingTarget { receiver_id: "j2".into() }),
            )
            .await
            .unwrap();

        let frames = drain(&mut j2);
        assert_eq!(frames.len(), 1);
        match frames[0].as_ref() {
            ServerMessage::UserTyping(payload) => {
                assert_eq!(payload.user_id, "j1");
                assert_eq!(payload.user_name, "Jo");
                assert!(payload.is_typing);
            }
            other => panic!("expected user_typing, got {:?}", other),
        }
        assert!(drain(&mut a1).is_empty());
    }

    #[tokio::test]
    async fn test_ping_answers_same_connection() {
        let f = fixture();
        let mut j1 = connect(&f.service, "tok-j1").await;
        let mut j1_other = connect(&f.service, "tok-j1").await;

        f.service
            .handle_client_message(j1.id, &j1.identity.clone(), ClientMessage::Ping)
            .await
            .unwrap();

        assert_eq!(drain(&mut j1)[0].kind(), "pong");
        assert!(drain(&mut j1_other).is_empty());
    }

    #[tokio::test]
    async fn test_bus_relay_dedupes_admin() {
        let f = fixture();
        let mut a1 = connect(&f.service, "tok-a1").await;
        let mut j2 = connect(&f.service, "tok-j2").await;

        let event = NewEvent::new("dashboard_view")
            .with_user("a1", Some(UserRole::Admin))
            .with_metadata(json!({"dashboardType": "admin"}))
            .into_event();
        let message = BusMessage {
            topic: topics::event_type("dashboard_view"),
            payload: serde_json::to_value(&event).unwrap(),
        };

        assert_eq!(f.service.handle_bus_event(&message), 1);
        let frames = drain(&mut a1);
        assert_eq!(frames.len(), 1);
        match frames[0].as_ref() {
            ServerMessage::DashboardUpdate(update) => {
                assert_eq!(update.kind, UpdateKind::Activity);
                assert_eq!(update.data["description"], "Viewed admin");
            }
            other => panic!("expected dashboard_update, got {:?}", other),
        }
        assert!(drain(&mut j2).is_empty());
    }

    #[tokio::test]
    async fn test_malformed_bus_payload_is_ignored() {
        let f = fixture();
        let message = BusMessage {
            topic: "analytics:job_view".into(),
            payload: json!({"nope": true}),
        };
        assert_eq!(f.service.handle_bus_event(&message), 0);
    }

    #[tokio::test]
    async fn test_broadcast_metrics_skips_when_idle() {
        let f = fixture();
        assert_eq!(f.service.broadcast_metrics().await.unwrap(), 0);

        let mut j1 = connect(&f.service, "tok-j1").await;
        assert_eq!(f.service.broadcast_metrics().await.unwrap(), 1);
        assert_eq!(drain(&mut j1)[0].kind(), "dashboard_metrics");
    }
}
