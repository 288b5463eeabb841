// Integration tests for the event pipeline
//
// These drive the collector, analytics processor, registry and fan-out
// service together through the in-memory collaborators.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use pulse_core::{
    collector::{Actor, JobRef},
    memory::{InMemoryBus, InMemoryJobBoard, InMemoryStore, JobSeed, StaticVerifier},
    messages::{ClientMessage, NotificationReadPayload},
    notification::{CreateNotification, NotificationStats, NotificationType},
    registry::Frame,
    traits::{EventBus, EventStore},
    AggregationType, AnalyticsConfig, AnalyticsProcessor, Channel, CollectorConfig,
    ConnectionHandle, ConnectionRegistry, DashboardMetrics, EventCollector, FanOutConfig,
    FanOutService, Identity, NewEvent, Notification, NotificationInput, NotificationStore,
    Result, ServerMessage, UserRole,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

// =============================================================================
// Fixture
// =============================================================================

struct Pipeline {
    store: Arc<InMemoryStore>,
    board: Arc<InMemoryJobBoard>,
    verifier: Arc<StaticVerifier>,
    fanout: Arc<FanOutService>,
}

impl Pipeline {
    fn new() -> Self {
        Self::with_store(Arc::new(InMemoryStore::new()), None)
    }

    fn with_store(store: Arc<InMemoryStore>, notifications: Option<Arc<dyn NotificationStore>>) -> Self {
        let board = Arc::new(InMemoryJobBoard::new());
        let verifier = Arc::new(StaticVerifier::new());
        let registry = Arc::new(ConnectionRegistry::new(verifier.clone(), board.clone(), 64));
        let analytics = Arc::new(AnalyticsProcessor::new(
            AnalyticsConfig::default(),
            store.clone(),
            store.clone(),
            board.clone(),
            None,
        ));
        let notifications = notifications.unwrap_or_else(|| store.clone() as Arc<dyn NotificationStore>);
        let fanout = Arc::new(FanOutService::new(
            FanOutConfig::default(),
            registry,
            analytics,
            notifications,
            board.clone(),
            None,
        ));
        Self {
            store,
            board,
            verifier,
            fanout,
        }
    }

    fn user(&self, user_id: &str, role: UserRole) {
        self.board.add_user(user_id, role);
        self.verifier.insert(
            format!("tok-{}", user_id),
            Identity::new(user_id, role, format!("User {}", user_id)),
        );
    }

    async fn connect(&self, user_id: &str) -> ConnectionHandle {
        let mut handle = self
            .fanout
            .registry()
            .connect(&format!("tok-{}", user_id))
            .await
            .unwrap();
        let first = handle.receiver.recv().await.unwrap();
        assert_eq!(first.kind(), "connected");
        handle
    }
}

fn drain(handle: &mut ConnectionHandle) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = handle.receiver.try_recv() {
        frames.push(frame);
    }
    frames
}

fn kinds(frames: &[Frame]) -> Vec<&'static str> {
    frames.iter().map(|f| f.kind()).collect()
}

fn count_of(frame: &Frame) -> u64 {
    match frame.as_ref() {
        ServerMessage::NotificationCount(count) => count.count,
        other => panic!("expected notification_count, got {:?}", other),
    }
}

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

// =============================================================================
// Collector and aggregation
// =============================================================================

#[tokio::test]
async fn test_aggregation_rerun_is_byte_identical() {
    let pipeline = Pipeline::new();
    let events: Vec<_> = (0..7)
        .map(|i| {
            NewEvent::new(if i % 2 == 0 { "job_view" } else { "job_search" })
                .with_user(format!("u{}", i % 3), Some(UserRole::Jobseeker))
                .into_event_at(Utc.with_ymd_and_hms(2026, 3, 4, 10, i, 0).unwrap())
        })
        .collect();
    pipeline.store.insert_events(&events).await.unwrap();

    let analytics = pipeline.fanout.analytics();
    let now = at("2026-03-04T10:45:00Z");
    let first = analytics.process_events_at(now).await.unwrap();
    let second = analytics.process_events_at(now).await.unwrap();

    for (a, b) in first.iter().zip(&second) {
        assert_eq!(
            serde_json::to_string(&a.metrics).unwrap(),
            serde_json::to_string(&b.metrics).unwrap()
        );
    }

    let hourly = analytics
        .get_aggregation(AggregationType::Hourly, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(hourly.metrics.total_events, 7);
    assert_eq!(hourly.metrics.event_types["job_view"], 4);
    assert_eq!(hourly.time_period, "2026-03-04T10:00:00Z");
}

#[tokio::test]
async fn test_same_event_id_is_stored_once() {
    let store = Arc::new(InMemoryStore::new());
    let event = NewEvent::new("job_view").into_event();

    assert_eq!(store.insert_events(&[event.clone()]).await.unwrap(), 1);
    assert_eq!(store.insert_events(&[event]).await.unwrap(), 0);
    assert_eq!(store.event_count(), 1);
}

#[tokio::test]
async fn test_failed_flush_is_retried_without_duplicates() {
    let store = Arc::new(InMemoryStore::new());
    let collector = EventCollector::new(CollectorConfig::default(), store.clone(), None);

    for _ in 0..3 {
        collector.collect(NewEvent::new("job_search"));
    }
    store.fail_next_inserts(1);

    assert_eq!(collector.flush().await, 0);
    assert_eq!(collector.queue_len(), 3);
    assert_eq!(collector.flush().await, 3);
    assert_eq!(collector.flush().await, 0);
    assert_eq!(store.event_count(), 3);
}

#[tokio::test]
async fn test_sampling_keeps_about_half() {
    let store = Arc::new(InMemoryStore::new());
    let config = CollectorConfig::default()
        .with_sampling_rate(0.5)
        .with_batch_size(20_000)
        .with_queue_capacity(20_000);
    let collector = EventCollector::new(config, store.clone(), None);

    for _ in 0..10_000 {
        collector.collect(NewEvent::new("job_view"));
    }
    let flushed = collector.flush().await;

    assert!((4_500..=5_500).contains(&flushed), "flushed {}", flushed);
    assert_eq!(store.event_count(), flushed);
    assert_eq!(collector.stats().sampled_out as usize + flushed, 10_000);
}

#[tokio::test]
async fn test_dashboard_without_cache() {
    let pipeline = Pipeline::new();
    pipeline.user("j1", UserRole::Jobseeker);
    pipeline.board.add_job(JobSeed::new("p1", "SRE", "e1").with_company("Acme"));
    pipeline
        .board
        .add_application("a1", "j1", "p1", "pending", Utc::now());
    pipeline.board.add_search("j1");

    let analytics = pipeline.fanout.analytics();
    assert!(!analytics.has_cache());

    for _ in 0..2 {
        match analytics
            .get_dashboard_metrics("j1", UserRole::Jobseeker)
            .await
            .unwrap()
        {
            DashboardMetrics::Jobseeker(metrics) => {
                assert_eq!(metrics.applications_count, 1);
                assert_eq!(metrics.search_count, 1);
                assert_eq!(metrics.recent_applications[0].company, "Acme");
            }
            other => panic!("expected jobseeker dashboard, got {:?}", other),
        }
    }
}

// =============================================================================
// Notification ordering
// =============================================================================

/// Store double that fails the test if a frame reached the recipient before
/// the row was written, and records the call order.
struct OrderCheckingStore {
    inner: Arc<InMemoryStore>,
    watched: Mutex<Option<mpsc::Receiver<Frame>>>,
    calls: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl NotificationStore for OrderCheckingStore {
    async fn create_notification(&self, input: CreateNotification) -> Result<Notification> {
        if let Some(receiver) = self.watched.lock().as_mut() {
            assert!(receiver.try_recv().is_err(), "frame pushed before persist");
        }
        self.calls.lock().push("persist");
        self.inner.create_notification(input).await
    }

    async fn mark_read(&self, id: Uuid, user_id: &str) -> Result<bool> {
        self.inner.mark_read(id, user_id).await
    }

    async fn mark_read_by_type(&self, user_id: &str, kind: NotificationType) -> Result<u64> {
        self.inner.mark_read_by_type(user_id, kind).await
    }

    async fn count_unread(&self, user_id: &str) -> Result<u64> {
        self.calls.lock().push("count");
        self.inner.count_unread(user_id).await
    }

    async fn notification_stats(&self, user_id: &str) -> Result<NotificationStats> {
        self.inner.notification_stats(user_id).await
    }
}

#[tokio::test]
async fn test_notification_is_persisted_before_push() {
    let inner = Arc::new(InMemoryStore::new());
    let checking = Arc::new(OrderCheckingStore {
        inner: inner.clone(),
        watched: Mutex::new(None),
        calls: Mutex::new(Vec::new()),
    });
    let pipeline = Pipeline::with_store(inner.clone(), Some(checking.clone()));
    pipeline.user("j1", UserRole::Jobseeker);

    let handle = pipeline.connect("j1").await;
    let id = handle.id;
    *checking.watched.lock() = Some(handle.receiver);

    let input = NotificationInput::new(NotificationType::Welcome, "Hi", "Welcome aboard");
    let stored = pipeline.fanout.notify("j1", input).await.unwrap();

    assert_eq!(*checking.calls.lock(), vec!["persist", "count"]);
    assert_eq!(inner.notifications_for("j1"), vec![stored.clone()]);

    let mut receiver = checking.watched.lock().take().unwrap();
    let first = receiver.try_recv().unwrap();
    match first.as_ref() {
        ServerMessage::NewNotification(payload) => assert_eq!(payload.id, Some(stored.id)),
        other => panic!("expected new_notification, got {:?}", other),
    }
    assert_eq!(count_of(&receiver.try_recv().unwrap()), 1);
    assert!(pipeline.fanout.registry().disconnect(id));
}

// =============================================================================
// Channels
// =============================================================================

#[tokio::test]
async fn test_user_channels_are_isolated() {
    let pipeline = Pipeline::new();
    let users = [
        ("j1", UserRole::Jobseeker),
        ("j2", UserRole::Jobseeker),
        ("e1", UserRole::Employer),
        ("a1", UserRole::Admin),
    ];
    for (id, role) in users {
        pipeline.user(id, role);
    }
    let mut handles = Vec::new();
    for (id, _) in users {
        handles.push((id, pipeline.connect(id).await));
    }

    for (target, _) in users {
        let input = NotificationInput::new(NotificationType::System, "Direct", target);
        pipeline.fanout.notify(target, input).await.unwrap();

        for (owner, handle) in handles.iter_mut() {
            let frames = drain(handle);
            if *owner == target {
                assert_eq!(kinds(&frames), vec!["new_notification", "notification_count"]);
            } else {
                assert!(frames.is_empty(), "{} saw a push for {}", owner, target);
            }
        }
    }
}

#[tokio::test]
async fn test_role_broadcast_reaches_only_connected_members() {
    let pipeline = Pipeline::new();
    for i in 0..50 {
        pipeline.user(&format!("j{:02}", i), UserRole::Jobseeker);
    }
    pipeline.user("e1", UserRole::Employer);

    let mut connected = Vec::new();
    for i in 0..5 {
        connected.push(pipeline.connect(&format!("j{:02}", i * 10)).await);
    }
    let mut employer = pipeline.connect("e1").await;

    let input = NotificationInput::job_alert("Data Engineer", "Remote", "full-time");
    let created = pipeline
        .fanout
        .notify_role(UserRole::Jobseeker, input)
        .await
        .unwrap();

    assert_eq!(created.len(), 50);
    assert_eq!(pipeline.store.notifications().len(), 50);

    for handle in connected.iter_mut() {
        let frames = drain(handle);
        assert_eq!(kinds(&frames), vec!["new_notification", "notification_count"]);
        match frames[0].as_ref() {
            ServerMessage::NewNotification(payload) => {
                assert!(payload.id.is_none());
                assert_eq!(payload.kind, NotificationType::JobAlertMatch);
            }
            other => panic!("expected new_notification, got {:?}", other),
        }
        assert_eq!(count_of(&frames[1]), 1);
    }
    assert!(drain(&mut employer).is_empty());
}

#[tokio::test]
async fn test_company_room_notification() {
    let pipeline = Pipeline::new();
    pipeline.user("e1", UserRole::Employer);
    pipeline.user("e2", UserRole::Employer);
    pipeline.user("e3", UserRole::Employer);
    pipeline.board.add_company_member("c1", "e1");
    pipeline.board.add_company_member("c1", "e2");

    let mut e1 = pipeline.connect("e1").await;
    let mut e3 = pipeline.connect("e3").await;

    let created = pipeline
        .fanout
        .notify_room(
            &Channel::Company("c1".into()),
            NotificationInput::company_verification(true),
        )
        .await
        .unwrap();

    assert_eq!(created.len(), 2);
    assert_eq!(kinds(&drain(&mut e1)), vec!["new_notification", "notification_count"]);
    assert!(drain(&mut e3).is_empty());
}

#[tokio::test]
async fn test_multi_device_disconnect_keeps_sibling() {
    let pipeline = Pipeline::new();
    pipeline.user("j1", UserRole::Jobseeker);

    let phone = pipeline.connect("j1").await;
    let mut laptop = pipeline.connect("j1").await;
    pipeline.fanout.registry().disconnect(phone.id);

    let input = NotificationInput::new(NotificationType::Welcome, "Hi", "Still here");
    pipeline.fanout.notify("j1", input).await.unwrap();

    assert_eq!(kinds(&drain(&mut laptop)), vec!["new_notification", "notification_count"]);
    assert_eq!(pipeline.fanout.registry().user_connection_count("j1"), 1);
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_application_received_scenario() {
    let pipeline = Pipeline::new();
    pipeline.user("e1", UserRole::Employer);
    pipeline.user("j1", UserRole::Jobseeker);
    pipeline
        .board
        .add_job(JobSeed::new("p1", "Backend Engineer", "e1").with_company("Acme"));

    // one older unread notification
    pipeline
        .store
        .create_notification(CreateNotification::new(
            "e1",
            &NotificationInput::new(NotificationType::Welcome, "Hi", "Welcome"),
        ))
        .await
        .unwrap();

    let mut employer = pipeline.connect("e1").await;

    let collector = EventCollector::new(CollectorConfig::default(), pipeline.store.clone(), None);
    collector.track_job_application(
        &Actor::user("j1", UserRole::Jobseeker),
        &JobRef::new("p1", "Backend Engineer", "Acme"),
        "app-1",
        None,
    );
    pipeline
        .fanout
        .notify(
            "e1",
            NotificationInput::application_received("User j1", "Backend Engineer", "app-1"),
        )
        .await
        .unwrap();

    let stored: Vec<_> = pipeline
        .store
        .notifications_for("e1")
        .into_iter()
        .filter(|n| n.kind == NotificationType::ApplicationReceived)
        .collect();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].data.as_ref().unwrap()["jobTitle"], "Backend Engineer");

    let frames = drain(&mut employer);
    assert_eq!(kinds(&frames), vec!["new_notification", "notification_count"]);
    assert_eq!(count_of(&frames[1]), 2);

    assert_eq!(collector.flush().await, 1);
}

#[tokio::test]
async fn test_unread_count_after_read() {
    let pipeline = Pipeline::new();
    pipeline.user("j1", UserRole::Jobseeker);

    let mut ids = Vec::new();
    for i in 0..3 {
        let input = NotificationInput::new(NotificationType::JobMatch, "Match", format!("#{}", i));
        ids.push(pipeline.fanout.notify("j1", input).await.unwrap().id);
    }

    let mut handle = pipeline.connect("j1").await;
    let identity = handle.identity.clone();
    let read = ClientMessage::NotificationRead(NotificationReadPayload {
        notification_id: ids[1],
    });

    pipeline
        .fanout
        .handle_client_message(handle.id, &identity, read.clone())
        .await
        .unwrap();
    let frames = drain(&mut handle);
    assert_eq!(frames.len(), 1);
    assert_eq!(count_of(&frames[0]), 2);

    pipeline
        .fanout
        .handle_client_message(handle.id, &identity, read)
        .await
        .unwrap();
    assert!(drain(&mut handle).is_empty());
    assert_eq!(pipeline.store.count_unread("j1").await.unwrap(), 2);
}

#[tokio::test]
async fn test_mark_read_by_type_and_stats() {
    let pipeline = Pipeline::new();
    pipeline.user("j1", UserRole::Jobseeker);
    for kind in [NotificationType::JobMatch, NotificationType::JobMatch, NotificationType::Welcome] {
        let input = NotificationInput::new(kind, "t", "m");
        pipeline.fanout.notify("j1", input).await.unwrap();
    }

    let mut handle = pipeline.connect("j1").await;
    assert_eq!(
        pipeline
            .fanout
            .mark_read_by_type("j1", NotificationType::JobMatch)
            .await
            .unwrap(),
        2
    );
    assert_eq!(count_of(&drain(&mut handle)[0]), 1);

    let stats = pipeline.fanout.notification_stats("j1").await.unwrap();
    assert_eq!(stats[&NotificationType::JobMatch].read, 2);
    assert_eq!(stats[&NotificationType::Welcome].unread, 1);
}

#[tokio::test]
async fn test_collected_events_are_relayed_as_activity() {
    let store = Arc::new(InMemoryStore::new());
    let board = Arc::new(InMemoryJobBoard::new());
    let verifier = Arc::new(
        StaticVerifier::new()
            .with("tok-a1", Identity::new("a1", UserRole::Admin, "Ad"))
            .with("tok-j1", Identity::new("j1", UserRole::Jobseeker, "Jo")),
    );
    let bus: Arc<dyn EventBus> = Arc::new(InMemoryBus::default());
    let registry = Arc::new(ConnectionRegistry::new(verifier, board.clone(), 64));
    let analytics = Arc::new(AnalyticsProcessor::new(
        AnalyticsConfig::default(),
        store.clone(),
        store.clone(),
        board.clone(),
        None,
    ));
    let fanout = Arc::new(FanOutService::new(
        FanOutConfig::default().with_broadcast_interval(Duration::from_secs(3600)),
        registry.clone(),
        analytics,
        store.clone(),
        board,
        Some(bus.clone()),
    ));
    fanout.start();
    // let the relay subscribe
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut admin = registry.connect("tok-a1").await.unwrap();
    let collector = EventCollector::new(CollectorConfig::default(), store, Some(bus));
    collector.track_job_view(
        &Actor::user("j1", UserRole::Jobseeker),
        &JobRef::new("p1", "SRE", "Acme"),
        None,
    );

    let update = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let frame = admin.receiver.recv().await.unwrap();
            if let ServerMessage::DashboardUpdate(update) = frame.as_ref() {
                return update.clone();
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(update.user_id.as_deref(), Some("j1"));
    assert_eq!(update.data["description"], "Viewed job: SRE");

    fanout.stop().await;
}
