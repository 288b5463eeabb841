// Event collector
// Decision: collect() is synchronous and returns nothing; producers never await storage
// Decision: One background task owns flushing (interval tick, batch-size signal, shutdown)
// Decision: A failed batch is re-queued once; events that already failed once are dropped
//
// Queue discipline: producers push to the back of a bounded VecDeque. When the
// queue is full the oldest event is dropped with a warning instead of applying
// backpressure to the request path.

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::CollectorConfig;
use crate::event::{event_types, merge_metadata, Event, NewEvent};
use crate::identity::{Identity, UserRole};
use crate::traits::{EventBus, EventStore};

/// Bus topic names
pub mod topics {
    use crate::event::{event_types, Event};

    pub fn event_type(event_type: &str) -> String {
        format!("analytics:{}", event_type)
    }

    pub fn user(user_id: &str) -> String {
        format!("analytics:user:{}", user_id)
    }

    pub fn role(role: &str) -> String {
        format!("analytics:role:{}", role)
    }

    /// Topics an event is republished on
    pub fn for_event(event: &Event) -> Vec<String> {
        let mut topics = vec![event_type(&event.event_type)];
        if let Some(user_id) = &event.user_id {
            topics.push(user(user_id));
        }
        if let Some(role) = event.user_role {
            topics.push(self::role(role.as_str()));
        }
        topics
    }

    /// Per-type topics relayed to connected dashboards
    pub fn relayed() -> Vec<String> {
        [
            event_types::JOB_VIEW,
            event_types::JOB_APPLICATION,
            event_types::JOB_SEARCH,
            event_types::PROFILE_UPDATE,
            event_types::DASHBOARD_VIEW,
        ]
        .iter()
        .map(|t| event_type(t))
        .collect()
    }
}

// ============================================================================
// Producer-side helper types
// ============================================================================

/// Who caused an event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Option<String>,
    pub role: Option<UserRole>,
}

impl Actor {
    pub fn user(user_id: impl Into<String>, role: UserRole) -> Self {
        Self {
            user_id: Some(user_id.into()),
            role: Some(role),
        }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    fn apply(&self, mut event: NewEvent) -> NewEvent {
        event.user_id = self.user_id.clone();
        event.user_role = self.role;
        event
    }
}

impl From<&Identity> for Actor {
    fn from(identity: &Identity) -> Self {
        Actor::user(identity.user_id.clone(), identity.role)
    }
}

/// A job posting referenced by an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    pub id: String,
    pub title: String,
    pub company: String,
}

impl JobRef {
    pub fn new(id: impl Into<String>, title: impl Into<String>, company: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            company: company.into(),
        }
    }
}

/// A search as performed by a user
#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub query: String,
    pub location: String,
    pub filters: Value,
    pub result_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookmarkAction {
    Bookmark,
    Unbookmark,
}

impl BookmarkAction {
    fn as_str(&self) -> &'static str {
        match self {
            BookmarkAction::Bookmark => "bookmark",
            BookmarkAction::Unbookmark => "unbookmark",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostingAction {
    Create,
    Update,
    Delete,
}

impl PostingAction {
    fn as_str(&self) -> &'static str {
        match self {
            PostingAction::Create => "create",
            PostingAction::Update => "update",
            PostingAction::Delete => "delete",
        }
    }
}

// ============================================================================
// Stats
// ============================================================================

#[derive(Default)]
struct Counters {
    collected: AtomicU64,
    sampled_out: AtomicU64,
    overflow_dropped: AtomicU64,
    retry_dropped: AtomicU64,
    persisted: AtomicU64,
    failed_flushes: AtomicU64,
}

/// Point-in-time collector counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStats {
    pub collected: u64,
    pub sampled_out: u64,
    pub overflow_dropped: u64,
    pub retry_dropped: u64,
    pub persisted: u64,
    pub failed_flushes: u64,
    pub queued: usize,
}

// ============================================================================
// EventCollector
// ============================================================================

/// Buffers events and persists them in batches
pub struct EventCollector {
    config: CollectorConfig,
    store: Arc<dyn EventStore>,
    bus: Option<Arc<dyn EventBus>>,
    /// Queued events with the number of failed flush attempts they have seen
    queue: Mutex<VecDeque<(Event, u8)>>,
    flush_lock: tokio::sync::Mutex<()>,
    flush_signal: Notify,
    counters: Counters,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventCollector {
    pub fn new(
        config: CollectorConfig,
        store: Arc<dyn EventStore>,
        bus: Option<Arc<dyn EventBus>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            store,
            bus,
            queue: Mutex::new(VecDeque::new()),
            flush_lock: tokio::sync::Mutex::new(()),
            flush_signal: Notify::new(),
            counters: Counters::default(),
            shutdown_tx,
            shutdown_rx,
            flush_handle: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CollectorConfig {
        &self.config
    }

    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn stats(&self) -> CollectorStats {
        let c = &self.counters;
        CollectorStats {
            collected: c.collected.load(Ordering::Relaxed),
            sampled_out: c.sampled_out.load(Ordering::Relaxed),
            overflow_dropped: c.overflow_dropped.load(Ordering::Relaxed),
            retry_dropped: c.retry_dropped.load(Ordering::Relaxed),
            persisted: c.persisted.load(Ordering::Relaxed),
            failed_flushes: c.failed_flushes.load(Ordering::Relaxed),
            queued: self.queue_len(),
        }
    }

    /// Record an event. Never fails from the caller's point of view.
    pub fn collect(&self, event: NewEvent) {
        if self.config.sampling_rate < 1.0 {
            let draw: f64 = rand::thread_rng().gen();
            if draw >= self.config.sampling_rate {
                self.counters.sampled_out.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }

        let event = event.into_event();
        self.counters.collected.fetch_add(1, Ordering::Relaxed);

        if let Some(bus) = &self.bus {
            self.publish(bus.as_ref(), &event);
        }

        let queued = {
            let mut queue = self.queue.lock();
            queue.push_back((event, 0));
            if queue.len() > self.config.queue_capacity {
                if let Some((dropped, _)) = queue.pop_front() {
                    self.counters.overflow_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        event_id = %dropped.event_id,
                        event_type = %dropped.event_type,
                        capacity = self.config.queue_capacity,
                        "Event queue full, dropping oldest event"
                    );
                }
            }
            queue.len()
        };

        if queued >= self.config.batch_size {
            self.flush_signal.notify_one();
        }
    }

    fn publish(&self, bus: &dyn EventBus, event: &Event) {
        let payload = match serde_json::to_value(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!(event_id = %event.event_id, "Failed to serialize event for bus: {}", e);
                return;
            }
        };
        for topic in topics::for_event(event) {
            if let Err(e) = bus.publish(&topic, &payload) {
                warn!(topic = %topic, "Failed to publish event: {}", e);
            }
        }
    }

    /// Persist everything currently queued. Returns the number of rows inserted.
    pub async fn flush(&self) -> usize {
        let _guard = self.flush_lock.lock().await;

        let batch: Vec<(Event, u8)> = self.queue.lock().drain(..).collect();
        if batch.is_empty() {
            return 0;
        }

        let (events, attempts): (Vec<Event>, Vec<u8>) = batch.into_iter().unzip();
        match self.store.insert_events(&events).await {
            Ok(inserted) => {
                self.counters
                    .persisted
                    .fetch_add(inserted as u64, Ordering::Relaxed);
                debug!(batch = events.len(), inserted, "Flushed event batch");
                inserted
            }
            Err(e) => {
                self.counters.failed_flushes.fetch_add(1, Ordering::Relaxed);
                error!(batch = events.len(), "Failed to flush event batch: {}", e);
                self.requeue(events, attempts);
                0
            }
        }
    }

    fn requeue(&self, events: Vec<Event>, attempts: Vec<u8>) {
        let mut queue = self.queue.lock();
        let room = self.config.requeue_limit().saturating_sub(queue.len());

        let mut retry: Vec<(Event, u8)> = Vec::new();
        let mut dropped = 0u64;
        for (event, attempt) in events.into_iter().zip(attempts) {
            if attempt == 0 && retry.len() < room {
                retry.push((event, 1));
            } else {
                dropped += 1;
            }
        }

        if dropped > 0 {
            self.counters.retry_dropped.fetch_add(dropped, Ordering::Relaxed);
            warn!(dropped, "Dropping events after failed flush");
        }
        let requeued = retry.len();
        // retried events go back in front, in their original order
        for item in retry.into_iter().rev() {
            queue.push_front(item);
        }
        if requeued > 0 {
            info!(requeued, "Re-queued events for retry");
        }
    }

    /// Start the background flush task
    pub fn start(self: &Arc<Self>) {
        let mut handle_slot = self.flush_handle.lock();
        if handle_slot.is_some() {
            return;
        }

        let collector = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let interval = self.config.flush_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        collector.flush().await;
                    }
                    _ = collector.flush_signal.notified() => {
                        collector.flush().await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Flush loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Flush loop exited");
        });

        *handle_slot = Some(handle);
        info!(
            batch_size = self.config.batch_size,
            flush_interval_ms = self.config.flush_interval.as_millis() as u64,
            sampling_rate = self.config.sampling_rate,
            "Event collector started"
        );
    }

    /// Stop the flush task and run one final flush
    pub async fn stop(&self) -> usize {
        let _ = self.shutdown_tx.send(true);
        let handle = self.flush_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Flush loop panicked: {}", e);
            }
        }
        let flushed = self.flush().await;
        info!(flushed, "Event collector stopped");
        flushed
    }

    // ========================================================================
    // Typed wrappers
    // ========================================================================

    pub fn track_job_view(&self, actor: &Actor, job: &JobRef, extra: Option<Value>) {
        self.collect(
            actor
                .apply(NewEvent::new(event_types::JOB_VIEW))
                .with_entity("job", job.id.clone())
                .with_metadata(merge_metadata(
                    json!({ "jobTitle": job.title, "company": job.company }),
                    extra,
                )),
        );
    }

    pub fn track_job_search(&self, actor: &Actor, search: &SearchQuery, extra: Option<Value>) {
        self.collect(
            actor
                .apply(NewEvent::new(event_types::JOB_SEARCH))
                .with_entity("search", Uuid::now_v7().to_string())
                .with_metadata(merge_metadata(
                    json!({
                        "query": search.query,
                        "location": search.location,
                        "filters": search.filters,
                        "resultCount": search.result_count,
                    }),
                    extra,
                )),
        );
    }

    pub fn track_job_application(
        &self,
        actor: &Actor,
        job: &JobRef,
        application_id: &str,
        extra: Option<Value>,
    ) {
        self.collect(
            actor
                .apply(NewEvent::new(event_types::JOB_APPLICATION))
                .with_entity("application", application_id)
                .with_metadata(merge_metadata(
                    json!({ "jobId": job.id, "jobTitle": job.title, "company": job.company }),
                    extra,
                )),
        );
    }

    pub fn track_job_bookmark(
        &self,
        actor: &Actor,
        job: &JobRef,
        action: BookmarkAction,
        extra: Option<Value>,
    ) {
        self.collect(
            actor
                .apply(NewEvent::new(format!("job_{}", action.as_str())))
                .with_entity("job", job.id.clone())
                .with_metadata(merge_metadata(
                    json!({ "jobTitle": job.title, "company": job.company, "action": action.as_str() }),
                    extra,
                )),
        );
    }

    pub fn track_profile_update(&self, actor: &Actor, update_type: &str, extra: Option<Value>) {
        let mut event = actor.apply(NewEvent::new(event_types::PROFILE_UPDATE));
        if let Some(user_id) = &actor.user_id {
            event = event.with_entity("user", user_id.clone());
        }
        self.collect(event.with_metadata(merge_metadata(json!({ "updateType": update_type }), extra)));
    }

    pub fn track_job_posting(
        &self,
        actor: &Actor,
        job: &JobRef,
        action: PostingAction,
        extra: Option<Value>,
    ) {
        self.collect(
            actor
                .apply(NewEvent::new(format!("job_{}", action.as_str())))
                .with_entity("job", job.id.clone())
                .with_metadata(merge_metadata(
                    json!({ "jobTitle": job.title, "company": job.company, "action": action.as_str() }),
                    extra,
                )),
        );
    }

    pub fn track_dashboard_view(&self, actor: &Actor, dashboard: UserRole, extra: Option<Value>) {
        self.collect(
            actor
                .apply(NewEvent::new(event_types::DASHBOARD_VIEW))
                .with_entity("dashboard", dashboard.as_str())
                .with_metadata(merge_metadata(
                    json!({ "dashboardType": dashboard.as_str() }),
                    extra,
                )),
        );
    }

    /// System events carry no user
    pub fn track_system_health(&self, event_type: &str, metrics: Value, extra: Option<Value>) {
        self.collect(
            NewEvent::new(event_type)
                .with_entity("system", "health")
                .with_metadata(merge_metadata(metrics, extra)),
        );
    }
}
