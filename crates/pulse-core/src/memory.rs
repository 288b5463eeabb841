// In-memory implementations for dev mode and testing
// Decision: Use parking_lot for thread-safe access; no lock is held across an await
//
// These keep all data in memory, which makes them useful for:
// - Running the server without a database (DATABASE_URL unset)
// - Unit and integration tests
//
// Failure injection hooks (`fail_next_*`) let tests exercise retry paths.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::aggregation::{Aggregation, AggregationType};
use crate::dashboard::{
    ApplicationRecord, BookmarkRecord, EventTypeCount, PlatformCounts, PostingRecord,
    ProfileSnapshot, ReceivedApplicationRecord, SectorCount,
};
use crate::error::{PulseError, Result};
use crate::event::Event;
use crate::identity::{Identity, UserRole};
use crate::notification::{
    CreateNotification, Notification, NotificationStats, NotificationType,
};
use crate::traits::{
    AggregationStore, AuthVerifier, BusMessage, BusStream, Cache, EventBus, EventStore,
    FeedFilter, JobBoardReader, NotificationStore, RecipientDirectory,
};

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

// ============================================================================
// InMemoryStore - events, aggregations, notifications
// ============================================================================

/// In-memory durable store
#[derive(Default)]
pub struct InMemoryStore {
    events: RwLock<Vec<Event>>,
    event_ids: RwLock<HashSet<Uuid>>,
    aggregations: RwLock<HashMap<(AggregationType, String), Aggregation>>,
    notifications: RwLock<Vec<Notification>>,
    failing_inserts: AtomicUsize,
    failing_notification_writes: AtomicUsize,
    insert_calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` event batch inserts fail
    pub fn fail_next_inserts(&self, n: usize) {
        self.failing_inserts.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` notification creates fail
    pub fn fail_next_notification_writes(&self, n: usize) {
        self.failing_notification_writes.store(n, Ordering::SeqCst);
    }

    /// Number of `insert_events` calls, including failed ones
    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    pub fn event_count(&self) -> usize {
        self.events.read().len()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.notifications.read().clone()
    }

    pub fn notifications_for(&self, user_id: &str) -> Vec<Notification> {
        self.notifications
            .read()
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect()
    }

    fn newest_first(mut events: Vec<Event>) -> Vec<Event> {
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events
    }
}

#[async_trait]
impl EventStore for InMemoryStore {
    async fn insert_events(&self, events: &[Event]) -> Result<usize> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.failing_inserts) {
            return Err(PulseError::store("injected insert failure"));
        }

        let mut ids = self.event_ids.write();
        let mut stored = self.events.write();
        let mut inserted = 0;
        for event in events {
            if ids.insert(event.event_id) {
                stored.push(event.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn events_between(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Event>> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.created_at >= start && e.created_at < end)
            .cloned()
            .collect())
    }

    async fn recent_events(&self, limit: usize) -> Result<Vec<Event>> {
        let events = self.events.read().clone();
        Ok(Self::newest_first(events).into_iter().take(limit).collect())
    }

    async fn count_distinct_users_since(&self, since: DateTime<Utc>) -> Result<u64> {
        let events = self.events.read();
        let users: HashSet<&str> = events
            .iter()
            .filter(|e| e.created_at >= since)
            .filter_map(|e| e.user_id.as_deref())
            .collect();
        Ok(users.len() as u64)
    }

    async fn count_by_type_since(&self, event_type: &str, since: DateTime<Utc>) -> Result<u64> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.created_at >= since && e.event_type == event_type)
            .count() as u64)
    }

    async fn top_event_types_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<EventTypeCount>> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for event in self.events.read().iter().filter(|e| e.created_at >= since) {
            *counts.entry(event.event_type.clone()).or_insert(0) += 1;
        }
        let mut ranked: Vec<_> = counts
            .into_iter()
            .map(|(event_type, count)| EventTypeCount { event_type, count })
            .collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count));
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn activity_feed(
        &self,
        filter: &FeedFilter,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let matching: Vec<Event> = self
            .events
            .read()
            .iter()
            .filter(|e| e.created_at >= since && filter.matches(e))
            .cloned()
            .collect();
        Ok(Self::newest_first(matching).into_iter().take(limit).collect())
    }
}

#[async_trait]
impl AggregationStore for InMemoryStore {
    async fn upsert_aggregation(&self, aggregation: &Aggregation) -> Result<()> {
        self.aggregations.write().insert(
            (aggregation.aggregation_type, aggregation.time_period.clone()),
            aggregation.clone(),
        );
        Ok(())
    }

    async fn get_aggregation(
        &self,
        aggregation_type: AggregationType,
        time_period: &str,
    ) -> Result<Option<Aggregation>> {
        Ok(self
            .aggregations
            .read()
            .get(&(aggregation_type, time_period.to_string()))
            .cloned())
    }
}

#[async_trait]
impl NotificationStore for InMemoryStore {
    async fn create_notification(&self, input: CreateNotification) -> Result<Notification> {
        if take_failure(&self.failing_notification_writes) {
            return Err(PulseError::store("injected notification write failure"));
        }
        let now = Utc::now();
        let notification = Notification {
            id: Uuid::now_v7(),
            user_id: input.user_id,
            kind: input.kind,
            title: input.title,
            message: input.message,
            data: input.data,
            is_read: false,
            created_at: now,
            updated_at: now,
        };
        self.notifications.write().push(notification.clone());
        Ok(notification)
    }

    async fn mark_read(&self, id: Uuid, user_id: &str) -> Result<bool> {
        let mut notifications = self.notifications.write();
        match notifications
            .iter_mut()
            .find(|n| n.id == id && n.user_id == user_id && !n.is_read)
        {
            Some(n) => {
                n.is_read = true;
                n.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_read_by_type(&self, user_id: &str, kind: NotificationType) -> Result<u64> {
        let now = Utc::now();
        let mut changed = 0;
        for n in self
            .notifications
            .write()
            .iter_mut()
            .filter(|n| n.user_id == user_id && n.kind == kind && !n.is_read)
        {
            n.is_read = true;
            n.updated_at = now;
            changed += 1;
        }
        Ok(changed)
    }

    async fn count_unread(&self, user_id: &str) -> Result<u64> {
        Ok(self
            .notifications
            .read()
            .iter()
            .filter(|n| n.user_id == user_id && !n.is_read)
            .count() as u64)
    }

    async fn notification_stats(&self, user_id: &str) -> Result<NotificationStats> {
        let mut stats = NotificationStats::new();
        for n in self.notifications.read().iter().filter(|n| n.user_id == user_id) {
            let entry = stats.entry(n.kind).or_default();
            if n.is_read {
                entry.read += 1;
            } else {
                entry.unread += 1;
            }
        }
        Ok(stats)
    }
}

// ============================================================================
// InMemoryJobBoard - seedable job board for dev mode and tests
// ============================================================================

#[derive(Debug, Clone)]
struct UserEntry {
    role: UserRole,
    is_active: bool,
    profile: ProfileSnapshot,
}

/// A job posting to seed
#[derive(Debug, Clone)]
pub struct JobSeed {
    pub id: String,
    pub title: String,
    pub company: Option<String>,
    pub sector: Option<String>,
    pub created_by: String,
    pub is_active: bool,
    pub views: u64,
}

impl JobSeed {
    pub fn new(id: impl Into<String>, title: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            company: None,
            sector: None,
            created_by: created_by.into(),
            is_active: true,
            views: 0,
        }
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }

    pub fn with_sector(mut self, sector: impl Into<String>) -> Self {
        self.sector = Some(sector.into());
        self
    }

    pub fn with_views(mut self, views: u64) -> Self {
        self.views = views;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }
}

#[derive(Debug, Clone)]
struct ApplicationEntry {
    id: String,
    user_id: String,
    job_id: String,
    status: String,
    applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct BookmarkEntry {
    id: String,
    user_id: String,
    job_id: String,
    created_at: DateTime<Utc>,
}

/// In-memory job board
#[derive(Default)]
pub struct InMemoryJobBoard {
    users: RwLock<HashMap<String, UserEntry>>,
    jobs: RwLock<HashMap<String, JobSeed>>,
    applications: RwLock<Vec<ApplicationEntry>>,
    bookmarks: RwLock<Vec<BookmarkEntry>>,
    searches: RwLock<HashMap<String, u64>>,
    company_members: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryJobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_user(&self, user_id: impl Into<String>, role: UserRole) {
        self.add_user_with_profile(user_id, role, ProfileSnapshot::default());
    }

    pub fn add_user_with_profile(&self, user_id: impl Into<String>, role: UserRole, profile: ProfileSnapshot) {
        self.users.write().insert(
            user_id.into(),
            UserEntry {
                role,
                is_active: true,
                profile,
            },
        );
    }

    pub fn deactivate_user(&self, user_id: &str) {
        if let Some(user) = self.users.write().get_mut(user_id) {
            user.is_active = false;
        }
    }

    pub fn add_job(&self, job: JobSeed) {
        self.jobs.write().insert(job.id.clone(), job);
    }

    pub fn add_application(
        &self,
        id: impl Into<String>,
        user_id: impl Into<String>,
        job_id: impl Into<String>,
        status: impl Into<String>,
        applied_at: DateTime<Utc>,
    ) {
        self.applications.write().push(ApplicationEntry {
            id: id.into(),
            user_id: user_id.into(),
            job_id: job_id.into(),
            status: status.into(),
            applied_at,
        });
    }

    pub fn add_bookmark(
        &self,
        id: impl Into<String>,
        user_id: impl Into<String>,
        job_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) {
        self.bookmarks.write().push(BookmarkEntry {
            id: id.into(),
            user_id: user_id.into(),
            job_id: job_id.into(),
            created_at,
        });
    }

    pub fn add_search(&self, user_id: &str) {
        *self.searches.write().entry(user_id.to_string()).or_insert(0) += 1;
    }

    pub fn add_company_member(&self, company_id: impl Into<String>, user_id: impl Into<String>) {
        self.company_members
            .write()
            .entry(company_id.into())
            .or_default()
            .push(user_id.into());
    }

    fn job(&self, job_id: &str) -> Option<JobSeed> {
        self.jobs.read().get(job_id).cloned()
    }

    fn applications_for_job(&self, job_id: &str) -> u64 {
        self.applications
            .read()
            .iter()
            .filter(|a| a.job_id == job_id)
            .count() as u64
    }

    fn employer_job_ids(&self, user_id: &str) -> HashSet<String> {
        self.jobs
            .read()
            .values()
            .filter(|j| j.created_by == user_id)
            .map(|j| j.id.clone())
            .collect()
    }
}

#[async_trait]
impl JobBoardReader for InMemoryJobBoard {
    async fn profile(&self, user_id: &str) -> Result<Option<ProfileSnapshot>> {
        Ok(self.users.read().get(user_id).map(|u| u.profile.clone()))
    }

    async fn count_applications(&self, user_id: &str) -> Result<u64> {
        Ok(self
            .applications
            .read()
            .iter()
            .filter(|a| a.user_id == user_id)
            .count() as u64)
    }

    async fn count_bookmarks(&self, user_id: &str) -> Result<u64> {
        Ok(self
            .bookmarks
            .read()
            .iter()
            .filter(|b| b.user_id == user_id)
            .count() as u64)
    }

    async fn count_searches(&self, user_id: &str) -> Result<u64> {
        Ok(self.searches.read().get(user_id).copied().unwrap_or(0))
    }

    async fn recent_applications(&self, user_id: &str, limit: usize) -> Result<Vec<ApplicationRecord>> {
        let mut apps: Vec<ApplicationEntry> = self
            .applications
            .read()
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        apps.sort_by(|a, b| b.applied_at.cmp(&a.applied_at));
        Ok(apps
            .into_iter()
            .take(limit)
            .map(|a| {
                let job = self.job(&a.job_id);
                ApplicationRecord {
                    id: a.id,
                    job_title: job.as_ref().map(|j| j.title.clone()).unwrap_or_default(),
                    company: job.and_then(|j| j.company),
                    status: a.status,
                    applied_at: a.applied_at,
                }
            })
            .collect())
    }

    async fn recent_bookmarks(&self, user_id: &str, limit: usize) -> Result<Vec<BookmarkRecord>> {
        let mut bookmarks: Vec<BookmarkEntry> = self
            .bookmarks
            .read()
            .iter()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        bookmarks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookmarks
            .into_iter()
            .take(limit)
            .map(|b| {
                let job = self.job(&b.job_id);
                BookmarkRecord {
                    id: b.id,
                    job_title: job.as_ref().map(|j| j.title.clone()).unwrap_or_default(),
                    company: job.and_then(|j| j.company),
                    created_at: b.created_at,
                }
            })
            .collect())
    }

    async fn employer_postings(&self, user_id: &str) -> Result<Vec<PostingRecord>> {
        let jobs: Vec<JobSeed> = self
            .jobs
            .read()
            .values()
            .filter(|j| j.created_by == user_id)
            .cloned()
            .collect();
        Ok(jobs
            .into_iter()
            .map(|j| PostingRecord {
                applications_count: self.applications_for_job(&j.id),
                id: j.id,
                title: j.title,
                is_active: j.is_active,
                views: j.views,
            })
            .collect())
    }

    async fn employer_applications(&self, user_id: &str) -> Result<Vec<(String, DateTime<Utc>)>> {
        let job_ids = self.employer_job_ids(user_id);
        Ok(self
            .applications
            .read()
            .iter()
            .filter(|a| job_ids.contains(&a.job_id))
            .map(|a| (a.status.clone(), a.applied_at))
            .collect())
    }

    async fn employer_recent_applications(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ReceivedApplicationRecord>> {
        let job_ids = self.employer_job_ids(user_id);
        let mut apps: Vec<ApplicationEntry> = self
            .applications
            .read()
            .iter()
            .filter(|a| job_ids.contains(&a.job_id))
            .cloned()
            .collect();
        apps.sort_by(|a, b| b.applied_at.cmp(&a.applied_at));

        let users = self.users.read().clone();
        Ok(apps
            .into_iter()
            .take(limit)
            .map(|a| {
                let profile = users.get(&a.user_id).map(|u| &u.profile);
                ReceivedApplicationRecord {
                    job_title: self.job(&a.job_id).map(|j| j.title),
                    first_name: profile.and_then(|p| p.first_name.clone()),
                    last_name: profile.and_then(|p| p.last_name.clone()),
                    id: a.id,
                    status: a.status,
                    applied_at: a.applied_at,
                }
            })
            .collect())
    }

    async fn platform_counts(&self) -> Result<PlatformCounts> {
        let users = self.users.read();
        let jobs = self.jobs.read();
        Ok(PlatformCounts {
            total_users: users.len() as u64,
            active_users: users.values().filter(|u| u.is_active).count() as u64,
            total_jobs: jobs.len() as u64,
            active_jobs: jobs.values().filter(|j| j.is_active).count() as u64,
            total_applications: self.applications.read().len() as u64,
        })
    }

    async fn top_sectors(&self, limit: usize) -> Result<Vec<SectorCount>> {
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for job in self.jobs.read().values() {
            let sector = job.sector.clone().unwrap_or_else(|| "Unknown".to_string());
            *counts.entry(sector).or_insert(0) += 1;
        }
        let mut ranked: Vec<SectorCount> = counts
            .into_iter()
            .map(|(sector, count)| SectorCount { sector, count })
            .collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count));
        ranked.truncate(limit);
        Ok(ranked)
    }
}

#[async_trait]
impl RecipientDirectory for InMemoryJobBoard {
    async fn users_with_role(&self, role: UserRole) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .users
            .read()
            .iter()
            .filter(|(_, u)| u.role == role && u.is_active)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn company_members(&self, company_id: &str) -> Result<Vec<String>> {
        let members = self
            .company_members
            .read()
            .get(company_id)
            .cloned()
            .unwrap_or_default();
        let users = self.users.read();
        Ok(members
            .into_iter()
            .filter(|m| users.get(m).is_some_and(|u| u.role == UserRole::Employer))
            .collect())
    }

    async fn companies_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let mut companies: Vec<String> = self
            .company_members
            .read()
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m == user_id))
            .map(|(company, _)| company.clone())
            .collect();
        companies.sort();
        Ok(companies)
    }
}

// ============================================================================
// InMemoryCache - TTL + tag invalidation
// ============================================================================

struct CacheEntry {
    value: Value,
    expires_at: Instant,
    tags: Vec<String>,
}

/// In-process cache. Expiry uses tokio's clock so paused-time tests can advance it.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    tags: Mutex<HashMap<String, HashSet<String>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn untag(&self, key: &str, tags: &[String]) {
        let mut index = self.tags.lock();
        for tag in tags {
            if let Some(keys) = index.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    index.remove(tag);
                }
            }
        }
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let expired = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()))
                }
                Some(_) => {}
            }
            entries.remove(key)
        };
        if let Some(entry) = expired {
            self.untag(key, &entry.tags);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration, tags: &[String]) -> Result<()> {
        let previous = self.entries.lock().insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
                tags: tags.to_vec(),
            },
        );
        if let Some(previous) = previous {
            self.untag(key, &previous.tags);
        }
        let mut index = self.tags.lock();
        for tag in tags {
            index.entry(tag.clone()).or_default().insert(key.to_string());
        }
        Ok(())
    }

    async fn invalidate_tag(&self, tag: &str) -> Result<u64> {
        let keys = self.tags.lock().remove(tag).unwrap_or_default();
        let mut removed = Vec::new();
        {
            let mut entries = self.entries.lock();
            for key in &keys {
                if let Some(entry) = entries.remove(key) {
                    removed.push((key.clone(), entry.tags));
                }
            }
        }
        for (key, tags) in &removed {
            self.untag(key, tags);
        }
        Ok(removed.len() as u64)
    }
}

// ============================================================================
// InMemoryBus - single-process pub/sub
// ============================================================================

/// Pub/sub over a tokio broadcast channel
pub struct InMemoryBus {
    sender: broadcast::Sender<BusMessage>,
}

impl InMemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventBus for InMemoryBus {
    fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        // No subscribers is not an error
        let _ = self.sender.send(BusMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn subscribe(&self, topics: &[String]) -> Result<BusStream> {
        let topics: HashSet<String> = topics.iter().cloned().collect();
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(move |msg| {
            let keep = match msg {
                Ok(msg) if topics.contains(&msg.topic) => Some(msg),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "Bus subscriber lagged");
                    None
                }
            };
            futures::future::ready(keep)
        });
        Ok(Box::pin(stream))
    }
}

// ============================================================================
// StaticVerifier - fixed credential table
// ============================================================================

/// Resolves credentials from a fixed table
#[derive(Default)]
pub struct StaticVerifier {
    tokens: RwLock<HashMap<String, Identity>>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, credential: impl Into<String>, identity: Identity) {
        self.tokens.write().insert(credential.into(), identity);
    }

    pub fn with(self, credential: impl Into<String>, identity: Identity) -> Self {
        self.insert(credential, identity);
        self
    }
}

#[async_trait]
impl AuthVerifier for StaticVerifier {
    async fn verify(&self, credential: &str) -> Result<Option<Identity>> {
        Ok(self.tokens.read().get(credential).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::NewEvent;
    use crate::notification::NotificationInput;

    #[tokio::test]
    async fn test_insert_skips_duplicates() {
        let store = InMemoryStore::new();
        let event = NewEvent::new("job_view").into_event();
        assert_eq!(store.insert_events(&[event.clone()]).await.unwrap(), 1);
        assert_eq!(store.insert_events(&[event.clone(), event]).await.unwrap(), 0);
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed() {
        let store = InMemoryStore::new();
        store.fail_next_inserts(1);
        let batch = [NewEvent::new("job_view").into_event()];
        assert!(store.insert_events(&batch).await.is_err());
        assert_eq!(store.insert_events(&batch).await.unwrap(), 1);
        assert_eq!(store.insert_calls(), 2);
    }

    #[tokio::test]
    async fn test_mark_read_checks_owner() {
        let store = InMemoryStore::new();
        let input = NotificationInput::new(NotificationType::System, "t", "m");
        let n = store
            .create_notification(CreateNotification::new("u1", &input))
            .await
            .unwrap();

        assert!(!store.mark_read(n.id, "u2").await.unwrap());
        assert_eq!(store.count_unread("u1").await.unwrap(), 1);
        assert!(store.mark_read(n.id, "u1").await.unwrap());
        assert!(!store.mark_read(n.id, "u1").await.unwrap());
        assert_eq!(store.count_unread("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_notification_stats() {
        let store = InMemoryStore::new();
        let welcome = NotificationInput::new(NotificationType::Welcome, "t", "m");
        let alert = NotificationInput::new(NotificationType::JobAlertMatch, "t", "m");
        for input in [&welcome, &alert, &alert] {
            store
                .create_notification(CreateNotification::new("u1", input))
                .await
                .unwrap();
        }
        assert_eq!(
            store.mark_read_by_type("u1", NotificationType::JobAlertMatch).await.unwrap(),
            2
        );
        let stats = store.notification_stats("u1").await.unwrap();
        assert_eq!(stats[&NotificationType::JobAlertMatch].read, 2);
        assert_eq!(stats[&NotificationType::Welcome].unread, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_and_tags() {
        let cache = InMemoryCache::new();
        let tags = vec!["user:u1".to_string(), "dashboard".to_string()];
        cache
            .set("dashboard:u1:jobseeker", serde_json::json!(1), Duration::from_secs(30), &tags)
            .await
            .unwrap();
        assert!(cache.get("dashboard:u1:jobseeker").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get("dashboard:u1:jobseeker").await.unwrap().is_none());

        cache
            .set("a", serde_json::json!(1), Duration::from_secs(30), &tags)
            .await
            .unwrap();
        cache
            .set("b", serde_json::json!(2), Duration::from_secs(30), &tags[1..])
            .await
            .unwrap();
        assert_eq!(cache.invalidate_tag("dashboard").await.unwrap(), 2);
        assert!(cache.is_empty());
        assert_eq!(cache.invalidate_tag("user:u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bus_filters_topics() {
        let bus = InMemoryBus::default();
        let mut stream = bus
            .subscribe(&["analytics:job_view".to_string()])
            .await
            .unwrap();
        bus.publish("analytics:job_search", &serde_json::json!({"n": 1})).unwrap();
        bus.publish("analytics:job_view", &serde_json::json!({"n": 2})).unwrap();

        let msg = stream.next().await.unwrap();
        assert_eq!(msg.topic, "analytics:job_view");
        assert_eq!(msg.payload["n"], 2);
    }

    #[tokio::test]
    async fn test_directory_lookups() {
        let board = InMemoryJobBoard::new();
        board.add_user("j1", UserRole::Jobseeker);
        board.add_user("e1", UserRole::Employer);
        board.add_company_member("c1", "e1");
        board.add_company_member("c1", "j1");
        board.add_company_member("c1", "ghost");

        assert_eq!(board.users_with_role(UserRole::Jobseeker).await.unwrap(), vec!["j1"]);
        assert_eq!(board.companies_for_user("e1").await.unwrap(), vec!["c1"]);
        assert_eq!(board.company_members("c1").await.unwrap(), vec!["e1"]);
        assert!(board.company_members("c2").await.unwrap().is_empty());
    }
}
