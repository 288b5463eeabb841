// Analytics processor
// Decision: Dashboard snapshots are cache-first; cache errors degrade to a miss
// Decision: Independent sub-queries of one snapshot run concurrently via try_join!
// Decision: Aggregations are recomputed from scratch per window and upserted

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::aggregation::{Aggregation, AggregationMetrics, AggregationType, AggregationWindow};
use crate::config::AnalyticsConfig;
use crate::dashboard::{
    AdminMetrics, DashboardMetrics, EmployerMetrics, EventStats, FeedItem, JobseekerCounts,
    JobseekerMetrics, RealTimeMetrics, StatsRange, RECENT_LIMIT, RECENT_SYSTEM_EVENTS_LIMIT,
    TOP_SECTORS_LIMIT,
};
use crate::error::Result;
use crate::event::event_types;
use crate::identity::UserRole;
use crate::traits::{AggregationStore, Cache, EventStore, FeedFilter, JobBoardReader};

const ACTIVE_USER_WINDOW_MINUTES: i64 = 15;
const TOP_EVENT_TYPES_LIMIT: usize = 10;
const FEED_WINDOW_HOURS: i64 = 24;

pub fn dashboard_cache_key(user_id: &str, role: UserRole) -> String {
    format!("dashboard:{}:{}", user_id, role)
}

pub fn user_cache_tag(user_id: &str) -> String {
    format!("user:{}", user_id)
}

pub const DASHBOARD_CACHE_TAG: &str = "dashboard";

/// Computes dashboard snapshots, real-time metrics and windowed aggregations
pub struct AnalyticsProcessor {
    config: AnalyticsConfig,
    events: Arc<dyn EventStore>,
    aggregations: Arc<dyn AggregationStore>,
    board: Arc<dyn JobBoardReader>,
    cache: Option<Arc<dyn Cache>>,
    started_at: Instant,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    aggregation_handle: Mutex<Option<JoinHandle<()>>>,
}

impl AnalyticsProcessor {
    pub fn new(
        config: AnalyticsConfig,
        events: Arc<dyn EventStore>,
        aggregations: Arc<dyn AggregationStore>,
        board: Arc<dyn JobBoardReader>,
        cache: Option<Arc<dyn Cache>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            events,
            aggregations,
            board,
            cache,
            started_at: Instant::now(),
            shutdown_tx,
            shutdown_rx,
            aggregation_handle: Mutex::new(None),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn has_cache(&self) -> bool {
        self.cache.is_some()
    }

    // ========================================================================
    // Dashboard snapshots
    // ========================================================================

    /// Role-specific dashboard for a user, served from cache when fresh
    pub async fn get_dashboard_metrics(&self, user_id: &str, role: UserRole) -> Result<DashboardMetrics> {
        let key = dashboard_cache_key(user_id, role);

        if let Some(cached) = self.cached_dashboard(&key).await {
            debug!(user_id, %role, "Dashboard cache hit");
            return Ok(cached);
        }

        let metrics = match role {
            UserRole::Jobseeker => DashboardMetrics::Jobseeker(self.jobseeker_metrics(user_id).await?),
            UserRole::Employer => DashboardMetrics::Employer(self.employer_metrics(user_id).await?),
            UserRole::Admin => DashboardMetrics::Admin(self.admin_metrics().await?),
        };

        self.store_dashboard(&key, user_id, &metrics).await;
        Ok(metrics)
    }

    async fn cached_dashboard(&self, key: &str) -> Option<DashboardMetrics> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(Some(value)) => match serde_json::from_value(value) {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    warn!(key, "Discarding undecodable cached dashboard: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!(key, "Cache read failed, recomputing: {}", e);
                None
            }
        }
    }

    async fn store_dashboard(&self, key: &str, user_id: &str, metrics: &DashboardMetrics) {
        let Some(cache) = &self.cache else {
            return;
        };
        let value = match serde_json::to_value(metrics) {
            Ok(value) => value,
            Err(e) => {
                warn!(key, "Failed to encode dashboard for cache: {}", e);
                return;
            }
        };
        let tags = [user_cache_tag(user_id), DASHBOARD_CACHE_TAG.to_string()];
        if let Err(e) = cache
            .set(key, value, self.config.dashboard_cache_ttl, &tags)
            .await
        {
            warn!(key, "Cache write failed: {}", e);
        }
    }

    async fn jobseeker_metrics(&self, user_id: &str) -> Result<JobseekerMetrics> {
        let (profile, applications, bookmarks, searches, recent_applications, recent_bookmarks) = tokio::try_join!(
            self.board.profile(user_id),
            self.board.count_applications(user_id),
            self.board.count_bookmarks(user_id),
            self.board.count_searches(user_id),
            self.board.recent_applications(user_id, RECENT_LIMIT),
            self.board.recent_bookmarks(user_id, RECENT_LIMIT),
        )?;

        Ok(JobseekerMetrics::build(
            profile.as_ref(),
            JobseekerCounts {
                applications,
                bookmarks,
                searches,
            },
            recent_applications,
            recent_bookmarks,
        ))
    }

    async fn employer_metrics(&self, user_id: &str) -> Result<EmployerMetrics> {
        let (postings, applications, recent) = tokio::try_join!(
            self.board.employer_postings(user_id),
            self.board.employer_applications(user_id),
            self.board.employer_recent_applications(user_id, RECENT_LIMIT),
        )?;

        Ok(EmployerMetrics::build(postings, &applications, recent, Utc::now()))
    }

    async fn admin_metrics(&self) -> Result<AdminMetrics> {
        let (counts, sectors, recent) = tokio::try_join!(
            self.board.platform_counts(),
            self.board.top_sectors(TOP_SECTORS_LIMIT),
            self.events.recent_events(RECENT_SYSTEM_EVENTS_LIMIT),
        )?;

        Ok(AdminMetrics::build(counts, self.uptime_secs(), sectors, &recent))
    }

    /// Drop cached dashboards for one user
    pub async fn invalidate_user(&self, user_id: &str) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.invalidate_tag(&user_cache_tag(user_id)).await {
                warn!(user_id, "Cache invalidation failed: {}", e);
            }
        }
    }

    /// Drop every cached dashboard
    pub async fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            match cache.invalidate_tag(DASHBOARD_CACHE_TAG).await {
                Ok(removed) => debug!(removed, "Dashboard cache cleared"),
                Err(e) => warn!("Cache clear failed: {}", e),
            }
        }
    }

    // ========================================================================
    // Real-time metrics, stats, activity feed
    // ========================================================================

    /// System-wide activity; never cached
    pub async fn get_real_time_metrics(&self) -> Result<RealTimeMetrics> {
        let now = Utc::now();
        let active_since = now - ChronoDuration::minutes(ACTIVE_USER_WINDOW_MINUTES);
        let hour_ago = now - ChronoDuration::hours(1);

        let (active_users, job_views, applications, searches, top_event_types) = tokio::try_join!(
            self.events.count_distinct_users_since(active_since),
            self.events.count_by_type_since(event_types::JOB_VIEW, hour_ago),
            self.events.count_by_type_since(event_types::JOB_APPLICATION, hour_ago),
            self.events.count_by_type_since(event_types::JOB_SEARCH, hour_ago),
            self.events.top_event_types_since(hour_ago, TOP_EVENT_TYPES_LIMIT),
        )?;

        Ok(RealTimeMetrics {
            active_users,
            job_views,
            applications,
            searches,
            top_event_types,
        })
    }

    pub async fn get_event_stats(&self, range: StatsRange) -> Result<EventStats> {
        let now = Utc::now();
        let events = self.events.events_between(now - range.duration(), now).await?;
        Ok(EventStats::from_events(&events))
    }

    /// Last 24 hours, newest first
    pub async fn get_activity_feed(&self, filter: &FeedFilter, limit: usize) -> Result<Vec<FeedItem>> {
        let since = Utc::now() - ChronoDuration::hours(FEED_WINDOW_HOURS);
        let events = self.events.activity_feed(filter, since, limit).await?;
        Ok(events.iter().map(FeedItem::from).collect())
    }

    // ========================================================================
    // Aggregation
    // ========================================================================

    pub async fn process_events(&self) -> Result<Vec<Aggregation>> {
        self.process_events_at(Utc::now()).await
    }

    /// Recompute the hour and day windows containing `now`
    pub async fn process_events_at(&self, now: DateTime<Utc>) -> Result<Vec<Aggregation>> {
        let windows = [
            AggregationWindow::hourly_containing(now),
            AggregationWindow::daily_containing(now),
        ];

        let mut written = Vec::with_capacity(windows.len());
        for window in windows {
            let events = self.events.events_between(window.start, window.end).await?;
            let aggregation = Aggregation::new(&window, AggregationMetrics::from_events(&events));
            self.aggregations.upsert_aggregation(&aggregation).await?;
            debug!(
                aggregation_type = %aggregation.aggregation_type,
                time_period = %aggregation.time_period,
                total_events = aggregation.metrics.total_events,
                "Aggregation upserted"
            );
            written.push(aggregation);
        }
        Ok(written)
    }

    pub async fn get_aggregation(
        &self,
        aggregation_type: AggregationType,
        at: DateTime<Utc>,
    ) -> Result<Option<Aggregation>> {
        let window = match aggregation_type {
            AggregationType::Hourly => AggregationWindow::hourly_containing(at),
            AggregationType::Daily => AggregationWindow::daily_containing(at),
        };
        self.aggregations
            .get_aggregation(aggregation_type, &window.label())
            .await
    }

    /// Start the periodic aggregation task
    pub fn start(self: &Arc<Self>) {
        let mut handle_slot = self.aggregation_handle.lock();
        if handle_slot.is_some() {
            return;
        }

        let processor = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let interval = self.config.aggregation_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = processor.process_events().await {
                            error!("Aggregation run failed: {}", e);
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Aggregation loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Aggregation loop exited");
        });

        *handle_slot = Some(handle);
        info!(
            interval_secs = interval.as_secs(),
            cache = self.cache.is_some(),
            "Analytics processor started"
        );
    }

    pub async fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.aggregation_handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Aggregation loop panicked: {}", e);
            }
        }
        info!("Analytics processor stopped");
    }
}
