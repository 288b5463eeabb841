// Dashboard projections
//
// Raw records come from the job board reader; the builders here turn them into
// the role-specific dashboard objects. Everything in this module is pure so
// the projections are testable without a store.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::event::Event;

pub const UNKNOWN_COMPANY: &str = "Unknown Company";
pub const RECENT_LIMIT: usize = 5;
pub const TOP_POSTINGS_LIMIT: usize = 5;
pub const TOP_SECTORS_LIMIT: usize = 5;
pub const RECENT_SYSTEM_EVENTS_LIMIT: usize = 10;

// ============================================================================
// Raw records (read from the job board)
// ============================================================================

/// Profile fields tracked for completion. Empty strings count as missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileSnapshot {
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

impl ProfileSnapshot {
    fn fields(&self) -> [&Option<String>; 9] {
        [
            &self.first_name,
            &self.last_name,
            &self.bio,
            &self.skills,
            &self.experience,
            &self.education,
            &self.profile_picture,
            &self.location,
            &self.phone,
        ]
    }

    /// Percentage of populated fields, rounded to the nearest integer
    pub fn completion_percent(&self) -> u8 {
        let fields = self.fields();
        let filled = fields
            .iter()
            .filter(|f| f.as_deref().is_some_and(|v| !v.is_empty()))
            .count();
        ((filled as f64 / fields.len() as f64) * 100.0).round() as u8
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApplicationRecord {
    pub id: String,
    pub job_title: String,
    pub company: Option<String>,
    pub status: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BookmarkRecord {
    pub id: String,
    pub job_title: String,
    pub company: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostingRecord {
    pub id: String,
    pub title: String,
    pub is_active: bool,
    pub views: u64,
    pub applications_count: u64,
}

/// An application to one of an employer's postings
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedApplicationRecord {
    pub id: String,
    pub job_title: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub status: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlatformCounts {
    pub total_users: u64,
    pub active_users: u64,
    pub total_jobs: u64,
    pub active_jobs: u64,
    pub total_applications: u64,
}

// ============================================================================
// Projections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSummary {
    pub id: String,
    pub job_title: String,
    pub company: String,
    pub status: String,
    pub applied_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkSummary {
    pub id: String,
    pub job_title: String,
    pub company: String,
    pub bookmarked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobseekerMetrics {
    pub profile_completion: u8,
    pub applications_count: u64,
    pub bookmarks_count: u64,
    pub search_count: u64,
    pub recommended_jobs: u64,
    pub recent_applications: Vec<ApplicationSummary>,
    pub saved_jobs: Vec<BookmarkSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPerformance {
    pub id: String,
    pub title: String,
    pub applications: u64,
    pub views: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedApplication {
    pub id: String,
    pub job_title: String,
    pub applicant_name: String,
    pub applied_at: DateTime<Utc>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmployerMetrics {
    pub active_jobs: u64,
    pub total_applications: u64,
    pub new_applications: u64,
    pub shortlisted_count: u64,
    pub job_views: u64,
    pub top_performing_jobs: Vec<JobPerformance>,
    pub recent_applications: Vec<ReceivedApplication>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemHealth {
    pub uptime_secs: u64,
    pub response_time_ms: f64,
    pub error_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SectorCount {
    pub sector: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    #[serde(rename = "type")]
    pub event_type: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMetrics {
    pub total_users: u64,
    pub active_users: u64,
    pub total_jobs: u64,
    pub active_jobs: u64,
    pub total_applications: u64,
    pub system_health: SystemHealth,
    pub top_sectors: Vec<SectorCount>,
    pub recent_activity: Vec<ActivityItem>,
}

/// Role-specific dashboard snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DashboardMetrics {
    Jobseeker(JobseekerMetrics),
    Employer(EmployerMetrics),
    Admin(AdminMetrics),
}

/// Trimmed "first last", or "Anonymous" when both are empty
pub fn applicant_display_name(first: Option<&str>, last: Option<&str>) -> String {
    let name = format!("{} {}", first.unwrap_or(""), last.unwrap_or(""));
    let name = name.trim();
    if name.is_empty() {
        "Anonymous".to_string()
    } else {
        name.to_string()
    }
}

fn company_or_unknown(company: Option<String>) -> String {
    company
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| UNKNOWN_COMPANY.to_string())
}

/// Counts feeding the jobseeker projection
#[derive(Debug, Clone, Copy, Default)]
pub struct JobseekerCounts {
    pub applications: u64,
    pub bookmarks: u64,
    pub searches: u64,
}

impl JobseekerMetrics {
    pub fn build(
        profile: Option<&ProfileSnapshot>,
        counts: JobseekerCounts,
        recent_applications: Vec<ApplicationRecord>,
        recent_bookmarks: Vec<BookmarkRecord>,
    ) -> Self {
        Self {
            profile_completion: profile.map(|p| p.completion_percent()).unwrap_or(0),
            applications_count: counts.applications,
            bookmarks_count: counts.bookmarks,
            search_count: counts.searches,
            recommended_jobs: 0,
            recent_applications: recent_applications
                .into_iter()
                .take(RECENT_LIMIT)
                .map(|a| ApplicationSummary {
                    id: a.id,
                    job_title: a.job_title,
                    company: company_or_unknown(a.company),
                    status: a.status,
                    applied_at: a.applied_at,
                })
                .collect(),
            saved_jobs: recent_bookmarks
                .into_iter()
                .take(RECENT_LIMIT)
                .map(|b| BookmarkSummary {
                    id: b.id,
                    job_title: b.job_title,
                    company: company_or_unknown(b.company),
                    bookmarked_at: b.created_at,
                })
                .collect(),
        }
    }
}

impl EmployerMetrics {
    /// `applications` is every application to the employer's postings as
    /// `(status, applied_at)`; `recent` is already ordered newest first.
    pub fn build(
        postings: Vec<PostingRecord>,
        applications: &[(String, DateTime<Utc>)],
        recent: Vec<ReceivedApplicationRecord>,
        now: DateTime<Utc>,
    ) -> Self {
        let day_ago = now - Duration::hours(24);
        let active_jobs = postings.iter().filter(|p| p.is_active).count() as u64;
        let job_views = postings.iter().map(|p| p.views).sum();

        let mut ranked = postings;
        ranked.sort_by(|a, b| {
            (b.applications_count + b.views).cmp(&(a.applications_count + a.views))
        });

        Self {
            active_jobs,
            total_applications: applications.len() as u64,
            new_applications: applications
                .iter()
                .filter(|(_, at)| *at > day_ago)
                .count() as u64,
            shortlisted_count: applications
                .iter()
                .filter(|(status, _)| status == "shortlisted")
                .count() as u64,
            job_views,
            top_performing_jobs: ranked
                .into_iter()
                .take(TOP_POSTINGS_LIMIT)
                .map(|p| JobPerformance {
                    id: p.id,
                    title: p.title,
                    applications: p.applications_count,
                    views: p.views,
                })
                .collect(),
            recent_applications: recent
                .into_iter()
                .take(RECENT_LIMIT)
                .map(|a| ReceivedApplication {
                    applicant_name: applicant_display_name(
                        a.first_name.as_deref(),
                        a.last_name.as_deref(),
                    ),
                    id: a.id,
                    job_title: a.job_title.unwrap_or_else(|| "Unknown".to_string()),
                    applied_at: a.applied_at,
                    status: a.status,
                })
                .collect(),
        }
    }
}

impl AdminMetrics {
    pub fn build(
        counts: PlatformCounts,
        uptime_secs: u64,
        top_sectors: Vec<SectorCount>,
        recent_events: &[Event],
    ) -> Self {
        Self {
            total_users: counts.total_users,
            active_users: counts.active_users,
            total_jobs: counts.total_jobs,
            active_jobs: counts.active_jobs,
            total_applications: counts.total_applications,
            system_health: SystemHealth {
                uptime_secs,
                response_time_ms: 0.0,
                error_rate: 0.0,
            },
            top_sectors: top_sectors.into_iter().take(TOP_SECTORS_LIMIT).collect(),
            recent_activity: recent_events
                .iter()
                .take(RECENT_SYSTEM_EVENTS_LIMIT)
                .map(|e| ActivityItem {
                    event_type: e.event_type.clone(),
                    description: e.admin_description(),
                    timestamp: e.created_at,
                })
                .collect(),
        }
    }
}

// ============================================================================
// Real-time metrics and stats
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventTypeCount {
    pub event_type: String,
    pub count: u64,
}

/// System-wide snapshot over the last hour. Carries no timestamp; the
/// broadcast envelope adds one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealTimeMetrics {
    pub active_users: u64,
    pub job_views: u64,
    pub applications: u64,
    pub searches: u64,
    pub top_event_types: Vec<EventTypeCount>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsRange {
    Hour,
    #[default]
    Day,
    Week,
}

impl StatsRange {
    pub fn duration(&self) -> Duration {
        match self {
            StatsRange::Hour => Duration::hours(1),
            StatsRange::Day => Duration::days(1),
            StatsRange::Week => Duration::weeks(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEventCount {
    pub user_id: String,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total_events: u64,
    pub events_by_type: BTreeMap<String, u64>,
    pub events_by_role: BTreeMap<String, u64>,
    pub top_users: Vec<UserEventCount>,
}

impl EventStats {
    pub const TOP_USERS: usize = 10;

    pub fn from_events(events: &[Event]) -> Self {
        let mut stats = EventStats {
            total_events: events.len() as u64,
            ..Default::default()
        };
        let mut per_user: BTreeMap<&str, u64> = BTreeMap::new();
        for event in events {
            *stats
                .events_by_type
                .entry(event.event_type.clone())
                .or_insert(0) += 1;
            if let Some(role) = event.user_role {
                *stats.events_by_role.entry(role.to_string()).or_insert(0) += 1;
            }
            if let Some(user_id) = event.user_id.as_deref() {
                *per_user.entry(user_id).or_insert(0) += 1;
            }
        }
        let mut top: Vec<_> = per_user.into_iter().collect();
        // stable sort keeps user id order among ties
        top.sort_by(|a, b| b.1.cmp(&a.1));
        stats.top_users = top
            .into_iter()
            .take(Self::TOP_USERS)
            .map(|(user_id, count)| UserEventCount {
                user_id: user_id.to_string(),
                count,
            })
            .collect();
        stats
    }
}

/// Entry in the live activity feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedItem {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub event_type: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
}

impl From<&Event> for FeedItem {
    fn from(event: &Event) -> Self {
        Self {
            id: event.event_id,
            event_type: event.event_type.clone(),
            description: event.feed_description(),
            timestamp: event.created_at,
            metadata: event.metadata.clone(),
        }
    }
}
