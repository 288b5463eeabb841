// Time-windowed aggregations
//
// Decision: windows are aligned in UTC and labelled by their RFC 3339 start
// Decision: metrics use BTreeMap so the serialized form is deterministic, which
// makes re-running an aggregation over the same events byte-identical

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::event::Event;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationType {
    Hourly,
    Daily,
}

impl AggregationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationType::Hourly => "hourly",
            AggregationType::Daily => "daily",
        }
    }
}

impl fmt::Display for AggregationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A half-open `[start, end)` window of a given granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregationWindow {
    pub aggregation_type: AggregationType,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AggregationWindow {
    /// The hour window containing `at`
    pub fn hourly_containing(at: DateTime<Utc>) -> Self {
        let hour = NaiveTime::from_hms_opt(at.hour(), 0, 0).unwrap_or(NaiveTime::MIN);
        let start = Utc.from_utc_datetime(&at.date_naive().and_time(hour));
        Self {
            aggregation_type: AggregationType::Hourly,
            start,
            end: start + Duration::hours(1),
        }
    }

    /// The UTC day window containing `at`
    pub fn daily_containing(at: DateTime<Utc>) -> Self {
        let start = Utc.from_utc_datetime(&at.date_naive().and_time(NaiveTime::MIN));
        Self {
            aggregation_type: AggregationType::Daily,
            start,
            end: start + Duration::days(1),
        }
    }

    /// Canonical label used as the `time_period` key
    pub fn label(&self) -> String {
        self.start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// Counts computed over one window
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationMetrics {
    pub total_events: u64,
    pub event_types: BTreeMap<String, u64>,
    pub user_roles: BTreeMap<String, u64>,
}

impl AggregationMetrics {
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut metrics = Self::default();
        for event in events {
            metrics.total_events += 1;
            *metrics
                .event_types
                .entry(event.event_type.clone())
                .or_insert(0) += 1;
            if let Some(role) = event.user_role {
                *metrics.user_roles.entry(role.to_string()).or_insert(0) += 1;
            }
        }
        metrics
    }
}

/// One stored aggregation row, unique per `(aggregation_type, time_period)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub aggregation_type: AggregationType,
    pub time_period: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub metrics: AggregationMetrics,
    pub updated_at: DateTime<Utc>,
}

impl Aggregation {
    pub fn new(window: &AggregationWindow, metrics: AggregationMetrics) -> Self {
        Self {
            aggregation_type: window.aggregation_type,
            time_period: window.label(),
            start_time: window.start,
            end_time: window.end,
            metrics,
            updated_at: Utc::now(),
        }
    }
}
