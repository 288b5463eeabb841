// Pipeline configuration
//
// Loaded from environment variables with defaults that work for local
// development. Builders exist so tests can shrink intervals.

use std::env;
use std::time::Duration;

use crate::error::{PulseError, Result};

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

// ============================================================================
// CollectorConfig
// ============================================================================

/// Event collector configuration
#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    /// Probability an event is kept (1.0 keeps everything)
    pub sampling_rate: f64,

    /// Queue length that triggers an immediate flush
    pub batch_size: usize,

    /// Periodic flush interval
    pub flush_interval: Duration,

    /// Hard cap on queued events; the oldest are dropped beyond it
    pub queue_capacity: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 1.0,
            batch_size: 100,
            flush_interval: Duration::from_millis(5000),
            queue_capacity: 10_000,
        }
    }
}

impl CollectorConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `PULSE_SAMPLING_RATE` (default: 1.0)
    /// - `PULSE_BATCH_SIZE` (default: 100)
    /// - `PULSE_FLUSH_INTERVAL_MS` (default: 5000)
    /// - `PULSE_QUEUE_CAPACITY` (default: 10000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sampling_rate: env_parse("PULSE_SAMPLING_RATE").unwrap_or(defaults.sampling_rate),
            batch_size: env_parse("PULSE_BATCH_SIZE").unwrap_or(defaults.batch_size),
            flush_interval: env_parse("PULSE_FLUSH_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.flush_interval),
            queue_capacity: env_parse("PULSE_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
        }
    }

    pub fn with_sampling_rate(mut self, rate: f64) -> Self {
        self.sampling_rate = rate;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Bound on events re-queued after a failed flush
    pub fn requeue_limit(&self) -> usize {
        self.batch_size.saturating_mul(2)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.sampling_rate) {
            return Err(PulseError::config(format!(
                "sampling rate must be within [0, 1], got {}",
                self.sampling_rate
            )));
        }
        if self.batch_size == 0 {
            return Err(PulseError::config("batch size must be at least 1"));
        }
        if self.queue_capacity < self.batch_size {
            return Err(PulseError::config("queue capacity must be >= batch size"));
        }
        if self.flush_interval.is_zero() {
            return Err(PulseError::config("flush interval must be non-zero"));
        }
        Ok(())
    }
}

// ============================================================================
// AnalyticsConfig
// ============================================================================

/// Analytics processor configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsConfig {
    /// TTL for cached dashboard snapshots
    pub dashboard_cache_ttl: Duration,

    /// How often hourly/daily aggregations are recomputed
    pub aggregation_interval: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            dashboard_cache_ttl: Duration::from_secs(30),
            aggregation_interval: Duration::from_secs(300),
        }
    }
}

impl AnalyticsConfig {
    /// Environment variables:
    /// - `PULSE_DASHBOARD_CACHE_TTL_SECS` (default: 30)
    /// - `PULSE_AGGREGATION_INTERVAL_SECS` (default: 300)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            dashboard_cache_ttl: env_parse("PULSE_DASHBOARD_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.dashboard_cache_ttl),
            aggregation_interval: env_parse("PULSE_AGGREGATION_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.aggregation_interval),
        }
    }

    pub fn with_dashboard_cache_ttl(mut self, ttl: Duration) -> Self {
        self.dashboard_cache_ttl = ttl;
        self
    }

    pub fn with_aggregation_interval(mut self, interval: Duration) -> Self {
        self.aggregation_interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.aggregation_interval.is_zero() {
            return Err(PulseError::config("aggregation interval must be non-zero"));
        }
        Ok(())
    }
}

// ============================================================================
// FanOutConfig
// ============================================================================

/// Fan-out service and connection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutConfig {
    /// Interval between `dashboard_metrics` broadcasts
    pub broadcast_interval: Duration,

    /// Frames buffered per connection before new frames are dropped
    pub outbound_buffer: usize,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            broadcast_interval: Duration::from_millis(5000),
            outbound_buffer: 64,
        }
    }
}

impl FanOutConfig {
    /// Environment variables:
    /// - `PULSE_BROADCAST_INTERVAL_MS` (default: 5000)
    /// - `PULSE_OUTBOUND_BUFFER` (default: 64)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            broadcast_interval: env_parse("PULSE_BROADCAST_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.broadcast_interval),
            outbound_buffer: env_parse::<usize>("PULSE_OUTBOUND_BUFFER")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.outbound_buffer),
        }
    }

    pub fn with_broadcast_interval(mut self, interval: Duration) -> Self {
        self.broadcast_interval = interval;
        self
    }

    pub fn with_outbound_buffer(mut self, buffer: usize) -> Self {
        self.outbound_buffer = buffer.max(1);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.broadcast_interval.is_zero() {
            return Err(PulseError::config("broadcast interval must be non-zero"));
        }
        Ok(())
    }
}

// ============================================================================
// PipelineConfig
// ============================================================================

/// Everything the pipeline services need
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineConfig {
    pub collector: CollectorConfig,
    pub analytics: AnalyticsConfig,
    pub fanout: FanOutConfig,
}

impl PipelineConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            collector: CollectorConfig::from_env(),
            analytics: AnalyticsConfig::from_env(),
            fanout: FanOutConfig::from_env(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.collector.validate()?;
        self.analytics.validate()?;
        self.fanout.validate()
    }
}
