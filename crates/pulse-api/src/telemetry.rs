// Tracing setup
// Decision: RUST_LOG wins; otherwise the configured default filter applies

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "pulse_api=debug,pulse_core=debug,pulse_storage=info,tower_http=debug";

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub log_filter: String,
    /// ANSI colors in log output (LOG_ANSI=false disables)
    pub ansi: bool,
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        Self {
            service_name: std::env::var("PULSE_SERVICE_NAME")
                .unwrap_or_else(|_| "pulse-api".to_string()),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            ansi: std::env::var("LOG_ANSI")
                .map(|v| v != "false" && v != "0")
                .unwrap_or(true),
        }
    }
}

pub fn init_telemetry(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_ansi(config.ansi))
        .init();

    tracing::debug!(service = %config.service_name, "Tracing initialized");
}
