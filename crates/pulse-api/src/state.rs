// Process-wide service wiring
// Decision: One instance of each service is built at startup and shared through AppState
// Decision: Lifecycle is explicit: start() spawns the background loops, shutdown() flushes and joins them

use pulse_core::{
    AggregationStore, AnalyticsProcessor, AuthVerifier, Cache, ConnectionRegistry, EventBus,
    EventCollector, EventStore, FanOutService, JobBoardReader, NotificationStore, PipelineConfig,
    RecipientDirectory,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Which backends this process runs on (reported by /health)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Backends {
    pub storage: &'static str,
    pub bus: &'static str,
}

/// External collaborators the pipeline is built from
pub struct Collaborators {
    pub events: Arc<dyn EventStore>,
    pub aggregations: Arc<dyn AggregationStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub board: Arc<dyn JobBoardReader>,
    pub directory: Arc<dyn RecipientDirectory>,
    pub cache: Option<Arc<dyn Cache>>,
    pub bus: Option<Arc<dyn EventBus>>,
    pub verifier: Arc<dyn AuthVerifier>,
    pub backends: Backends,
}

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub collector: Arc<EventCollector>,
    pub analytics: Arc<AnalyticsProcessor>,
    pub fanout: Arc<FanOutService>,
    pub verifier: Arc<dyn AuthVerifier>,
    pub backends: Backends,
}

impl AppState {
    pub fn build(config: &PipelineConfig, deps: Collaborators) -> Self {
        let collector = Arc::new(EventCollector::new(
            config.collector.clone(),
            deps.events.clone(),
            deps.bus.clone(),
        ));
        let analytics = Arc::new(AnalyticsProcessor::new(
            config.analytics.clone(),
            deps.events,
            deps.aggregations,
            deps.board,
            deps.cache,
        ));
        let registry = Arc::new(ConnectionRegistry::new(
            deps.verifier.clone(),
            deps.directory.clone(),
            config.fanout.outbound_buffer,
        ));
        let fanout = Arc::new(FanOutService::new(
            config.fanout.clone(),
            registry,
            analytics.clone(),
            deps.notifications,
            deps.directory,
            deps.bus,
        ));

        Self {
            collector,
            analytics,
            fanout,
            verifier: deps.verifier,
            backends: deps.backends,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.fanout.registry()
    }

    /// Spawn the flush, aggregation, broadcast and relay loops
    pub fn start(&self) {
        self.collector.start();
        self.analytics.start();
        self.fanout.start();
        info!(
            storage = self.backends.storage,
            bus = self.backends.bus,
            "Pipeline services started"
        );
    }

    /// Stop the loops; the collector flushes whatever is still queued
    pub async fn shutdown(&self) {
        let flushed = self.collector.stop().await;
        self.fanout.stop().await;
        self.analytics.stop().await;
        info!(flushed, "Pipeline services stopped");
    }
}
