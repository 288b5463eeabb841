// PostgreSQL LISTEN/NOTIFY event bus
// Decision: One NOTIFY channel carries {topic, payload}; subscribers filter topics in process
// Decision: publish() only enqueues; a background task issues pg_notify so callers never wait on the DB

use async_trait::async_trait;
use futures::StreamExt;
use pulse_core::traits::{BusMessage, BusStream, EventBus};
use pulse_core::{PulseError, Result};
use serde_json::Value;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

pub const BUS_CHANNEL: &str = "pulse_events";

/// NOTIFY payloads must stay under 8000 bytes
const MAX_PAYLOAD_BYTES: usize = 7900;

const PUBLISH_QUEUE: usize = 4096;

pub struct PgEventBus {
    pool: PgPool,
    outbound: mpsc::Sender<String>,
}

impl PgEventBus {
    /// Spawns the publisher task; must be called inside a tokio runtime
    pub fn start(pool: PgPool) -> Self {
        let (outbound, mut rx) = mpsc::channel::<String>(PUBLISH_QUEUE);
        let publisher_pool = pool.clone();

        tokio::spawn(async move {
            while let Some(payload) = rx.recv().await {
                if let Err(e) = sqlx::query("SELECT pg_notify($1, $2)")
                    .bind(BUS_CHANNEL)
                    .bind(&payload)
                    .execute(&publisher_pool)
                    .await
                {
                    error!("pg_notify failed: {}", e);
                }
            }
            debug!("Bus publisher exited");
        });

        Self { pool, outbound }
    }
}

#[async_trait]
impl EventBus for PgEventBus {
    fn publish(&self, topic: &str, payload: &Value) -> Result<()> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload: payload.clone(),
        };
        let encoded = serde_json::to_string(&message)?;
        if encoded.len() > MAX_PAYLOAD_BYTES {
            return Err(PulseError::bus(format!(
                "payload for {} is {} bytes, over the NOTIFY limit",
                topic,
                encoded.len()
            )));
        }
        self.outbound
            .try_send(encoded)
            .map_err(|e| PulseError::bus(format!("publish queue unavailable: {}", e)))
    }

    async fn subscribe(&self, topics: &[String]) -> Result<BusStream> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| PulseError::bus(e.to_string()))?;
        listener
            .listen(BUS_CHANNEL)
            .await
            .map_err(|e| PulseError::bus(e.to_string()))?;

        let wanted: Arc<HashSet<String>> = Arc::new(topics.iter().cloned().collect());
        let stream = listener.into_stream().filter_map(move |item| {
            let wanted = Arc::clone(&wanted);
            async move {
                let notification = match item {
                    Ok(notification) => notification,
                    Err(e) => {
                        warn!("Bus listener error: {}", e);
                        return None;
                    }
                };
                match serde_json::from_str::<BusMessage>(notification.payload()) {
                    Ok(message) if wanted.contains(&message.topic) => Some(message),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("Ignoring malformed bus notification: {}", e);
                        None
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
