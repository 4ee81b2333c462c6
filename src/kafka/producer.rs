use std::time::Duration;

use rdkafka::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use tracing::info;

use crate::errors::Result;

/// Per-record delivery deadline. A publish that cannot be acknowledged
/// within this window fails and the caller decides whether to retry.
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// JSON producer shared by the ingestion façade and the window flusher.
#[derive(Clone)]
pub struct EventProducer {
    inner: FutureProducer,
}

impl EventProducer {
    pub fn connect(brokers: &str) -> Result<Self> {
        let inner: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .create()?;

        info!(brokers, "Kafka producer connected");
        Ok(Self { inner })
    }

    /// Serialize `value` as JSON and publish it under `key`.
    pub async fn send_json<T: Serialize>(&self, topic: &str, key: &str, value: &T) -> Result<()> {
        let payload = serde_json::to_vec(value)?;

        self.inner
            .send(
                FutureRecord::to(topic).key(key).payload(&payload),
                DELIVERY_TIMEOUT,
            )
            .await
            .map_err(|(err, _record)| err)?;

        Ok(())
    }
}
