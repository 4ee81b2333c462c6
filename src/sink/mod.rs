//! Sink seam for closed-window metrics.
//!
//! The window flusher writes every record to two places: the durable
//! metrics stream (system of record for downstream consumers) and the
//! relational store (ad-hoc querying). Both sides sit behind a trait so the
//! flush semantics (per-bucket emission, retry on the next tick, idempotent
//! re-delivery) can be exercised without a broker or a database.

use std::future::Future;

use crate::db::MetricsDb;
use crate::errors::Result;
use crate::events::MetricsRecord;
use crate::kafka::{EventProducer, TOPIC_METRICS};

pub mod in_memory;

/// Durable stream sink for metrics records.
///
/// Publishing must be idempotent from the reader's point of view: records
/// are keyed by `tenant|route|model`, so re-emitting a window is tolerated
/// by keyed (log-compacting) consumers.
pub trait MetricsPublisher: Send + Sync {
    fn publish(&self, record: &MetricsRecord) -> impl Future<Output = Result<()>> + Send;
}

/// Relational sink for metrics records.
///
/// `upsert` must replace on the `(tenant_id, route, model, window_start)`
/// key so re-delivery after a partial flush has no observable effect.
pub trait MetricsStore: Send + Sync {
    fn upsert(&self, record: &MetricsRecord) -> impl Future<Output = Result<()>> + Send;
}

impl MetricsPublisher for EventProducer {
    async fn publish(&self, record: &MetricsRecord) -> Result<()> {
        self.send_json(TOPIC_METRICS, &record.stream_key(), record).await
    }
}

impl MetricsStore for MetricsDb {
    async fn upsert(&self, record: &MetricsRecord) -> Result<()> {
        self.upsert_metrics(record).await
    }
}
