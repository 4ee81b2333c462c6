//! In-memory sink implementation.
//!
//! Collects published records in a vector and supports failure injection.
//! Used by the pipeline tests and handy for running the processor without
//! external infrastructure.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rdkafka::error::KafkaError;
use rdkafka::types::RDKafkaErrorCode;

use crate::errors::{PipelineError, Result};
use crate::events::MetricsRecord;
use crate::sink::{MetricsPublisher, MetricsStore};

/// In-memory implementation of both sink traits.
#[derive(Clone, Default)]
pub struct InMemorySink {
    records: Arc<RwLock<Vec<MetricsRecord>>>,
    failing: Arc<AtomicBool>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// When set, every write fails until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Snapshot of everything accepted so far, in arrival order.
    pub fn records(&self) -> Vec<MetricsRecord> {
        self.records.read().clone()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn accept(&self, record: &MetricsRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PipelineError::Kafka(KafkaError::MessageProduction(
                RDKafkaErrorCode::MessageTimedOut,
            )));
        }
        self.records.write().push(record.clone());
        Ok(())
    }
}

impl MetricsPublisher for InMemorySink {
    async fn publish(&self, record: &MetricsRecord) -> Result<()> {
        self.accept(record)
    }
}

impl MetricsStore for InMemorySink {
    async fn upsert(&self, record: &MetricsRecord) -> Result<()> {
        self.accept(record)
    }
}
