//! Error taxonomy for the pipeline.
//!
//! Only cancellation ends a run. Everything here is recoverable: broker
//! and sink errors are retried on the next poll or tick, and record-level
//! errors (malformed, invalid, unknown topic) are logged and committed
//! past so a poisoned record can never wedge the pipeline.

use thiserror::Error;

use crate::events::EventError;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Errors that can occur in the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration loaded but failed validation
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Broker operation failed
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Relational sink operation failed
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    /// JSON serialization failed (producing outbound records)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record payload did not decode as the expected event type
    #[error("malformed record on topic {topic}: {source}")]
    Malformed {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    /// Record decoded but failed event validation
    #[error("invalid event on topic {topic}: {source}")]
    InvalidEvent {
        topic: String,
        #[source]
        source: EventError,
    },

    /// Record carried no payload (e.g. a tombstone)
    #[error("record on topic {0} has no payload")]
    EmptyPayload(String),

    /// Record arrived from a topic the dispatcher does not know
    #[error("unknown topic: {0}")]
    UnknownTopic(String),
}

impl From<figment::Error> for PipelineError {
    fn from(err: figment::Error) -> Self {
        PipelineError::Config(Box::new(err))
    }
}
