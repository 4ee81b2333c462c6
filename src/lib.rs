//! tally - streaming telemetry pipeline for LLM-powered applications.
//!
//! Applications publish two event streams keyed by an opaque `request_id`:
//! `llm.requests` (one event per model call issued) and `llm.responses`
//! (one event per completion, success or failure). The processor joins the
//! two by id, aggregates matched pairs into tumbling event-time windows per
//! (tenant, route, model), and emits one [`events::MetricsRecord`] per
//! closed window to the `llm.metrics` topic and to Postgres.
//!
//! Three binaries share this crate:
//!
//! - `processor`: the stream-processing core ([`processor`])
//! - `ingestion-api`: validating HTTP front-end publishing to the input
//!   streams ([`api::ingestion`])
//! - `metrics-api`: read-only HTTP view over the relational store
//!   ([`api::metrics`])
//!
//! Delivery is at-least-once end to end: duplicates on the input streams
//! are absorbed by the join's fold guard, and duplicates on the output side
//! are absorbed by keyed stream records and upsert-on-conflict rows.

pub mod api;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod kafka;
pub mod processor;
pub mod sink;
pub mod telemetry;

pub use config::Config;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::db::MetricsDb;
use crate::kafka::{EventConsumer, EventProducer};
use crate::processor::Processor;

/// Wire up the production processor (Kafka in, Kafka + Postgres out) and
/// run it until `shutdown` fires.
pub async fn run_processor(config: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let consumer = EventConsumer::connect(
        &config.kafka_brokers,
        &config.consumer_group,
        &[kafka::TOPIC_REQUESTS, kafka::TOPIC_RESPONSES],
    )?;
    let producer = EventProducer::connect(&config.kafka_brokers)?;

    let db = MetricsDb::connect(&config.postgres_dsn).await?;
    db.run_migrations().await?;

    let processor = Processor::new(consumer, producer, db, &config)?;
    processor.run(shutdown).await?;
    Ok(())
}

/// Resolve when the process receives Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Shutdown signal received");
}
