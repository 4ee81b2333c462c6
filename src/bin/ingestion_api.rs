use std::sync::Arc;

use clap::Parser;
use tally::config::Args;
use tally::kafka::EventProducer;
use tally::{Config, telemetry};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;

    telemetry::init_telemetry()?;
    // Install the recorder up front so counters recorded before the first
    // scrape are not lost
    tally::api::prometheus_handle();

    let producer = Arc::new(EventProducer::connect(&config.kafka_brokers)?);
    let app = tally::api::ingestion::router(producer);

    let listener = TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    info!(port = config.http_port, "Ingestion API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(tally::shutdown_signal())
        .await?;

    info!("Ingestion API stopped");
    Ok(())
}
