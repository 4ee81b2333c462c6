use clap::Parser;
use tally::config::Args;
use tally::db::MetricsDb;
use tally::{Config, telemetry};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;

    telemetry::init_telemetry()?;
    tally::api::prometheus_handle();

    let db = MetricsDb::connect(&config.postgres_dsn).await?;
    let app = tally::api::metrics::router(db);

    let listener = TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    info!(port = config.http_port, "Metrics API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(tally::shutdown_signal())
        .await?;

    info!("Metrics API stopped");
    Ok(())
}
