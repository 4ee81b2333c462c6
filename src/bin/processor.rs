use clap::Parser;
use tally::config::Args;
use tally::{Config, telemetry};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load(&args)?;

    telemetry::init_telemetry()?;

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tally::shutdown_signal().await;
            shutdown.cancel();
        });
    }

    tally::run_processor(config, shutdown).await
}
