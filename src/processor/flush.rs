//! Window flusher: the periodic driver that emits closed windows.
//!
//! Each tick walks the closable buckets in deterministic order and, per
//! bucket, publishes to the metrics stream first (system of record for
//! downstream consumers), then upserts the relational store, then removes
//! the bucket. The sequence is strictly per-bucket and never batched, so a
//! failure leaves exactly that bucket in place; it is already past its
//! grace period and will be retried wholesale on the next tick. Both sinks
//! are idempotent on their keys, which turns at-least-once re-attempts into
//! effectively-once effect.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::processor::window::WindowAggregator;
use crate::sink::{MetricsPublisher, MetricsStore};

/// Deadline for one publish to the metrics stream.
const PUBLISH_DEADLINE: Duration = Duration::from_secs(5);
/// Deadline for one relational upsert.
const STORE_DEADLINE: Duration = Duration::from_secs(10);

pub struct WindowFlusher<P, S> {
    windows: Arc<WindowAggregator>,
    publisher: P,
    store: S,
}

impl<P, S> WindowFlusher<P, S>
where
    P: MetricsPublisher,
    S: MetricsStore,
{
    pub fn new(windows: Arc<WindowAggregator>, publisher: P, store: S) -> Self {
        Self {
            windows,
            publisher,
            store,
        }
    }

    /// Tick at `every` until cancelled, flushing whatever is closable.
    pub async fn run(&self, every: Duration, shutdown: CancellationToken) {
        info!(interval_secs = every.as_secs(), "Window flusher started");

        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately; skip it so
        // the first real flush happens one full period in.
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping window flusher");
                    break;
                }

                _ = ticker.tick() => {
                    self.flush_due(Utc::now()).await;
                }
            }
        }
    }

    /// Flush every bucket closable at `now`. Returns how many windows were
    /// fully emitted (both sinks accepted and the bucket removed).
    pub async fn flush_due(&self, now: chrono::DateTime<Utc>) -> usize {
        let due = self.windows.close_due(now);
        if due.is_empty() {
            return 0;
        }

        let start = std::time::Instant::now();
        let mut flushed = 0;

        for (key, record) in due {
            match tokio::time::timeout(PUBLISH_DEADLINE, self.publisher.publish(&record)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        error = %e,
                        tenant_id = %key.tenant_id,
                        window_start = %key.window_start,
                        "Failed to publish metrics record, leaving window for retry"
                    );
                    counter!("tally_flush_failures_total", "sink" => "stream").increment(1);
                    continue;
                }
                Err(_) => {
                    warn!(
                        tenant_id = %key.tenant_id,
                        window_start = %key.window_start,
                        "Publish timed out, leaving window for retry"
                    );
                    counter!("tally_flush_failures_total", "sink" => "stream").increment(1);
                    continue;
                }
            }

            match tokio::time::timeout(STORE_DEADLINE, self.store.upsert(&record)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        error = %e,
                        tenant_id = %key.tenant_id,
                        window_start = %key.window_start,
                        "Failed to upsert metrics record, leaving window for retry"
                    );
                    counter!("tally_flush_failures_total", "sink" => "relational").increment(1);
                    continue;
                }
                Err(_) => {
                    warn!(
                        tenant_id = %key.tenant_id,
                        window_start = %key.window_start,
                        "Relational write timed out, leaving window for retry"
                    );
                    counter!("tally_flush_failures_total", "sink" => "relational").increment(1);
                    continue;
                }
            }

            self.windows.remove(&key);
            flushed += 1;
            counter!("tally_windows_flushed_total").increment(1);
            debug!(
                tenant_id = %record.tenant_id,
                route = %record.route,
                model = %record.model,
                window_start = %record.window_start,
                requests = record.requests,
                errors = record.errors,
                "Flushed window"
            );
        }

        histogram!("tally_flush_duration_seconds").record(start.elapsed().as_secs_f64());
        flushed
    }
}
