//! The stream-processing core.
//!
//! ```text
//! llm.requests ──┐
//!                ├─→ Processor (decode + route) ─→ PairStore ─→ Joiner
//! llm.responses ─┘                                                │ matched pair
//!                                                                 ↓
//!                                                         WindowAggregator
//!                                                                 │ close_due (ticker)
//!                                                                 ↓
//!                                                          WindowFlusher
//!                                                           │          │
//!                                                           ↓          ↓
//!                                                      llm.metrics  Postgres
//! ```
//!
//! The processor owns input consumption and the lifecycle of two
//! housekeepers (window flushing, pair-store eviction), all cancellable
//! through one shared token. Offsets are committed per record after the
//! record has been handled or deliberately skipped: skipping *with* a
//! commit is what keeps a poisoned record from wedging the pipeline, at the
//! price that skipped records are never retried.

pub mod flush;
pub mod join;
pub mod pair_store;
pub mod window;

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use metrics::{counter, gauge};
use rdkafka::Message;
use rdkafka::message::BorrowedMessage;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::errors::{PipelineError, Result};
use crate::events::{RequestEvent, ResponseEvent};
use crate::kafka::{self, EventConsumer};
use crate::processor::flush::WindowFlusher;
use crate::processor::join::Joiner;
use crate::processor::pair_store::PairStore;
use crate::processor::window::WindowAggregator;
use crate::sink::{MetricsPublisher, MetricsStore};

pub struct Processor<P, S> {
    consumer: EventConsumer,
    pairs: Arc<PairStore>,
    joiner: Joiner,
    flusher: Arc<WindowFlusher<P, S>>,
    window_duration: Duration,
    state_retention: TimeDelta,
}

impl<P, S> Processor<P, S>
where
    P: MetricsPublisher + Send + Sync + 'static,
    S: MetricsStore + Send + Sync + 'static,
{
    pub fn new(consumer: EventConsumer, publisher: P, store: S, config: &Config) -> Result<Self> {
        let window = TimeDelta::from_std(config.window_duration)
            .map_err(|e| PipelineError::InvalidConfig(format!("window_duration out of range: {e}")))?;
        let state_retention = TimeDelta::from_std(config.state_retention)
            .map_err(|e| PipelineError::InvalidConfig(format!("state_retention out of range: {e}")))?;

        let pairs = Arc::new(PairStore::new());
        let windows = Arc::new(WindowAggregator::new(window, config.cost));
        let joiner = Joiner::new(pairs.clone(), windows.clone());
        let flusher = Arc::new(WindowFlusher::new(windows, publisher, store));

        Ok(Self {
            consumer,
            pairs,
            joiner,
            flusher,
            window_duration: config.window_duration,
            state_retention,
        })
    }

    /// Consume until cancelled. Starts the window-flush and eviction
    /// housekeepers, then loops on the input streams.
    ///
    /// There is no drain on shutdown: open windows stay behind in memory
    /// and are rebuilt from re-read input on the next run, because offsets
    /// are only ever committed for records that reached the buffers.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        info!(
            window_secs = self.window_duration.as_secs(),
            retention_secs = self.state_retention.num_seconds(),
            "Metrics processor started"
        );

        let mut housekeepers = JoinSet::new();

        {
            let flusher = self.flusher.clone();
            let every = self.window_duration;
            let token = shutdown.clone();
            housekeepers.spawn(async move {
                flusher.run(every, token).await;
            });
        }

        {
            let pairs = self.pairs.clone();
            let every = self.window_duration;
            let retention = self.state_retention;
            let token = shutdown.clone();
            housekeepers.spawn(async move {
                run_eviction(pairs, every, retention, token).await;
            });
        }

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping consumption");
                    break;
                }

                msg = self.consumer.recv() => {
                    match msg {
                        Err(e) => {
                            // Broker-level fetch errors are transient
                            warn!(error = %e, "Fetch error, continuing");
                            counter!("tally_consumer_errors_total").increment(1);
                        }
                        Ok(msg) => {
                            if let Err(e) = self.handle_record(&msg) {
                                warn!(error = %e, topic = msg.topic(), "Skipping record");
                                counter!("tally_records_skipped_total", "topic" => msg.topic().to_string())
                                    .increment(1);
                            }
                            // Commit past handled *and* skipped records
                            if let Err(e) = self.consumer.commit(&msg) {
                                warn!(error = %e, "Failed to commit offset");
                            }
                        }
                    }
                }
            }
        }

        while housekeepers.join_next().await.is_some() {}
        info!("Metrics processor stopped");
        Ok(())
    }

    /// Decode a record and route it by stream identity.
    fn handle_record(&self, msg: &BorrowedMessage<'_>) -> Result<()> {
        let topic = msg.topic();
        let payload = msg
            .payload()
            .ok_or_else(|| PipelineError::EmptyPayload(topic.to_string()))?;

        match topic {
            kafka::TOPIC_REQUESTS => {
                let req: RequestEvent = serde_json::from_slice(payload).map_err(|source| {
                    PipelineError::Malformed {
                        topic: topic.to_string(),
                        source,
                    }
                })?;
                req.validate().map_err(|source| PipelineError::InvalidEvent {
                    topic: topic.to_string(),
                    source,
                })?;
                self.joiner.on_request(req);
            }
            kafka::TOPIC_RESPONSES => {
                let resp: ResponseEvent = serde_json::from_slice(payload).map_err(|source| {
                    PipelineError::Malformed {
                        topic: topic.to_string(),
                        source,
                    }
                })?;
                resp.validate().map_err(|source| PipelineError::InvalidEvent {
                    topic: topic.to_string(),
                    source,
                })?;
                self.joiner.on_response(resp);
            }
            other => return Err(PipelineError::UnknownTopic(other.to_string())),
        }

        Ok(())
    }
}

/// Eviction housekeeper: every window period, drop pair-buffer entries
/// older than the retention cutoff. This is the only bound on join-state
/// memory, so the retention has to be sized against expected ingress.
async fn run_eviction(
    pairs: Arc<PairStore>,
    every: Duration,
    retention: TimeDelta,
    shutdown: CancellationToken,
) {
    info!(interval_secs = every.as_secs(), "Pair-store eviction started");

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!("Shutdown signal received, stopping pair-store eviction");
                break;
            }

            _ = ticker.tick() => {
                let cutoff = Utc::now() - retention;
                let stats = pairs.evict_older_than(cutoff);
                if stats.requests + stats.responses > 0 {
                    debug!(
                        requests = stats.requests,
                        responses = stats.responses,
                        unjoined = stats.unjoined,
                        "Evicted expired pair-store entries"
                    );
                }
                counter!("tally_pair_entries_evicted_total").increment((stats.requests + stats.responses) as u64);
                counter!("tally_unjoined_dropped_total").increment(stats.unjoined as u64);

                let (pending_requests, pending_responses) = pairs.pending();
                gauge!("tally_pending_requests").set(pending_requests as f64);
                gauge!("tally_pending_responses").set(pending_responses as f64);
            }
        }
    }
}
