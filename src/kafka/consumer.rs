use rdkafka::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use tracing::info;

use crate::errors::Result;

/// Group consumer over the two input streams.
///
/// New groups reset to the earliest offset so a fresh deployment rebuilds
/// state from the full retained input. Auto-commit is disabled: offsets are
/// stored per record by the dispatch loop after the record has been handled
/// or deliberately skipped.
pub struct EventConsumer {
    inner: StreamConsumer,
}

impl EventConsumer {
    pub fn connect(brokers: &str, group: &str, topics: &[&str]) -> Result<Self> {
        let inner: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .create()?;

        inner.subscribe(topics)?;
        info!(brokers, group, ?topics, "Kafka consumer connected");
        Ok(Self { inner })
    }

    /// Wait for the next record. Cancel-safe: dropping the future mid-wait
    /// loses nothing.
    pub async fn recv(&self) -> Result<BorrowedMessage<'_>> {
        self.inner.recv().await.map_err(Into::into)
    }

    /// Store and asynchronously commit the offset of a handled record.
    pub fn commit(&self, msg: &BorrowedMessage<'_>) -> Result<()> {
        self.inner.commit_message(msg, CommitMode::Async).map_err(Into::into)
    }
}
