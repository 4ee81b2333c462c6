//! Kafka clients for the three streams.
//!
//! Thin wrappers around `rdkafka` so the rest of the pipeline never touches
//! client configuration directly. The consumer runs with manual offset
//! commits (at-least-once); the producer publishes JSON with a bounded
//! delivery deadline.

mod consumer;
mod producer;

pub use consumer::EventConsumer;
pub use producer::EventProducer;

/// Request events published by instrumented applications.
pub const TOPIC_REQUESTS: &str = "llm.requests";
/// Response events, keyed by the same `request_id`.
pub const TOPIC_RESPONSES: &str = "llm.responses";
/// Aggregated per-window metrics emitted by the processor.
pub const TOPIC_METRICS: &str = "llm.metrics";
