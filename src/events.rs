//! Wire-level event types for the two input streams and the emitted
//! metrics record.
//!
//! Both event types are immutable once decoded. Validation is explicit and
//! per-field so the ingestion façade can report exactly what is missing,
//! and the processor can skip malformed records with a precise reason.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A required field was missing or empty on an incoming event.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("missing request_id")]
    MissingRequestId,
    #[error("missing tenant_id")]
    MissingTenantId,
    #[error("missing route")]
    MissingRoute,
    #[error("missing model")]
    MissingModel,
    #[error("missing timestamp")]
    MissingTimestamp,
}

/// A request event emitted by an LLM-powered application when it issues a
/// model call. `request_id` is the join key; `timestamp` is event time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEvent {
    pub request_id: String,
    pub tenant_id: String,
    pub route: String,
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub prompt_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

impl RequestEvent {
    pub fn validate(&self) -> Result<(), EventError> {
        if self.request_id.is_empty() {
            return Err(EventError::MissingRequestId);
        }
        if self.tenant_id.is_empty() {
            return Err(EventError::MissingTenantId);
        }
        if self.route.is_empty() {
            return Err(EventError::MissingRoute);
        }
        if self.model.is_empty() {
            return Err(EventError::MissingModel);
        }
        if self.timestamp == DateTime::<Utc>::UNIX_EPOCH {
            return Err(EventError::MissingTimestamp);
        }
        Ok(())
    }
}

/// The response half of a request/response pair. An absent or empty `error`
/// means the call succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: u64,
    pub completion_tokens: u32,
    pub finish_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseEvent {
    pub fn validate(&self) -> Result<(), EventError> {
        if self.request_id.is_empty() {
            return Err(EventError::MissingRequestId);
        }
        if self.timestamp == DateTime::<Utc>::UNIX_EPOCH {
            return Err(EventError::MissingTimestamp);
        }
        Ok(())
    }

    /// Whether this response represents a failed call.
    pub fn is_error(&self) -> bool {
        self.error.as_deref().is_some_and(|e| !e.is_empty())
    }
}

/// Aggregated metrics for one closed window, keyed by
/// `(tenant_id, route, model, window_start)` at the relational sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub tenant_id: String,
    pub route: String,
    pub model: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub requests: u64,
    pub errors: u64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
    pub avg_prompt_tokens: f64,
    pub avg_completion_tokens: f64,
    pub estimated_cost_usd: f64,
}

impl MetricsRecord {
    /// Key used on the output stream. Log-compaction friendly: re-emitting
    /// the same window overwrites rather than duplicates for keyed readers.
    pub fn stream_key(&self) -> String {
        format!("{}|{}|{}", self.tenant_id, self.route, self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn valid_request() -> RequestEvent {
        RequestEvent {
            request_id: "req-123".to_string(),
            tenant_id: "tenant-1".to_string(),
            route: "chat_support".to_string(),
            model: "gpt-4".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 17).unwrap(),
            prompt_tokens: 100,
            user_id_hash: None,
            metadata: None,
        }
    }

    fn valid_response() -> ResponseEvent {
        ResponseEvent {
            request_id: "req-123".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 18).unwrap(),
            latency_ms: 500,
            completion_tokens: 200,
            finish_reason: "stop".to_string(),
            error: None,
        }
    }

    #[test]
    fn request_validation_catches_each_missing_field() {
        assert_eq!(valid_request().validate(), Ok(()));

        let mut req = valid_request();
        req.request_id.clear();
        assert_eq!(req.validate(), Err(EventError::MissingRequestId));

        let mut req = valid_request();
        req.tenant_id.clear();
        assert_eq!(req.validate(), Err(EventError::MissingTenantId));

        let mut req = valid_request();
        req.route.clear();
        assert_eq!(req.validate(), Err(EventError::MissingRoute));

        let mut req = valid_request();
        req.model.clear();
        assert_eq!(req.validate(), Err(EventError::MissingModel));

        let mut req = valid_request();
        req.timestamp = DateTime::<Utc>::UNIX_EPOCH;
        assert_eq!(req.validate(), Err(EventError::MissingTimestamp));
    }

    #[test]
    fn response_validation() {
        assert_eq!(valid_response().validate(), Ok(()));

        let mut resp = valid_response();
        resp.request_id.clear();
        assert_eq!(resp.validate(), Err(EventError::MissingRequestId));

        let mut resp = valid_response();
        resp.timestamp = DateTime::<Utc>::UNIX_EPOCH;
        assert_eq!(resp.validate(), Err(EventError::MissingTimestamp));
    }

    #[test]
    fn empty_error_string_is_success() {
        let mut resp = valid_response();
        assert!(!resp.is_error());

        resp.error = Some(String::new());
        assert!(!resp.is_error());

        resp.error = Some("rate_limit".to_string());
        assert!(resp.is_error());
    }

    #[test]
    fn response_decodes_without_optional_error() {
        let resp: ResponseEvent = serde_json::from_str(
            r#"{"request_id":"r1","timestamp":"2024-01-01T00:00:18Z","latency_ms":500,"completion_tokens":200,"finish_reason":"stop"}"#,
        )
        .unwrap();
        assert_eq!(resp.error, None);
        assert!(!resp.is_error());
    }

    #[test]
    fn negative_token_counts_are_rejected_at_decode() {
        let err = serde_json::from_str::<ResponseEvent>(
            r#"{"request_id":"r1","timestamp":"2024-01-01T00:00:18Z","latency_ms":-1,"completion_tokens":200,"finish_reason":"stop"}"#,
        );
        assert!(err.is_err());
    }
}
