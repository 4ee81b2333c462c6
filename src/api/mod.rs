//! HTTP façades: the ingestion front-end and the metrics query view.
//!
//! Both are thin adapters over the pipeline's edges: they share the event
//! schemas and the sinks, nothing else. Each router also serves `/health`
//! and a Prometheus `/metrics` exposition endpoint.

pub mod ingestion;
pub mod metrics;

use std::sync::OnceLock;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde_json::json;
use thiserror::Error;

use crate::events::EventError;
use crate::errors::PipelineError;

/// Errors surfaced by the HTTP façades.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Event failed field validation
    #[error("validation error: {0}")]
    Validation(#[from] EventError),

    /// Bad query parameters
    #[error("{0}")]
    BadRequest(String),

    /// Publishing the event to the input stream failed
    #[error("failed to publish event")]
    Publish(#[source] PipelineError),

    /// Querying the relational store failed
    #[error("failed to fetch metrics")]
    Query(#[source] PipelineError),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Publish(_) | ApiError::Query(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Publish(source) | ApiError::Query(source) => {
                tracing::error!(error = %source, "Internal service error: {}", self);
            }
            ApiError::Validation(_) | ApiError::BadRequest(_) => {
                tracing::debug!("Client error: {}", self);
            }
        }

        let body = Json(json!({ "error": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

/// Liveness endpoint shared by both façades.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

/// Global Prometheus handle - the recorder can only be installed once.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Get or install the Prometheus metrics recorder.
pub fn prometheus_handle() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        })
        .clone()
}

/// Prometheus exposition endpoint.
pub async fn prometheus_metrics() -> String {
    prometheus_handle().render()
}
