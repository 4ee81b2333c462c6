//! Ingestion façade: validating JSON front-end for the two input streams.
//!
//! Accepts per-request telemetry from instrumented applications, validates
//! required fields, and publishes each event to its stream keyed by
//! `request_id` so both halves of a pair land in the same partition.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use metrics::counter;
use serde_json::json;

use crate::api::{ApiError, health, prometheus_metrics};
use crate::events::{RequestEvent, ResponseEvent};
use crate::kafka::{EventProducer, TOPIC_REQUESTS, TOPIC_RESPONSES};

#[derive(Clone)]
pub struct IngestionState {
    producer: Arc<EventProducer>,
}

pub fn router(producer: Arc<EventProducer>) -> Router {
    Router::new()
        .route("/v1/llm/request", post(ingest_request))
        .route("/v1/llm/response", post(ingest_response))
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .with_state(IngestionState { producer })
}

async fn ingest_request(
    State(state): State<IngestionState>,
    Json(event): Json<RequestEvent>,
) -> Result<impl IntoResponse, ApiError> {
    event.validate()?;

    state
        .producer
        .send_json(TOPIC_REQUESTS, &event.request_id, &event)
        .await
        .map_err(ApiError::Publish)?;

    counter!("tally_events_ingested_total", "stream" => "requests").increment(1);
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}

async fn ingest_response(
    State(state): State<IngestionState>,
    Json(event): Json<ResponseEvent>,
) -> Result<impl IntoResponse, ApiError> {
    event.validate()?;

    state
        .producer
        .send_json(TOPIC_RESPONSES, &event.request_id, &event)
        .await
        .map_err(ApiError::Publish)?;

    counter!("tally_events_ingested_total", "stream" => "responses").increment(1);
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}
