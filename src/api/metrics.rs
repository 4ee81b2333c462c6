//! Metrics query façade: read-only view over the relational store.

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::{ApiError, health, prometheus_metrics};
use crate::db::{MetricsDb, MetricsFilter};
use crate::events::MetricsRecord;

const DEFAULT_LIMIT: i64 = 60;
const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct MetricsQuery {
    pub tenant_id: String,
    pub route: Option<String>,
    pub model: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub metrics: Vec<MetricsRecord>,
    pub count: usize,
}

pub fn router(db: MetricsDb) -> Router {
    Router::new()
        .route("/v1/metrics", get(get_metrics))
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .with_state(db)
}

async fn get_metrics(
    State(db): State<MetricsDb>,
    Query(query): Query<MetricsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if query.tenant_id.is_empty() {
        return Err(ApiError::BadRequest("tenant_id is required".to_string()));
    }

    let filter = MetricsFilter {
        tenant_id: query.tenant_id,
        route: query.route.filter(|r| !r.is_empty()),
        model: query.model.filter(|m| !m.is_empty()),
        limit: normalize_limit(query.limit),
    };

    let metrics = db.query_metrics(&filter).await.map_err(ApiError::Query)?;
    let count = metrics.len();
    Ok(Json(MetricsResponse { metrics, count }))
}

/// Clamp the caller-supplied limit to something the store can serve.
fn normalize_limit(limit: Option<i64>) -> i64 {
    match limit {
        Some(l) if l > 0 => l.min(MAX_LIMIT),
        _ => DEFAULT_LIMIT,
    }
}
