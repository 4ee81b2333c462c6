//! Relational sink: Postgres persistence and query access for closed-window
//! metrics.
//!
//! Writes are upserts keyed on `(tenant_id, route, model, window_start)`, so
//! re-emitting a window after a partial flush replaces the row instead of
//! duplicating it. Queries are runtime-bound so the crate builds without a
//! live database.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::info;

use crate::errors::Result;
use crate::events::MetricsRecord;

/// Schema migrations, embedded at compile time.
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Filters for the metrics query API. `tenant_id` is mandatory; `route` and
/// `model` narrow the result when present.
#[derive(Debug, Clone)]
pub struct MetricsFilter {
    pub tenant_id: String,
    pub route: Option<String>,
    pub model: Option<String>,
    pub limit: i64,
}

/// Row shape of the `llm_metrics` table.
#[derive(FromRow)]
struct MetricsRow {
    tenant_id: String,
    route: String,
    model: String,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
    requests: i64,
    errors: i64,
    avg_latency_ms: f64,
    p95_latency_ms: f64,
    avg_prompt_tokens: f64,
    avg_completion_tokens: f64,
    estimated_cost_usd: f64,
}

impl From<MetricsRow> for MetricsRecord {
    fn from(row: MetricsRow) -> Self {
        MetricsRecord {
            tenant_id: row.tenant_id,
            route: row.route,
            model: row.model,
            window_start: row.window_start,
            window_end: row.window_end,
            requests: row.requests.max(0) as u64,
            errors: row.errors.max(0) as u64,
            avg_latency_ms: row.avg_latency_ms,
            p95_latency_ms: row.p95_latency_ms,
            avg_prompt_tokens: row.avg_prompt_tokens,
            avg_completion_tokens: row.avg_completion_tokens,
            estimated_cost_usd: row.estimated_cost_usd,
        }
    }
}

/// Postgres-backed metrics store shared by the processor and the query API.
#[derive(Clone)]
pub struct MetricsDb {
    pool: PgPool,
}

impl MetricsDb {
    pub async fn connect(dsn: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(25)
            .min_connections(5)
            .max_lifetime(Duration::from_secs(300))
            .acquire_timeout(Duration::from_secs(5))
            .connect(dsn)
            .await?;

        info!("Connected to Postgres");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations. Called once at processor startup.
    pub async fn run_migrations(&self) -> Result<()> {
        migrator().run(&self.pool).await?;
        Ok(())
    }

    /// Insert or replace the metrics row for a window.
    pub async fn upsert_metrics(&self, record: &MetricsRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO llm_metrics (
                tenant_id, route, model, window_start, window_end,
                requests, errors, avg_latency_ms, p95_latency_ms,
                avg_prompt_tokens, avg_completion_tokens, estimated_cost_usd
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (tenant_id, route, model, window_start)
            DO UPDATE SET
                window_end = EXCLUDED.window_end,
                requests = EXCLUDED.requests,
                errors = EXCLUDED.errors,
                avg_latency_ms = EXCLUDED.avg_latency_ms,
                p95_latency_ms = EXCLUDED.p95_latency_ms,
                avg_prompt_tokens = EXCLUDED.avg_prompt_tokens,
                avg_completion_tokens = EXCLUDED.avg_completion_tokens,
                estimated_cost_usd = EXCLUDED.estimated_cost_usd
            "#,
        )
        .bind(&record.tenant_id)
        .bind(&record.route)
        .bind(&record.model)
        .bind(record.window_start)
        .bind(record.window_end)
        .bind(record.requests as i64)
        .bind(record.errors as i64)
        .bind(record.avg_latency_ms)
        .bind(record.p95_latency_ms)
        .bind(record.avg_prompt_tokens)
        .bind(record.avg_completion_tokens)
        .bind(record.estimated_cost_usd)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch metrics for a tenant, newest window first.
    pub async fn query_metrics(&self, filter: &MetricsFilter) -> Result<Vec<MetricsRecord>> {
        let rows: Vec<MetricsRow> = sqlx::query_as(
            r#"
            SELECT tenant_id, route, model, window_start, window_end,
                   requests, errors, avg_latency_ms, p95_latency_ms,
                   avg_prompt_tokens, avg_completion_tokens, estimated_cost_usd
            FROM llm_metrics
            WHERE tenant_id = $1
              AND ($2::text IS NULL OR route = $2)
              AND ($3::text IS NULL OR model = $3)
            ORDER BY window_start DESC
            LIMIT $4
            "#,
        )
        .bind(&filter.tenant_id)
        .bind(filter.route.as_deref())
        .bind(filter.model.as_deref())
        .bind(filter.limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
