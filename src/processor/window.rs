//! Tumbling-window aggregation of matched request/response pairs.
//!
//! Windows are keyed by `(tenant, route, model, window_start)` where
//! `window_start` is the *request* event time floored to the window
//! boundary: a request issued within a window is counted in that window no
//! matter how late its response lands.
//!
//! Closing is two-phase. [`WindowAggregator::close_due`] computes a record
//! for every bucket past its grace period but leaves the bucket in place;
//! the flusher calls [`WindowAggregator::remove`] only once both sinks have
//! accepted the record. A bucket that survives a failed flush produces the
//! identical record on the next attempt.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::config::CostRates;
use crate::events::{MetricsRecord, RequestEvent, ResponseEvent};

/// Identity of one aggregation bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub tenant_id: String,
    pub route: String,
    pub model: String,
    pub window_start: DateTime<Utc>,
}

/// Accumulator for a single window. The three sample slots grow in
/// lockstep: one entry per folded pair, so their lengths always equal
/// `requests` and `errors` can never exceed it.
#[derive(Debug, Default, Clone)]
pub struct WindowBucket {
    pub requests: u64,
    pub errors: u64,
    pub latencies: Vec<u64>,
    pub prompt_tokens: Vec<u32>,
    pub completion_tokens: Vec<u32>,
}

/// Owns the window map. Guarded by its own mutex, distinct from the pair
/// store's; no caller holds both at once.
pub struct WindowAggregator {
    window: TimeDelta,
    cost: CostRates,
    buckets: Mutex<HashMap<WindowKey, WindowBucket>>,
}

impl WindowAggregator {
    pub fn new(window: TimeDelta, cost: CostRates) -> Self {
        Self {
            window,
            cost,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Floor an event time to its window boundary.
    pub fn window_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let window_ms = self.window.num_milliseconds();
        let ts_ms = ts.timestamp_millis();
        let floored = ts_ms - ts_ms.rem_euclid(window_ms);
        DateTime::from_timestamp_millis(floored).unwrap_or(ts)
    }

    /// Fold one matched pair into its bucket, creating the bucket on first
    /// use. Ordering between concurrent folds is irrelevant: every
    /// reduction downstream is commutative.
    pub fn fold(&self, req: &RequestEvent, resp: &ResponseEvent) {
        let key = WindowKey {
            tenant_id: req.tenant_id.clone(),
            route: req.route.clone(),
            model: req.model.clone(),
            window_start: self.window_start(req.timestamp),
        };

        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(key).or_default();

        bucket.requests += 1;
        if resp.is_error() {
            bucket.errors += 1;
        }
        bucket.latencies.push(resp.latency_ms);
        bucket.prompt_tokens.push(req.prompt_tokens);
        bucket.completion_tokens.push(resp.completion_tokens);
    }

    /// Compute records for every bucket whose window closed more than one
    /// full window ago (the grace period for late responses). Buckets are
    /// not removed here (emission governs removal), and the result is
    /// sorted by `(window_start, tenant, route, model)` so emission order
    /// is deterministic.
    pub fn close_due(&self, now: DateTime<Utc>) -> Vec<(WindowKey, MetricsRecord)> {
        let watermark = now - self.window;
        let buckets = self.buckets.lock();

        let mut due: Vec<(WindowKey, MetricsRecord)> = buckets
            .iter()
            .filter(|(key, _)| key.window_start + self.window < watermark)
            .map(|(key, bucket)| (key.clone(), self.compute(key, bucket)))
            .collect();

        due.sort_by(|(a, _), (b, _)| {
            (a.window_start, &a.tenant_id, &a.route, &a.model).cmp(&(
                b.window_start,
                &b.tenant_id,
                &b.route,
                &b.model,
            ))
        });
        due
    }

    /// Remove a bucket after its record reached both sinks.
    pub fn remove(&self, key: &WindowKey) -> bool {
        self.buckets.lock().remove(key).is_some()
    }

    /// Number of open buckets.
    pub fn len(&self) -> usize {
        self.buckets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }

    fn compute(&self, key: &WindowKey, bucket: &WindowBucket) -> MetricsRecord {
        let avg_latency_ms = mean_u64(&bucket.latencies);
        let avg_prompt_tokens = mean_u32(&bucket.prompt_tokens);
        let avg_completion_tokens = mean_u32(&bucket.completion_tokens);

        let estimated_cost_usd = (avg_prompt_tokens * self.cost.prompt_usd_per_1k_tokens / 1000.0
            + avg_completion_tokens * self.cost.completion_usd_per_1k_tokens / 1000.0)
            * bucket.requests as f64;

        MetricsRecord {
            tenant_id: key.tenant_id.clone(),
            route: key.route.clone(),
            model: key.model.clone(),
            window_start: key.window_start,
            window_end: key.window_start + self.window,
            requests: bucket.requests,
            errors: bucket.errors,
            avg_latency_ms,
            p95_latency_ms: percentile(&bucket.latencies, 0.95),
            avg_prompt_tokens,
            avg_completion_tokens,
            estimated_cost_usd,
        }
    }
}

fn mean_u64(samples: &[u64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<u64>() as f64 / samples.len() as f64
}

fn mean_u32(samples: &[u32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&s| s as u64).sum::<u64>() as f64 / samples.len() as f64
}

/// Nearest-rank percentile, lower index on ties: sort ascending and take
/// the element at `floor((n - 1) * pct)`. Not linear interpolation; the
/// exact value is part of the contract with downstream consumers.
fn percentile(samples: &[u64], pct: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let index = ((sorted.len() - 1) as f64 * pct).floor() as usize;
    sorted[index] as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn aggregator() -> WindowAggregator {
        WindowAggregator::new(TimeDelta::seconds(60), CostRates::default())
    }

    fn request_at(secs: u32, prompt_tokens: u32) -> RequestEvent {
        RequestEvent {
            request_id: "r1".to_string(),
            tenant_id: "acme".to_string(),
            route: "chat".to_string(),
            model: "gpt-4".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, secs).unwrap(),
            prompt_tokens,
            user_id_hash: None,
            metadata: None,
        }
    }

    fn response(latency_ms: u64, completion_tokens: u32, error: Option<&str>) -> ResponseEvent {
        ResponseEvent {
            request_id: "r1".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 18).unwrap(),
            latency_ms,
            completion_tokens,
            finish_reason: "stop".to_string(),
            error: error.map(|e| e.to_string()),
        }
    }

    #[test]
    fn window_assignment_floors_request_time() {
        let agg = aggregator();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 17).unwrap();
        let start = agg.window_start(ts);

        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(start <= ts);
        assert!(ts < start + TimeDelta::seconds(60));
    }

    #[test]
    fn window_assignment_holds_across_offsets() {
        let agg = aggregator();
        for minute in [0u32, 13, 59] {
            for sec in [0u32, 1, 30, 59] {
                let ts = Utc.with_ymd_and_hms(2024, 1, 1, 6, minute, sec).unwrap();
                let start = agg.window_start(ts);
                assert!(start <= ts);
                assert!(ts < start + TimeDelta::seconds(60));
                assert_eq!(start.timestamp() % 60, 0);
            }
        }
    }

    #[test]
    fn fold_keeps_sample_slots_in_lockstep() {
        let agg = aggregator();
        for i in 0..10u32 {
            let req = request_at(i, 100 + i);
            let resp = response(500 + i as u64, 200, if i % 3 == 0 { Some("rate_limit") } else { None });
            agg.fold(&req, &resp);
        }

        let due = agg.close_due(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
        assert_eq!(due.len(), 1);
        let record = &due[0].1;
        assert_eq!(record.requests, 10);
        assert_eq!(record.errors, 4);
        assert!(record.errors <= record.requests);
    }

    #[test]
    fn p95_is_nearest_rank_on_the_lower_side() {
        let samples: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&samples, 0.95), 95.0);

        // Unsorted input is sorted first
        let mut shuffled = samples.clone();
        shuffled.reverse();
        assert_eq!(percentile(&shuffled, 0.95), 95.0);

        assert_eq!(percentile(&[], 0.95), 0.0);
        assert_eq!(percentile(&[500], 0.95), 500.0);
        // Two samples: floor(1 * 0.95) = 0, the lower one
        assert_eq!(percentile(&[100, 900], 0.95), 100.0);
    }

    #[test]
    fn computed_record_matches_hand_calculation() {
        let agg = aggregator();
        agg.fold(&request_at(17, 100), &response(500, 200, None));

        let due = agg.close_due(Utc.with_ymd_and_hms(2024, 1, 1, 0, 2, 1).unwrap());
        assert_eq!(due.len(), 1);
        let record = &due[0].1;

        assert_eq!(record.window_start, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(record.window_end, Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap());
        assert_eq!(record.requests, 1);
        assert_eq!(record.errors, 0);
        assert_eq!(record.avg_latency_ms, 500.0);
        assert_eq!(record.p95_latency_ms, 500.0);
        assert_eq!(record.avg_prompt_tokens, 100.0);
        assert_eq!(record.avg_completion_tokens, 200.0);
        // 100 * 0.01/1000 + 200 * 0.03/1000 = 0.007
        assert!((record.estimated_cost_usd - 0.007).abs() < 1e-12);
    }

    #[test]
    fn close_due_respects_the_grace_period() {
        let agg = aggregator();
        agg.fold(&request_at(17, 100), &response(500, 200, None));

        // Window [00:00, 00:01); closable only once now - window > window_end
        let at_window_end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        assert!(agg.close_due(at_window_end).is_empty());

        let at_grace_boundary = Utc.with_ymd_and_hms(2024, 1, 1, 0, 2, 0).unwrap();
        assert!(agg.close_due(at_grace_boundary).is_empty());

        let past_grace = Utc.with_ymd_and_hms(2024, 1, 1, 0, 2, 1).unwrap();
        assert_eq!(agg.close_due(past_grace).len(), 1);
    }

    #[test]
    fn close_due_leaves_buckets_and_recomputes_identically() {
        let agg = aggregator();
        agg.fold(&request_at(17, 100), &response(500, 200, None));

        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 2, 1).unwrap();
        let first = agg.close_due(now);
        let second = agg.close_due(now);

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].1, second[0].1);
        // Byte-identical on the wire, not just structurally equal
        assert_eq!(
            serde_json::to_vec(&first[0].1).unwrap(),
            serde_json::to_vec(&second[0].1).unwrap()
        );

        assert!(agg.remove(&first[0].0));
        assert!(agg.close_due(now).is_empty());
        assert!(!agg.remove(&first[0].0));
    }

    #[test]
    fn close_due_orders_deterministically() {
        let agg = aggregator();

        let mut late = request_at(17, 100);
        late.timestamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 10).unwrap();
        late.tenant_id = "aaa".to_string();
        agg.fold(&late, &response(100, 10, None));

        let mut early_b = request_at(17, 100);
        early_b.tenant_id = "bbb".to_string();
        agg.fold(&early_b, &response(100, 10, None));

        let mut early_a = request_at(17, 100);
        early_a.tenant_id = "aaa".to_string();
        agg.fold(&early_a, &response(100, 10, None));

        let due = agg.close_due(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
        let order: Vec<(DateTime<Utc>, String)> = due
            .iter()
            .map(|(key, _)| (key.window_start, key.tenant_id.clone()))
            .collect();

        let w0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let w1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap();
        assert_eq!(
            order,
            vec![
                (w0, "aaa".to_string()),
                (w0, "bbb".to_string()),
                (w1, "aaa".to_string())
            ]
        );
    }

    #[test]
    fn separate_keys_get_separate_buckets() {
        let agg = aggregator();
        let req_a = request_at(10, 100);
        let mut req_b = request_at(10, 100);
        req_b.model = "gpt-4o-mini".to_string();

        agg.fold(&req_a, &response(100, 10, None));
        agg.fold(&req_b, &response(300, 30, None));

        assert_eq!(agg.len(), 2);
        let due = agg.close_due(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
        assert_eq!(due.len(), 2);
        assert!(due.iter().all(|(_, r)| r.requests == 1));
    }
}
