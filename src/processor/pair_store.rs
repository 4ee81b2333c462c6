//! Pending-pair buffer: request and response halves waiting for their
//! partner, aged out strictly by event time.
//!
//! Both halves stay in the buffer after a successful join. Input delivery
//! is at-least-once, so a duplicate of either half may arrive later; if the
//! buffer dropped the held half on match, that duplicate would be re-stored
//! and silently retained until eviction with nothing to join against.
//! Instead, entries live until their event time falls behind the retention
//! cutoff, and a separate folded set records which pairs have already been
//! aggregated so a duplicate arrival can never double-count.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::events::{RequestEvent, ResponseEvent};

/// Counts from one eviction sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Evicted {
    pub requests: usize,
    pub responses: usize,
    /// Halves that aged out without ever being joined. These are dropped
    /// for good; they never reach a window.
    pub unjoined: usize,
}

#[derive(Default)]
struct PairStoreInner {
    requests: HashMap<String, RequestEvent>,
    responses: HashMap<String, ResponseEvent>,
    /// request_id → request event time, for pairs that have been folded.
    folded: HashMap<String, DateTime<Utc>>,
}

/// Process-local join state. Tolerates loss on restart: unflushed pairs are
/// rebuilt from re-read input because offsets are only committed per record.
///
/// One mutex guards both maps and the folded set; no caller ever holds this
/// lock together with the window aggregator's.
#[derive(Default)]
pub struct PairStore {
    inner: Mutex<PairStoreInner>,
}

impl PairStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a request half, overwriting any prior value for the same id.
    pub fn store_request(&self, req: RequestEvent) {
        self.inner.lock().requests.insert(req.request_id.clone(), req);
    }

    /// Insert a response half, overwriting any prior value for the same id.
    pub fn store_response(&self, resp: ResponseEvent) {
        self.inner.lock().responses.insert(resp.request_id.clone(), resp);
    }

    pub fn lookup_request(&self, request_id: &str) -> Option<RequestEvent> {
        self.inner.lock().requests.get(request_id).cloned()
    }

    pub fn lookup_response(&self, request_id: &str) -> Option<ResponseEvent> {
        self.inner.lock().responses.get(request_id).cloned()
    }

    /// Record that the pair for `request_id` has been aggregated. Returns
    /// false if it already was; the caller must not fold again.
    ///
    /// The marker carries the request's event time so it ages out together
    /// with the halves it guards.
    pub fn try_mark_folded(&self, request_id: &str, event_time: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock();
        if inner.folded.contains_key(request_id) {
            return false;
        }
        inner.folded.insert(request_id.to_string(), event_time);
        true
    }

    /// Drop every entry whose event time is strictly before `cutoff`, from
    /// both maps and the folded set. Removal is permanent: an evicted id
    /// only reappears if a fresh arrival stores it again.
    pub fn evict_older_than(&self, cutoff: DateTime<Utc>) -> Evicted {
        let mut inner = self.inner.lock();
        let mut stats = Evicted::default();

        let expired_requests: Vec<String> = inner
            .requests
            .iter()
            .filter(|(_, req)| req.timestamp < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired_requests {
            inner.requests.remove(id);
            if !inner.folded.contains_key(id) {
                stats.unjoined += 1;
            }
        }
        stats.requests = expired_requests.len();

        let expired_responses: Vec<String> = inner
            .responses
            .iter()
            .filter(|(_, resp)| resp.timestamp < cutoff)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired_responses {
            inner.responses.remove(id);
            if !inner.folded.contains_key(id) {
                stats.unjoined += 1;
            }
        }
        stats.responses = expired_responses.len();

        inner.folded.retain(|_, ts| *ts >= cutoff);

        stats
    }

    /// Pending entry counts (requests, responses), for periodic logging.
    pub fn pending(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.requests.len(), inner.responses.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request_at(id: &str, secs: u32) -> RequestEvent {
        RequestEvent {
            request_id: id.to_string(),
            tenant_id: "acme".to_string(),
            route: "chat".to_string(),
            model: "gpt-4".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, secs).unwrap(),
            prompt_tokens: 10,
            user_id_hash: None,
            metadata: None,
        }
    }

    fn response_at(id: &str, secs: u32) -> ResponseEvent {
        ResponseEvent {
            request_id: id.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, secs).unwrap(),
            latency_ms: 100,
            completion_tokens: 20,
            finish_reason: "stop".to_string(),
            error: None,
        }
    }

    #[test]
    fn store_and_lookup_both_halves() {
        let store = PairStore::new();
        store.store_request(request_at("r1", 10));
        store.store_response(response_at("r1", 11));

        assert!(store.lookup_request("r1").is_some());
        assert!(store.lookup_response("r1").is_some());
        assert!(store.lookup_request("r2").is_none());
        assert_eq!(store.pending(), (1, 1));
    }

    #[test]
    fn store_overwrites_prior_value() {
        let store = PairStore::new();
        store.store_request(request_at("r1", 10));
        let mut newer = request_at("r1", 10);
        newer.prompt_tokens = 99;
        store.store_request(newer);

        assert_eq!(store.lookup_request("r1").unwrap().prompt_tokens, 99);
        assert_eq!(store.pending(), (1, 0));
    }

    #[test]
    fn eviction_is_strict_and_permanent() {
        let store = PairStore::new();
        store.store_request(request_at("old", 10));
        store.store_request(request_at("boundary", 30));
        store.store_response(response_at("old", 12));

        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap();
        let stats = store.evict_older_than(cutoff);

        assert_eq!(stats.requests, 1);
        assert_eq!(stats.responses, 1);
        // Entry exactly at the cutoff survives (strictly older only)
        assert!(store.lookup_request("boundary").is_some());
        // Removed entries stay removed until a fresh arrival
        assert!(store.lookup_request("old").is_none());
        assert!(store.lookup_response("old").is_none());
        let stats = store.evict_older_than(cutoff);
        assert_eq!(stats, Evicted::default());
    }

    #[test]
    fn fold_marker_is_claimed_exactly_once() {
        let store = PairStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();

        assert!(store.try_mark_folded("r1", ts));
        assert!(!store.try_mark_folded("r1", ts));
        assert!(store.try_mark_folded("r2", ts));
    }

    #[test]
    fn fold_marker_ages_out_with_its_pair() {
        let store = PairStore::new();
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap();
        store.store_request(request_at("r1", 10));
        assert!(store.try_mark_folded("r1", ts));

        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        store.evict_older_than(cutoff);

        // A fresh arrival after eviction starts a new lifecycle
        assert!(store.try_mark_folded("r1", cutoff));
    }

    #[test]
    fn unjoined_halves_are_counted_on_eviction() {
        let store = PairStore::new();
        store.store_request(request_at("joined", 10));
        store.store_response(response_at("joined", 11));
        store.try_mark_folded("joined", Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 10).unwrap());
        store.store_response(response_at("orphan", 12));

        let cutoff = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        let stats = store.evict_older_than(cutoff);

        assert_eq!(stats.requests, 1);
        assert_eq!(stats.responses, 2);
        // Only the orphan response was never aggregated
        assert_eq!(stats.unjoined, 1);
    }
}
