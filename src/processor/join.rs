//! Join coordination between the pair store and the window aggregator.
//!
//! Arrival order is not guaranteed: a response can land before its request.
//! The join is therefore attempted from both directions; each arrival
//! stores its own half, then looks for the partner. The pair store's folded
//! set makes the fold itself happen at most once per retention window,
//! which is what keeps duplicate deliveries from double-counting.

use std::sync::Arc;

use metrics::counter;
use tracing::trace;

use crate::events::{RequestEvent, ResponseEvent};
use crate::processor::pair_store::PairStore;
use crate::processor::window::WindowAggregator;

pub struct Joiner {
    pairs: Arc<PairStore>,
    windows: Arc<WindowAggregator>,
}

impl Joiner {
    pub fn new(pairs: Arc<PairStore>, windows: Arc<WindowAggregator>) -> Self {
        Self { pairs, windows }
    }

    /// Handle a decoded request event: buffer it, then fold if its response
    /// already arrived.
    pub fn on_request(&self, req: RequestEvent) {
        counter!("tally_events_consumed_total", "stream" => "requests").increment(1);
        self.pairs.store_request(req.clone());
        if let Some(resp) = self.pairs.lookup_response(&req.request_id) {
            self.fold_once(&req, &resp);
        }
    }

    /// Handle a decoded response event: buffer it, then fold if its request
    /// is held. If the request was already evicted the response just ages
    /// out; it is never aggregated on its own.
    pub fn on_response(&self, resp: ResponseEvent) {
        counter!("tally_events_consumed_total", "stream" => "responses").increment(1);
        self.pairs.store_response(resp.clone());
        if let Some(req) = self.pairs.lookup_request(&resp.request_id) {
            self.fold_once(&req, &resp);
        }
    }

    fn fold_once(&self, req: &RequestEvent, resp: &ResponseEvent) {
        if self.pairs.try_mark_folded(&req.request_id, req.timestamp) {
            self.windows.fold(req, resp);
            counter!("tally_pairs_joined_total").increment(1);
        } else {
            trace!(request_id = %req.request_id, "Pair already aggregated, ignoring duplicate");
            counter!("tally_duplicate_folds_total").increment(1);
        }
    }
}
