// =============================================================================
// Repository (C8) — de-dup cache, filter caches, batched publication
// =============================================================================
//
// Grounded on `app_state.rs`'s pattern of a single owner struct holding
// `parking_lot::RwLock`-guarded bounded collections plus an atomic version
// counter, and `market_data::CandleBuffer`'s trim-on-bound discipline
// applied here to the de-dup set and per-`FilterClass` caches.
// =============================================================================

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;

use crate::aggregator::Aggregator;
use crate::model::{FilterClass, TradeEvent};

pub const MAX_SEEN_IDS: usize = 5000;
pub const MAX_PER_FILTER: usize = 100;
/// Fraction of the de-dup set evicted in one shot once `MAX_SEEN_IDS` is
/// exceeded (spec §4.8: "eviction removes the oldest 30% in one shot").
const EVICTION_FRACTION: f64 = 0.30;

/// Receives every normalized event matching its kind. Implemented by the
/// analytics engine (C9); kept as a trait here so the repository does not
/// depend on the analytics module's concrete type.
pub trait AnalyticsSink: Send + Sync {
    fn ingest(&self, event: &TradeEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Published,
    Duplicate,
    Invalid,
}

struct SeenIds {
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl SeenIds {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            set: HashSet::new(),
        }
    }

    fn contains(&self, id: &str) -> bool {
        self.set.contains(id)
    }

    fn insert(&mut self, id: String) {
        if self.set.insert(id.clone()) {
            self.order.push_back(id);
        }
        if self.order.len() > MAX_SEEN_IDS {
            let evict_count = ((self.order.len() as f64) * EVICTION_FRACTION).ceil() as usize;
            for _ in 0..evict_count {
                if let Some(oldest) = self.order.pop_front() {
                    self.set.remove(&oldest);
                } else {
                    break;
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

pub struct Repository {
    seen: RwLock<SeenIds>,
    filter_caches: RwLock<HashMap<FilterClass, VecDeque<TradeEvent>>>,
    filter_watchers: RwLock<HashMap<FilterClass, watch::Sender<Vec<TradeEvent>>>>,
    active_threshold: RwLock<FilterClass>,
    active_markets: RwLock<HashSet<String>>,
    aggregator: Arc<Aggregator>,
    analytics: RwLock<Option<Arc<dyn AnalyticsSink>>>,
    version: AtomicU64,
    processed: AtomicU64,
    duplicates: AtomicU64,
    invalid: AtomicU64,
}

impl Repository {
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self {
            seen: RwLock::new(SeenIds::new()),
            filter_caches: RwLock::new(HashMap::new()),
            filter_watchers: RwLock::new(HashMap::new()),
            active_threshold: RwLock::new(FilterClass::T30k),
            active_markets: RwLock::new(HashSet::new()),
            aggregator,
            analytics: RwLock::new(None),
            version: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            invalid: AtomicU64::new(0),
        }
    }

    pub fn set_analytics_sink(&self, sink: Arc<dyn AnalyticsSink>) {
        *self.analytics.write() = Some(sink);
    }

    /// Accept one event from the bus: validate, de-duplicate, file into
    /// matching filter caches, and fan out to the aggregator and analytics.
    pub fn ingest(&self, event: TradeEvent) -> IngestOutcome {
        self.processed.fetch_add(1, Ordering::Relaxed);

        if event.validate().is_err() {
            self.invalid.fetch_add(1, Ordering::Relaxed);
            return IngestOutcome::Invalid;
        }

        {
            let mut seen = self.seen.write();
            if seen.contains(&event.event_id) {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                return IngestOutcome::Duplicate;
            }
            seen.insert(event.event_id.clone());
        }

        if matches!(event.stream_kind, crate::model::StreamKind::AggTrade) {
            let mut caches = self.filter_caches.write();
            for class in FilterClass::satisfied_by(event.total_value) {
                let list = caches.entry(class).or_insert_with(VecDeque::new);
                list.push_front(event.clone());
                list.truncate(MAX_PER_FILTER);
            }
        }

        self.aggregator.ingest(event.clone());

        if let Some(sink) = self.analytics.read().as_ref() {
            sink.ingest(&event);
        }

        self.version.fetch_add(1, Ordering::Relaxed);
        IngestOutcome::Published
    }

    /// Ensure the master stream is active for `markets` at `threshold`,
    /// and return a receiver of batched snapshots for that class.
    pub fn watch_filtered_trades(
        &self,
        threshold: FilterClass,
        markets: HashSet<String>,
    ) -> watch::Receiver<Vec<TradeEvent>> {
        *self.active_threshold.write() = threshold;
        *self.active_markets.write() = markets;

        let mut watchers = self.filter_watchers.write();
        let sender = watchers
            .entry(threshold)
            .or_insert_with(|| watch::channel(Vec::new()).0);
        let rx = sender.subscribe();
        drop(watchers);
        self.publish_batch();
        rx
    }

    /// Aggregator's merged/replaced output, pulled on demand (e.g. by a
    /// periodic forwarding task).
    pub fn watch_aggregated_trades(&self) -> Vec<TradeEvent> {
        self.aggregator.flush()
    }

    /// Change the active filter class and publish immediately.
    pub fn update_threshold(&self, threshold: FilterClass) {
        *self.active_threshold.write() = threshold;
        self.publish_batch();
    }

    /// Push a fresh snapshot of the active threshold's cache (filtered to
    /// the active market set, when non-empty) to its watch topic. Called by
    /// the coalescing timer (default 100 ms) and immediately on
    /// `update_threshold`/`watch_filtered_trades`.
    pub fn publish_batch(&self) {
        let threshold = *self.active_threshold.read();
        let markets = self.active_markets.read();
        let caches = self.filter_caches.read();

        let snapshot: Vec<TradeEvent> = match caches.get(&threshold) {
            Some(list) => {
                if markets.is_empty() {
                    list.iter().cloned().collect()
                } else {
                    list.iter().filter(|e| markets.contains(&e.market)).cloned().collect()
                }
            }
            None => Vec::new(),
        };
        drop(caches);
        drop(markets);

        let watchers = self.filter_watchers.read();
        if let Some(sender) = watchers.get(&threshold) {
            debug!(?threshold, count = snapshot.len(), "publishing filtered trades batch");
            let _ = sender.send(snapshot);
        }
    }

    pub fn filter_cache_snapshot(&self, class: FilterClass) -> Vec<TradeEvent> {
        self.filter_caches
            .read()
            .get(&class)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn seen_ids_len(&self) -> usize {
        self.seen.read().len()
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn duplicate_count(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    pub fn invalid_count(&self) -> u64 {
        self.invalid.load(Ordering::Relaxed)
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorConfig;
    use crate::model::{RawPayload, StreamKind};

    fn agg_trade(market: &str, total_value: f64, id: &str) -> TradeEvent {
        TradeEvent {
            market: market.to_string(),
            stream_kind: StreamKind::AggTrade,
            price: 100.0,
            quantity: total_value / 100.0,
            total_value,
            is_buy: true,
            timestamp_ms: 1000,
            event_id: id.to_string(),
            raw: RawPayload::default(),
        }
    }

    fn repo() -> Repository {
        Repository::new(Arc::new(Aggregator::new(AggregatorConfig::default())))
    }

    #[test]
    fn invalid_event_is_rejected_and_counted() {
        let repo = repo();
        let mut e = agg_trade("BTCUSDT", 1.0, "x");
        e.price = -1.0;
        assert_eq!(repo.ingest(e), IngestOutcome::Invalid);
        assert_eq!(repo.invalid_count(), 1);
        assert_eq!(repo.processed_count(), 1);
    }

    #[test]
    fn scenario_3_dedup_counts_processed_twice_but_inserts_once() {
        let repo = repo();
        let e = agg_trade("BTCUSDT", 200_000.0, "dup1");
        assert_eq!(repo.ingest(e.clone()), IngestOutcome::Published);
        assert_eq!(repo.ingest(e), IngestOutcome::Duplicate);
        assert_eq!(repo.processed_count(), 2);
        assert_eq!(repo.duplicate_count(), 1);
        assert_eq!(repo.filter_cache_snapshot(FilterClass::T100k).len(), 1);
    }

    #[test]
    fn scenario_2_filter_cut_retains_only_qualifying_events_newest_first() {
        let repo = repo();
        for (tv, id) in [(50_000.0, "a"), (99_999.99, "b"), (100_000.0, "c"), (150_000.0, "d")] {
            repo.ingest(agg_trade("BTCUSDT", tv, id));
        }
        let cache = repo.filter_cache_snapshot(FilterClass::T100k);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache[0].event_id, "d");
        assert_eq!(cache[1].event_id, "c");
    }

    #[test]
    fn filter_cache_bounded_to_max_per_filter() {
        let repo = repo();
        for i in 0..(MAX_PER_FILTER + 10) {
            repo.ingest(agg_trade("BTCUSDT", 40_000.0, &format!("id{i}")));
        }
        assert_eq!(repo.filter_cache_snapshot(FilterClass::T30k).len(), MAX_PER_FILTER);
    }

    #[test]
    fn seen_ids_bounded_and_evicts_30_percent_over_limit() {
        let repo = repo();
        for i in 0..(MAX_SEEN_IDS + 1) {
            repo.ingest(agg_trade("BTCUSDT", 1.0, &format!("id{i}")));
        }
        assert!(repo.seen_ids_len() <= MAX_SEEN_IDS);
        assert!(repo.seen_ids_len() < MAX_SEEN_IDS); // eviction actually trimmed below the bound
    }

    #[test]
    fn ticker_never_enters_filter_caches() {
        let repo = repo();
        let e = TradeEvent {
            market: "BTCUSDT".into(),
            stream_kind: StreamKind::Ticker,
            price: 100.0,
            quantity: 1.0,
            total_value: 5_000_000.0,
            is_buy: true,
            timestamp_ms: 1,
            event_id: "t1".into(),
            raw: RawPayload::default(),
        };
        repo.ingest(e);
        assert!(repo.filter_cache_snapshot(FilterClass::T1m).is_empty());
    }

    #[test]
    fn update_threshold_publishes_immediately_to_watcher() {
        let repo = repo();
        repo.ingest(agg_trade("BTCUSDT", 200_000.0, "a"));
        let rx = repo.watch_filtered_trades(FilterClass::T100k, HashSet::new());
        repo.update_threshold(FilterClass::T100k);
        assert_eq!(rx.borrow().len(), 1);
    }
}
