// =============================================================================
// Aggregator (C7) — per-(market, stream_kind) merge window, timer-driven flush
// =============================================================================
//
// Generalizes `market_data/candle_buffer.rs::CandleBuffer::update`'s
// replace-in-place-or-append ring logic: there, an in-progress candle is
// replaced until it closes; here, a pending event is merged or replaced
// until its window elapses, at which point it is emitted and swapped for
// the new one.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::model::{StreamKind, TradeEvent};

#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    /// AggTrade merge window (spec §4.7 default 500 ms).
    pub merge_window_ms: i64,
    /// Ticker throttle micro-window (spec §4.7 default 1 s).
    pub ticker_window_ms: i64,
    /// Volume-weighted pricing for merged AggTrades; `false` keeps the
    /// latest constituent's price instead.
    pub weighted_pricing: bool,
    /// Whether BookTicker/Depth5 replacements emit immediately rather than
    /// waiting for the next flush (spec §4.7: "process immediately" knob).
    pub replace_immediate: bool,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            merge_window_ms: 500,
            ticker_window_ms: 1000,
            weighted_pricing: true,
            replace_immediate: false,
        }
    }
}

type Key = (String, StreamKind);

pub struct Aggregator {
    config: AggregatorConfig,
    pending: RwLock<HashMap<Key, TradeEvent>>,
    processed: AtomicU64,
    merged: AtomicU64,
    flushed: AtomicU64,
    disposed: std::sync::atomic::AtomicBool,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            pending: RwLock::new(HashMap::new()),
            processed: AtomicU64::new(0),
            merged: AtomicU64::new(0),
            flushed: AtomicU64::new(0),
            disposed: std::sync::atomic::AtomicBool::new(false),
        }
    }

    fn key(event: &TradeEvent) -> Key {
        (event.market.clone(), event.stream_kind)
    }

    fn merge_agg_trade(&self, old: &TradeEvent, new: &TradeEvent) -> TradeEvent {
        let quantity = old.quantity + new.quantity;
        let total_value = old.total_value + new.total_value;
        let price = if self.config.weighted_pricing && quantity > 0.0 {
            total_value / quantity
        } else {
            new.price
        };
        TradeEvent {
            market: new.market.clone(),
            stream_kind: new.stream_kind,
            price,
            quantity,
            total_value,
            is_buy: new.is_buy,
            timestamp_ms: new.timestamp_ms,
            event_id: new.event_id.clone(),
            raw: new.raw.clone(),
        }
    }

    /// Feed a normalized event into the aggregator. Returns every event that
    /// should be emitted immediately as a side effect of this call — zero,
    /// one (first-per-key, or a bare replacement), or two (an
    /// outside-window emit of the superseded pending value followed by the
    /// new one).
    pub fn ingest(&self, event: TradeEvent) -> Vec<TradeEvent> {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let key = Self::key(&event);
        let mut pending = self.pending.write();

        let Some(existing) = pending.get(&key).cloned() else {
            // First event per key: emit immediately and seed pending.
            pending.insert(key, event.clone());
            return vec![event];
        };

        match event.stream_kind {
            StreamKind::AggTrade => {
                let within_window =
                    (event.timestamp_ms - existing.timestamp_ms).abs() <= self.config.merge_window_ms;
                if within_window {
                    let merged = self.merge_agg_trade(&existing, &event);
                    pending.insert(key, merged);
                    self.merged.fetch_add(1, Ordering::Relaxed);
                    vec![]
                } else {
                    pending.insert(key, event.clone());
                    vec![existing, event]
                }
            }
            StreamKind::Ticker => {
                let within_window =
                    (event.timestamp_ms - existing.timestamp_ms).abs() <= self.config.ticker_window_ms;
                if within_window {
                    pending.insert(key, event);
                    vec![]
                } else {
                    pending.insert(key, event.clone());
                    vec![existing, event]
                }
            }
            StreamKind::BookTicker | StreamKind::Depth5 => {
                pending.insert(key, event.clone());
                if self.config.replace_immediate {
                    vec![event]
                } else {
                    vec![]
                }
            }
        }
    }

    /// Drain a consistent snapshot of all pending entries without removing
    /// them — called by the periodic flush timer (default 100 ms).
    pub fn flush(&self) -> Vec<TradeEvent> {
        let pending = self.pending.read();
        let snapshot: Vec<TradeEvent> = pending.values().cloned().collect();
        self.flushed.fetch_add(snapshot.len() as u64, Ordering::Relaxed);
        debug!(count = snapshot.len(), "aggregator flush");
        snapshot
    }

    /// Terminal flush: drains and clears every pending entry. Idempotent.
    pub fn dispose(&self) -> Vec<TradeEvent> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return vec![];
        }
        let mut pending = self.pending.write();
        let drained: Vec<TradeEvent> = pending.drain().map(|(_, v)| v).collect();
        self.flushed.fetch_add(drained.len() as u64, Ordering::Relaxed);
        drained
    }

    pub fn processed_count(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn merged_count(&self) -> u64 {
        self.merged.load(Ordering::Relaxed)
    }

    pub fn flushed_count(&self) -> u64 {
        self.flushed.load(Ordering::Relaxed)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawPayload;

    fn agg_trade(market: &str, price: f64, quantity: f64, t: i64, id: &str) -> TradeEvent {
        TradeEvent {
            market: market.to_string(),
            stream_kind: StreamKind::AggTrade,
            price,
            quantity,
            total_value: price * quantity,
            is_buy: true,
            timestamp_ms: t,
            event_id: id.to_string(),
            raw: RawPayload::default(),
        }
    }

    #[test]
    fn first_event_emits_immediately() {
        let agg = Aggregator::new(AggregatorConfig::default());
        let out = agg.ingest(agg_trade("BTCUSDT", 100.0, 1.0, 1000, "a1"));
        assert_eq!(out.len(), 1);
        assert_eq!(agg.pending_count(), 1);
    }

    #[test]
    fn scenario_1_merge_within_window_is_volume_weighted() {
        let agg = Aggregator::new(AggregatorConfig::default());
        agg.ingest(agg_trade("BTCUSDT", 100.0, 1.0, 1000, "a1"));
        let out = agg.ingest(agg_trade("BTCUSDT", 110.0, 2.0, 1300, "a2"));
        assert!(out.is_empty(), "merge within window emits nothing immediately");

        let flushed = agg.flush();
        assert_eq!(flushed.len(), 1);
        let m = &flushed[0];
        assert!((m.quantity - 3.0).abs() < 1e-9);
        assert!((m.total_value - 320.0).abs() < 1e-9);
        assert!((m.price - (320.0 / 3.0)).abs() < 1e-9);
        assert_eq!(m.timestamp_ms, 1300);
    }

    #[test]
    fn flush_after_idle_period_re_emits_same_pending_value() {
        let agg = Aggregator::new(AggregatorConfig::default());
        agg.ingest(agg_trade("BTCUSDT", 100.0, 1.0, 1000, "a1"));
        agg.ingest(agg_trade("BTCUSDT", 110.0, 2.0, 1300, "a2"));
        let first_flush = agg.flush();
        let second_flush = agg.flush();
        assert_eq!(first_flush[0].total_value, second_flush[0].total_value);
        assert_eq!(first_flush[0].quantity, second_flush[0].quantity);
    }

    #[test]
    fn outside_window_emits_old_then_new_and_replaces_pending() {
        let agg = Aggregator::new(AggregatorConfig::default());
        agg.ingest(agg_trade("BTCUSDT", 100.0, 1.0, 1000, "a1"));
        let out = agg.ingest(agg_trade("BTCUSDT", 200.0, 1.0, 2000, "a2"));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].event_id, "a1");
        assert_eq!(out[1].event_id, "a2");
        assert_eq!(agg.pending_count(), 1);
    }

    #[test]
    fn unweighted_pricing_keeps_latest_price() {
        let mut cfg = AggregatorConfig::default();
        cfg.weighted_pricing = false;
        let agg = Aggregator::new(cfg);
        agg.ingest(agg_trade("BTCUSDT", 100.0, 1.0, 1000, "a1"));
        agg.ingest(agg_trade("BTCUSDT", 150.0, 1.0, 1200, "a2"));
        let flushed = agg.flush();
        assert!((flushed[0].price - 150.0).abs() < 1e-9);
    }

    #[test]
    fn dispose_drains_and_is_idempotent() {
        let agg = Aggregator::new(AggregatorConfig::default());
        agg.ingest(agg_trade("BTCUSDT", 100.0, 1.0, 1000, "a1"));
        let drained = agg.dispose();
        assert_eq!(drained.len(), 1);
        assert_eq!(agg.pending_count(), 0);
        assert_eq!(agg.dispose().len(), 0);
    }

    #[test]
    fn book_ticker_replace_only_never_merges() {
        let agg = Aggregator::new(AggregatorConfig::default());
        let e1 = TradeEvent {
            market: "BTCUSDT".into(),
            stream_kind: StreamKind::BookTicker,
            price: 100.0,
            quantity: 1.0,
            total_value: 100.0,
            is_buy: true,
            timestamp_ms: 1000,
            event_id: "b1".into(),
            raw: RawPayload::default(),
        };
        let mut e2 = e1.clone();
        e2.price = 101.0;
        e2.event_id = "b2".into();

        agg.ingest(e1);
        let out = agg.ingest(e2);
        assert!(out.is_empty(), "replace_immediate defaults to false");
        let flushed = agg.flush();
        assert!((flushed[0].price - 101.0).abs() < 1e-9);
        assert_eq!(agg.merged_count(), 0);
    }
}
