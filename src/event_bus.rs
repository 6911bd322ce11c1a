// =============================================================================
// Event Bus (C6) — in-process broadcast fan-out with drop-oldest backpressure
// =============================================================================
//
// The teacher has no explicit bus — every processor in `main.rs` is an
// `Arc`-shared struct mutated directly by its own WS read loop. This
// formalizes that implicit fan-out into an explicit topic registry built on
// `tokio::sync::broadcast`, whose native behavior (a slow receiver loses its
// oldest backlog rather than blocking the sender) is exactly the
// drop-oldest policy spec §4.6 calls for.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::warn;

use crate::model::{StreamKind, TradeEvent};

const TOPIC_CAPACITY: usize = 512;
const DEFAULT_MAX_MESSAGES_PER_SECOND: u32 = 1000;
const RATE_WINDOW: Duration = Duration::from_secs(1);

pub struct EventBus {
    global: broadcast::Sender<TradeEvent>,
    by_kind: RwLock<HashMap<StreamKind, broadcast::Sender<TradeEvent>>>,
    by_symbol: RwLock<HashMap<String, broadcast::Sender<TradeEvent>>>,
    recent_publishes: Mutex<VecDeque<Instant>>,
    max_messages_per_second: u32,
    published: AtomicU64,
    rate_limited: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_rate_cap(DEFAULT_MAX_MESSAGES_PER_SECOND)
    }

    pub fn with_rate_cap(max_messages_per_second: u32) -> Self {
        let (global, _) = broadcast::channel(TOPIC_CAPACITY);
        Self {
            global,
            by_kind: RwLock::new(HashMap::new()),
            by_symbol: RwLock::new(HashMap::new()),
            recent_publishes: Mutex::new(VecDeque::new()),
            max_messages_per_second,
            published: AtomicU64::new(0),
            rate_limited: AtomicU64::new(0),
        }
    }

    pub fn subscribe_global(&self) -> broadcast::Receiver<TradeEvent> {
        self.global.subscribe()
    }

    pub fn subscribe_kind(&self, kind: StreamKind) -> broadcast::Receiver<TradeEvent> {
        let mut map = self.by_kind.write();
        map.entry(kind)
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    pub fn subscribe_symbol(&self, symbol: &str) -> broadcast::Receiver<TradeEvent> {
        let mut map = self.by_symbol.write();
        map.entry(symbol.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .subscribe()
    }

    /// Returns `true` when accepted (and published), `false` when discarded
    /// by the per-second rate cap. Never blocks — a full topic drops its
    /// oldest buffered item rather than backpressuring the caller, which is
    /// `broadcast::Sender::send`'s native behavior under lag.
    pub fn publish(&self, event: TradeEvent) -> bool {
        self.publish_at(Instant::now(), event)
    }

    fn publish_at(&self, now: Instant, event: TradeEvent) -> bool {
        {
            let mut recent = self.recent_publishes.lock();
            while let Some(front) = recent.front() {
                if now.duration_since(*front) > RATE_WINDOW {
                    recent.pop_front();
                } else {
                    break;
                }
            }
            if recent.len() as u32 >= self.max_messages_per_second {
                self.rate_limited.fetch_add(1, Ordering::Relaxed);
                warn!(
                    market = %event.market,
                    "event bus rate cap exceeded, discarding publish"
                );
                return false;
            }
            recent.push_back(now);
        }

        // `send` only errors when there are no receivers at all, which is a
        // valid and expected state (no subscriber has attached yet).
        let _ = self.global.send(event.clone());

        if let Some(sender) = self.by_kind.read().get(&event.stream_kind) {
            let _ = sender.send(event.clone());
        }
        if let Some(sender) = self.by_symbol.read().get(&event.market) {
            let _ = sender.send(event.clone());
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    pub fn rate_limited_count(&self) -> u64 {
        self.rate_limited.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawPayload;

    fn sample(market: &str, id: &str) -> TradeEvent {
        TradeEvent {
            market: market.to_string(),
            stream_kind: StreamKind::AggTrade,
            price: 100.0,
            quantity: 1.0,
            total_value: 100.0,
            is_buy: true,
            timestamp_ms: 1,
            event_id: id.to_string(),
            raw: RawPayload::default(),
        }
    }

    #[test]
    fn publish_reaches_global_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe_global();
        assert!(bus.publish(sample("BTCUSDT", "1")));
        let got = rx.try_recv().expect("should have an event");
        assert_eq!(got.event_id, "1");
    }

    #[test]
    fn publish_reaches_kind_and_symbol_subscribers() {
        let bus = EventBus::new();
        let mut kind_rx = bus.subscribe_kind(StreamKind::AggTrade);
        let mut sym_rx = bus.subscribe_symbol("ETHUSDT");
        bus.publish(sample("ETHUSDT", "1"));
        assert!(kind_rx.try_recv().is_ok());
        assert!(sym_rx.try_recv().is_ok());
    }

    #[test]
    fn unsubscribed_symbol_is_silently_dropped() {
        let bus = EventBus::new();
        assert!(bus.publish(sample("XRPUSDT", "1")));
        assert_eq!(bus.published_count(), 1);
    }

    #[test]
    fn rate_cap_discards_excess_within_window() {
        let bus = EventBus::with_rate_cap(2);
        let t0 = Instant::now();
        assert!(bus.publish_at(t0, sample("BTCUSDT", "1")));
        assert!(bus.publish_at(t0, sample("BTCUSDT", "2")));
        assert!(!bus.publish_at(t0, sample("BTCUSDT", "3")));
        assert_eq!(bus.rate_limited_count(), 1);
    }

    #[test]
    fn rate_cap_resets_after_window_elapses() {
        let bus = EventBus::with_rate_cap(1);
        let t0 = Instant::now();
        assert!(bus.publish_at(t0, sample("BTCUSDT", "1")));
        assert!(!bus.publish_at(t0, sample("BTCUSDT", "2")));
        let later = t0 + Duration::from_millis(1100);
        assert!(bus.publish_at(later, sample("BTCUSDT", "3")));
    }
}
