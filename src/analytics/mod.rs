// =============================================================================
// Analytics Engine (C9) — per-symbol momentum/trend/liquidity/flow caches
// =============================================================================
//
// Grounded on `indicators/*.rs`'s pure-calculation style (each submodule
// here mirrors that shape) plus `market_data/trade_stream.rs`'s running
// per-symbol statistics (`cvd`, `buy_volume_ratio`) for the stateful ring
// bookkeeping that feeds those pure functions.
// =============================================================================

pub mod flow;
pub mod liquidity;
pub mod momentum;
pub mod predictor;
pub mod trend;

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use tracing::debug;

use crate::model::{QuantAnalysis, StreamKind, TradeEvent};
use crate::repository::AnalyticsSink;

const FLOW_HISTORY: usize = 10;

#[derive(Default)]
struct SymbolState {
    momentum_window: VecDeque<bool>,
    trend_history: VecDeque<f64>,
    flow_history: VecDeque<f64>,
    last_trade_price: Option<f64>,
    analysis: QuantAnalysis,
}

/// Owns every per-symbol analytic cache. Implements [`AnalyticsSink`] so the
/// repository (C8) can feed it without depending on this module's concrete
/// type.
pub struct Analytics {
    states: RwLock<HashMap<String, SymbolState>>,
}

impl Analytics {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    fn with_state<R>(&self, symbol: &str, f: impl FnOnce(&mut SymbolState) -> R) -> R {
        let mut states = self.states.write();
        let state = states.entry(symbol.to_string()).or_insert_with(|| SymbolState {
            analysis: QuantAnalysis {
                symbol: symbol.to_string(),
                ..Default::default()
            },
            ..Default::default()
        });
        f(state)
    }

    fn handle_agg_trade(&self, event: &TradeEvent) {
        self.with_state(&event.market, |state| {
            state.momentum_window.push_back(event.is_buy);
            while state.momentum_window.len() > momentum::WINDOW_SIZE {
                state.momentum_window.pop_front();
            }
            state.last_trade_price = Some(event.price);
            let window: Vec<bool> = state.momentum_window.iter().copied().collect();
            state.analysis.momentum = momentum::compute(&window, event.timestamp_ms);
        });
    }

    fn handle_ticker(&self, event: &TradeEvent) {
        self.with_state(&event.market, |state| {
            state.trend_history.push_back(event.price);
            while state.trend_history.len() > trend::HISTORY_LEN {
                state.trend_history.pop_front();
            }
            let t = trend::compute(
                event.raw.change_pct_24h.unwrap_or(0.0),
                event.raw.high_24h,
                event.raw.low_24h,
                event.price,
                event.timestamp_ms,
            );
            state.analysis.trend = Some(t);
        });
    }

    fn handle_book_ticker(&self, event: &TradeEvent) {
        self.with_state(&event.market, |state| {
            let (bid, ask) = (
                event.raw.best_bid.unwrap_or(event.price),
                event.raw.best_ask.unwrap_or(event.price),
            );
            let l = liquidity::compute(bid, ask, state.last_trade_price, event.timestamp_ms);
            state.analysis.liquidity = Some(l);
        });
    }

    fn handle_depth5(&self, event: &TradeEvent) {
        self.with_state(&event.market, |state| {
            let bid_qty: f64 = event.raw.bids.iter().map(|(_, q)| *q).sum();
            let ask_qty: f64 = event.raw.asks.iter().map(|(_, q)| *q).sum();
            let history: Vec<f64> = state.flow_history.iter().copied().collect();
            let f = flow::compute(bid_qty, ask_qty, &history, event.timestamp_ms);
            state.flow_history.push_back(f.buy_pressure_pct);
            while state.flow_history.len() > FLOW_HISTORY {
                state.flow_history.pop_front();
            }
            state.analysis.flow = Some(f);
        });
    }

    /// Combined snapshot for every symbol that has at least one populated
    /// category — called by the periodic analysis timer (default 2 s).
    pub fn snapshot_all(&self) -> Vec<QuantAnalysis> {
        self.states
            .read()
            .values()
            .filter(|s| {
                s.analysis.momentum.is_some()
                    || s.analysis.trend.is_some()
                    || s.analysis.liquidity.is_some()
                    || s.analysis.flow.is_some()
            })
            .map(|s| s.analysis.clone())
            .collect()
    }

    /// Run the predictor for every symbol whose price history has at least
    /// [`predictor::MIN_HISTORY`] samples and which has an established
    /// momentum score — called by the second periodic timer (default 5 s).
    pub fn run_predictions(&self, now_ms: i64) -> Vec<(String, crate::model::Prediction)> {
        let mut states = self.states.write();
        let mut out = Vec::new();
        for (symbol, state) in states.iter_mut() {
            if state.trend_history.len() < predictor::MIN_HISTORY {
                continue;
            }
            let Some(momentum) = state.analysis.momentum else {
                continue;
            };
            let Some(trend) = state.analysis.trend else {
                continue;
            };
            let last_price = *state.trend_history.back().unwrap_or(&0.0);
            let prediction = predictor::compute(momentum.score, trend.class, last_price, now_ms);
            state.analysis.prediction = Some(prediction);
            out.push((symbol.clone(), prediction));
        }
        debug!(count = out.len(), "predictor tick produced predictions");
        out
    }

    pub fn symbol_snapshot(&self, symbol: &str) -> Option<QuantAnalysis> {
        self.states.read().get(symbol).map(|s| s.analysis.clone())
    }

    pub fn tracked_symbol_count(&self) -> usize {
        self.states.read().len()
    }
}

impl Default for Analytics {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyticsSink for Analytics {
    fn ingest(&self, event: &TradeEvent) {
        match event.stream_kind {
            StreamKind::AggTrade => self.handle_agg_trade(event),
            StreamKind::Ticker => self.handle_ticker(event),
            StreamKind::BookTicker => self.handle_book_ticker(event),
            StreamKind::Depth5 => self.handle_depth5(event),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawPayload;

    fn event(market: &str, kind: StreamKind, raw: RawPayload, price: f64, is_buy: bool) -> TradeEvent {
        TradeEvent {
            market: market.to_string(),
            stream_kind: kind,
            price,
            quantity: 1.0,
            total_value: price,
            is_buy,
            timestamp_ms: 1,
            event_id: "e".into(),
            raw,
        }
    }

    #[test]
    fn agg_trade_populates_momentum_only() {
        let a = Analytics::new();
        a.ingest(&event("BTCUSDT", StreamKind::AggTrade, RawPayload::default(), 100.0, true));
        let snap = a.symbol_snapshot("BTCUSDT").unwrap();
        assert!(snap.momentum.is_some());
        assert!(snap.trend.is_none());
    }

    #[test]
    fn snapshot_all_excludes_symbols_with_no_categories() {
        let a = Analytics::new();
        assert!(a.snapshot_all().is_empty());
        a.ingest(&event("ETHUSDT", StreamKind::AggTrade, RawPayload::default(), 100.0, true));
        assert_eq!(a.snapshot_all().len(), 1);
    }

    #[test]
    fn book_ticker_uses_last_trade_price_for_pressure() {
        let a = Analytics::new();
        a.ingest(&event("BTCUSDT", StreamKind::AggTrade, RawPayload::default(), 100.9, true));
        let raw = RawPayload {
            best_bid: Some(100.0),
            best_ask: Some(101.0),
            ..Default::default()
        };
        a.ingest(&event("BTCUSDT", StreamKind::BookTicker, raw, 100.5, true));
        let snap = a.symbol_snapshot("BTCUSDT").unwrap();
        assert_eq!(snap.liquidity.unwrap().pressure, crate::model::Pressure::BuyHeavy);
    }

    #[test]
    fn predictions_require_minimum_history() {
        let a = Analytics::new();
        a.ingest(&event("BTCUSDT", StreamKind::AggTrade, RawPayload::default(), 100.0, true));
        for i in 0..5 {
            a.ingest(&event("BTCUSDT", StreamKind::Ticker, RawPayload::default(), 100.0 + i as f64, true));
        }
        assert!(a.run_predictions(0).is_empty());

        for i in 0..10 {
            a.ingest(&event("BTCUSDT", StreamKind::Ticker, RawPayload::default(), 100.0 + i as f64, true));
        }
        assert_eq!(a.run_predictions(0).len(), 1);
    }
}
