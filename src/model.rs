// =============================================================================
// Unified data model — normalized market-data records and analytic snapshots
// =============================================================================
//
// `TradeEvent` is the single shape every decoded stream payload normalizes
// into (spec §3). It is immutable once published: downstream consumers only
// ever see complete, validated events.
// =============================================================================

use serde::{Deserialize, Serialize};

/// One of the four multiplexed stream kinds this core understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    AggTrade,
    Ticker,
    BookTicker,
    Depth5,
}

impl std::fmt::Display for StreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AggTrade => "aggTrade",
            Self::Ticker => "ticker",
            Self::BookTicker => "bookTicker",
            Self::Depth5 => "depth5",
        };
        write!(f, "{s}")
    }
}

impl StreamKind {
    /// The lowercase stream-name suffix used in the combined-stream grammar
    /// (`{symbol}@{suffix}`).
    pub fn suffix(self) -> &'static str {
        match self {
            Self::AggTrade => "aggTrade",
            Self::Ticker => "ticker",
            Self::BookTicker => "bookTicker",
            Self::Depth5 => "depth5",
        }
    }
}

/// A single top-of-book level: `(price, quantity)`.
pub type Level = (f64, f64);

/// Stream-specific fields carried alongside the normalized fields, retained
/// for downstream extractors (spec §3: "opaque carrier of stream-specific
/// fields").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawPayload {
    /// `Ticker`: 24h change percent.
    pub change_pct_24h: Option<f64>,
    /// `Ticker`: 24h high.
    pub high_24h: Option<f64>,
    /// `Ticker`: 24h low.
    pub low_24h: Option<f64>,

    /// `BookTicker` / `Depth5`: best bid / best ask.
    pub best_bid: Option<f64>,
    pub best_ask: Option<f64>,
    /// `BookTicker`: best bid / ask quantity.
    pub best_bid_qty: Option<f64>,
    pub best_ask_qty: Option<f64>,
    /// `BookTicker`: update id `u`.
    pub update_id: Option<u64>,

    /// `Depth5`: top-5 levels on each side, best-first.
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// The unified normalized record published by the decoder (spec §3).
///
/// Invariants enforced at construction by [`TradeEvent::validate`]:
/// `price > 0 ∧ quantity ≥ 0 ∧ timestamp_ms > 0 ∧ event_id ≠ ""`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    pub market: String,
    pub stream_kind: StreamKind,
    pub price: f64,
    pub quantity: f64,
    pub total_value: f64,
    pub is_buy: bool,
    pub timestamp_ms: i64,
    pub event_id: String,
    pub raw: RawPayload,
}

impl TradeEvent {
    /// Check the global invariants that must hold for any published event.
    pub fn validate(&self) -> Result<(), crate::error::CoreError> {
        if self.market.is_empty() || self.market != self.market.to_uppercase() {
            return Err(crate::error::CoreError::ParseError(format!(
                "market must be non-empty and uppercase, got {:?}",
                self.market
            )));
        }
        if !(self.price > 0.0) {
            return Err(crate::error::CoreError::ParseError(format!(
                "price must be > 0, got {}",
                self.price
            )));
        }
        if !(self.quantity >= 0.0) {
            return Err(crate::error::CoreError::ParseError(format!(
                "quantity must be >= 0, got {}",
                self.quantity
            )));
        }
        if self.timestamp_ms <= 0 {
            return Err(crate::error::CoreError::ParseError(format!(
                "timestamp_ms must be > 0, got {}",
                self.timestamp_ms
            )));
        }
        if self.event_id.is_empty() {
            return Err(crate::error::CoreError::ParseError(
                "event_id must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Bootstrap market metadata (spec §3 `MarketInfo`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketInfo {
    pub symbol: String,
    pub status: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub price_precision: u32,
    pub qty_precision: u32,
}

/// One of the fixed monetary-threshold classes AggTrades are filtered by
/// (spec §3). Ordered ascending by threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FilterClass {
    T30k,
    T50k,
    T100k,
    T300k,
    T500k,
    T1m,
    T5m,
    T10m,
}

impl FilterClass {
    pub const ALL: [FilterClass; 8] = [
        Self::T30k,
        Self::T50k,
        Self::T100k,
        Self::T300k,
        Self::T500k,
        Self::T1m,
        Self::T5m,
        Self::T10m,
    ];

    /// The quote-asset threshold in absolute units, e.g. `T30k => 30_000.0`.
    pub fn threshold(self) -> f64 {
        match self {
            Self::T30k => 30_000.0,
            Self::T50k => 50_000.0,
            Self::T100k => 100_000.0,
            Self::T300k => 300_000.0,
            Self::T500k => 500_000.0,
            Self::T1m => 1_000_000.0,
            Self::T5m => 5_000_000.0,
            Self::T10m => 10_000_000.0,
        }
    }

    /// All classes whose threshold `total_value` satisfies
    /// (i.e. `total_value >= threshold`), smallest first.
    pub fn satisfied_by(total_value: f64) -> impl Iterator<Item = FilterClass> {
        Self::ALL.into_iter().filter(move |c| total_value >= c.threshold())
    }
}

impl std::fmt::Display for FilterClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::T30k => "30k",
            Self::T50k => "50k",
            Self::T100k => "100k",
            Self::T300k => "300k",
            Self::T500k => "500k",
            Self::T1m => "1M",
            Self::T5m => "5M",
            Self::T10m => "10M",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Per-symbol analytic snapshots (spec §3) — overwritten on each update.
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendClass {
    StrongUp,
    Up,
    Sideways,
    Down,
    StrongDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepthClass {
    Deep,
    Normal,
    Shallow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pressure {
    BuyHeavy,
    SellHeavy,
    Balanced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowChange {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictionDirection {
    Up,
    Down,
    Sideways,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Momentum {
    pub score: f64,
    pub direction: Direction,
    pub confidence: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Trend {
    pub pct_change_24h: f64,
    pub class: TrendClass,
    pub volatility_pct: f64,
    pub high: f64,
    pub low: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Liquidity {
    pub spread: f64,
    pub depth: DepthClass,
    pub pressure: Pressure,
    pub best_bid: f64,
    pub best_ask: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Flow {
    pub buy_pressure_pct: f64,
    pub sell_pressure_pct: f64,
    pub imbalance_pct: f64,
    pub change: FlowChange,
    pub top5_bid_qty: f64,
    pub top5_ask_qty: f64,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Prediction {
    pub score: f64,
    pub direction: PredictionDirection,
    pub probability: f64,
    pub target_price: f64,
    pub ts: i64,
}

/// Combined per-symbol analytics snapshot emitted by the periodic analysis
/// timer (spec §4.9). Categories are `None` until at least one update has
/// been observed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuantAnalysis {
    pub symbol: String,
    pub momentum: Option<Momentum>,
    pub trend: Option<Trend>,
    pub liquidity: Option<Liquidity>,
    pub flow: Option<Flow>,
    pub prediction: Option<Prediction>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_event() -> TradeEvent {
        TradeEvent {
            market: "BTCUSDT".into(),
            stream_kind: StreamKind::AggTrade,
            price: 100.0,
            quantity: 1.0,
            total_value: 100.0,
            is_buy: true,
            timestamp_ms: 1000,
            event_id: "a1".into(),
            raw: RawPayload::default(),
        }
    }

    #[test]
    fn validate_accepts_well_formed_event() {
        assert!(base_event().validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_positive_price() {
        let mut e = base_event();
        e.price = 0.0;
        assert!(e.validate().is_err());
    }

    #[test]
    fn validate_rejects_negative_quantity() {
        let mut e = base_event();
        e.quantity = -1.0;
        assert!(e.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_event_id() {
        let mut e = base_event();
        e.event_id = String::new();
        assert!(e.validate().is_err());
    }

    #[test]
    fn validate_rejects_lowercase_market() {
        let mut e = base_event();
        e.market = "btcusdt".into();
        assert!(e.validate().is_err());
    }

    #[test]
    fn filter_class_threshold_boundary_is_inclusive() {
        let classes: Vec<_> = FilterClass::satisfied_by(100_000.0).collect();
        assert!(classes.contains(&FilterClass::T100k));
        assert!(!classes.contains(&FilterClass::T300k));
    }

    #[test]
    fn filter_class_satisfied_by_is_ascending() {
        let classes: Vec<_> = FilterClass::satisfied_by(1_500_000.0).collect();
        assert_eq!(
            classes,
            vec![
                FilterClass::T30k,
                FilterClass::T50k,
                FilterClass::T100k,
                FilterClass::T300k,
                FilterClass::T500k,
                FilterClass::T1m,
            ]
        );
    }
}
