// =============================================================================
// Liquidity (from BookTicker)
// =============================================================================

use crate::model::{DepthClass, Liquidity, Pressure};

/// Compute liquidity classification. `last_trade_price` is the most recent
/// AggTrade price observed for the symbol, if any — used to gauge which
/// side of the spread recent flow is leaning toward. Without a recent trade
/// there is nothing to compare, so pressure defaults to `Balanced`.
pub fn compute(best_bid: f64, best_ask: f64, last_trade_price: Option<f64>, ts: i64) -> Liquidity {
    let spread = best_ask - best_bid;
    let mid = (best_bid + best_ask) / 2.0;

    let depth = if mid > 0.0 && spread < 0.001 * mid {
        DepthClass::Deep
    } else if mid > 0.0 && spread > 0.005 * mid {
        DepthClass::Shallow
    } else {
        DepthClass::Normal
    };

    let pressure = match last_trade_price {
        Some(price) if spread > 0.0 => {
            let pos = (price - mid) / spread;
            if pos > 0.3 {
                Pressure::BuyHeavy
            } else if pos < -0.3 {
                Pressure::SellHeavy
            } else {
                Pressure::Balanced
            }
        }
        _ => Pressure::Balanced,
    };

    Liquidity {
        spread,
        depth,
        pressure,
        best_bid,
        best_ask,
        ts,
    }
}
