// =============================================================================
// Order Flow (from Depth5)
// =============================================================================

use crate::model::{Flow, FlowChange};

/// Compute order-flow pressure from top-5 bid/ask quantity sums.
/// `recent_buy_pct` is the history of previous `buy_pressure_pct` values
/// (oldest first), used to estimate the `change` direction.
pub fn compute(top5_bid_qty: f64, top5_ask_qty: f64, recent_buy_pct: &[f64], ts: i64) -> Flow {
    let total = top5_bid_qty + top5_ask_qty;
    let buy_pressure_pct = if total > 0.0 {
        100.0 * top5_bid_qty / total
    } else {
        50.0
    };
    let sell_pressure_pct = 100.0 - buy_pressure_pct;
    let imbalance_pct = buy_pressure_pct - 50.0;

    let change = if recent_buy_pct.is_empty() {
        FlowChange::Stable
    } else {
        let avg = recent_buy_pct.iter().sum::<f64>() / recent_buy_pct.len() as f64;
        let delta = buy_pressure_pct - avg;
        if delta > 1.0 {
            FlowChange::Increasing
        } else if delta < -1.0 {
            FlowChange::Decreasing
        } else {
            FlowChange::Stable
        }
    };

    Flow {
        buy_pressure_pct,
        sell_pressure_pct,
        imbalance_pct,
        change,
        top5_bid_qty,
        top5_ask_qty,
        ts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_total_depth_defaults_to_50_50() {
        let f = compute(0.0, 0.0, &[], 0);
        assert_eq!(f.buy_pressure_pct, 50.0);
        assert_eq!(f.imbalance_pct, 0.0);
    }

    #[test]
    fn heavier_bid_side_skews_buy_pressure() {
        let f = compute(30.0, 10.0, &[], 0);
        assert!((f.buy_pressure_pct - 75.0).abs() < 1e-9);
        assert!((f.imbalance_pct - 25.0).abs() < 1e-9);
    }

    #[test]
    fn no_history_is_stable() {
        let f = compute(20.0, 20.0, &[], 0);
        assert_eq!(f.change, FlowChange::Stable);
    }

    #[test]
    fn rising_buy_pressure_vs_history_is_increasing() {
        let history = vec![40.0, 42.0, 41.0];
        let f = compute(60.0, 20.0, &history, 0); // buy_pct = 75
        assert_eq!(f.change, FlowChange::Increasing);
    }

    #[test]
    fn falling_buy_pressure_vs_history_is_decreasing() {
        let history = vec![70.0, 72.0, 71.0];
        let f = compute(20.0, 60.0, &history, 0); // buy_pct = 25
        assert_eq!(f.change, FlowChange::Decreasing);
    }
}
