// =============================================================================
// Trend (from Ticker)
// =============================================================================

use crate::model::{Trend, TrendClass};

/// Length of the per-symbol price history retained for the predictor
/// (spec §4.9: "a per-symbol price history of length 100").
pub const HISTORY_LEN: usize = 100;

/// Compute trend classification from a 24h ticker snapshot. Missing `high`
/// or `low` degrades volatility to zero rather than failing (spec §8
/// boundary: "Ticker with missing `h` or `l` computes volatility as zero and
/// does not crash").
pub fn compute(pct_change_24h: f64, high: Option<f64>, low: Option<f64>, last_close: f64, ts: i64) -> Trend {
    let volatility_pct = match (high, low) {
        (Some(h), Some(l)) if last_close > 0.0 => (h - l) / last_close * 100.0,
        _ => 0.0,
    };

    let class = if pct_change_24h > 2.0 {
        TrendClass::StrongUp
    } else if pct_change_24h > 0.5 {
        TrendClass::Up
    } else if pct_change_24h < -2.0 {
        TrendClass::StrongDown
    } else if pct_change_24h < -0.5 {
        TrendClass::Down
    } else {
        TrendClass::Sideways
    };

    Trend {
        pct_change_24h,
        class,
        volatility_pct,
        high: high.unwrap_or(0.0),
        low: low.unwrap_or(0.0),
        ts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_5_classification_sweep() {
        let cases = [
            (-5.0, TrendClass::StrongDown),
            (-1.0, TrendClass::Down),
            (0.0, TrendClass::Sideways),
            (1.0, TrendClass::Up),
            (5.0, TrendClass::StrongUp),
        ];
        for (pct, expected) in cases {
            let t = compute(pct, Some(110.0), Some(90.0), 100.0, 0);
            assert_eq!(t.class, expected, "pct={pct}");
        }
    }

    #[test]
    fn missing_high_or_low_yields_zero_volatility_not_a_crash() {
        let t = compute(1.0, None, Some(90.0), 100.0, 0);
        assert_eq!(t.volatility_pct, 0.0);
        let t2 = compute(1.0, Some(110.0), None, 100.0, 0);
        assert_eq!(t2.volatility_pct, 0.0);
    }

    #[test]
    fn volatility_uses_last_close_as_denominator() {
        let t = compute(0.0, Some(110.0), Some(90.0), 100.0, 0);
        assert!((t.volatility_pct - 20.0).abs() < 1e-9);
    }
}
