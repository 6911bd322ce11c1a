// =============================================================================
// Directional Predictor — combines momentum and trend into a short-horizon
// directional score (spec §4.9, second periodic timer, default 5 s).
// =============================================================================

use crate::model::{Prediction, PredictionDirection, TrendClass};

/// Minimum price-history samples required before a prediction is produced.
pub const MIN_HISTORY: usize = 10;

fn trend_score(class: TrendClass) -> f64 {
    match class {
        TrendClass::StrongUp => 40.0,
        TrendClass::Up => 20.0,
        TrendClass::Sideways => 0.0,
        TrendClass::Down => -20.0,
        TrendClass::StrongDown => -40.0,
    }
}

/// Compute a directional prediction. Callers are responsible for checking
/// `price_history_len >= MIN_HISTORY` before calling.
pub fn compute(momentum_score: f64, trend_class: TrendClass, last_price: f64, ts: i64) -> Prediction {
    let ts_score = trend_score(trend_class);
    let score = (0.6 * momentum_score + 0.4 * ts_score).clamp(-100.0, 100.0);

    let direction = if score > 30.0 {
        PredictionDirection::Up
    } else if score < -30.0 {
        PredictionDirection::Down
    } else {
        PredictionDirection::Sideways
    };

    let abs_score = score.abs();
    let probability = if abs_score > 30.0 {
        65.0 + (abs_score - 30.0) * 0.5
    } else {
        50.0 + abs_score * 0.3
    }
    .clamp(45.0, 85.0);

    let target_price = last_price * (1.0 + score / 1000.0);

    Prediction {
        score,
        direction,
        probability,
        target_price,
        ts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strong_bullish_alignment_predicts_up() {
        let p = compute(100.0, TrendClass::StrongUp, 1000.0, 0);
        assert_eq!(p.direction, PredictionDirection::Up);
        assert!(p.score > 30.0);
        assert!(p.target_price > 1000.0);
    }

    #[test]
    fn strong_bearish_alignment_predicts_down() {
        let p = compute(-100.0, TrendClass::StrongDown, 1000.0, 0);
        assert_eq!(p.direction, PredictionDirection::Down);
        assert!(p.target_price < 1000.0);
    }

    #[test]
    fn mixed_signals_land_sideways() {
        let p = compute(0.0, TrendClass::Sideways, 1000.0, 0);
        assert_eq!(p.direction, PredictionDirection::Sideways);
        assert_eq!(p.target_price, 1000.0);
    }

    #[test]
    fn probability_is_clamped_within_bounds() {
        let p = compute(100.0, TrendClass::StrongUp, 1000.0, 0);
        assert!(p.probability >= 45.0 && p.probability <= 85.0);
    }

    #[test]
    fn probability_uses_steeper_slope_above_30() {
        let low = compute(40.0, TrendClass::Sideways, 1000.0, 0); // score=24, <=30
        let high = compute(90.0, TrendClass::StrongUp, 1000.0, 0); // score clamped high, >30
        assert!(high.probability > low.probability);
    }
}
