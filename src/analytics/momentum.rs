// =============================================================================
// Momentum (from AggTrade)
// =============================================================================
//
// Pure computation in the style of `indicators/ema.rs`: given the inputs,
// return the derived value with no side effects; the stateful ring lives in
// `analytics::mod`.
// =============================================================================

use crate::model::{Direction, Momentum};

pub const WINDOW_SIZE: usize = 20;

/// Compute momentum from a window of up to [`WINDOW_SIZE`] buyer-is-taker
/// flags, most-recent last. `ts` is the timestamp of the triggering event.
///
/// Returns `None` when the window is empty — there is nothing to score yet.
pub fn compute(window: &[bool], ts: i64) -> Option<Momentum> {
    if window.is_empty() {
        return None;
    }
    let b = window.iter().filter(|&&is_buy| is_buy).count() as i64;
    let s = WINDOW_SIZE as i64 - b;
    let score = (5 * (b - s)).clamp(-100, 100) as f64;
    let confidence = score.abs().clamp(0.0, 100.0);
    let direction = if score > 20.0 {
        Direction::Bullish
    } else if score < -20.0 {
        Direction::Bearish
    } else {
        Direction::Neutral
    };

    Some(Momentum {
        score,
        direction,
        confidence,
        ts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_window_yields_none() {
        assert!(compute(&[], 0).is_none());
    }

    #[test]
    fn all_buys_is_fully_bullish() {
        let window = vec![true; 20];
        let m = compute(&window, 1).unwrap();
        assert_eq!(m.score, 100.0);
        assert_eq!(m.direction, Direction::Bullish);
        assert_eq!(m.confidence, 100.0);
    }

    #[test]
    fn all_sells_is_fully_bearish() {
        let window = vec![false; 20];
        let m = compute(&window, 1).unwrap();
        assert_eq!(m.score, -100.0);
        assert_eq!(m.direction, Direction::Bearish);
    }

    #[test]
    fn balanced_window_is_neutral() {
        let mut window = vec![true; 10];
        window.extend(vec![false; 10]);
        let m = compute(&window, 1).unwrap();
        assert_eq!(m.score, 0.0);
        assert_eq!(m.direction, Direction::Neutral);
    }

    #[test]
    fn threshold_boundary_is_exclusive() {
        // b=12, s=8 -> score = 5*4 = 20, not > 20, so Neutral.
        let mut window = vec![true; 12];
        window.extend(vec![false; 8]);
        let m = compute(&window, 1).unwrap();
        assert_eq!(m.score, 20.0);
        assert_eq!(m.direction, Direction::Neutral);
    }

    #[test]
    fn warm_up_window_scores_against_full_window_size() {
        // Before the ring fills to WINDOW_SIZE, sell count is implied by the
        // gap to WINDOW_SIZE, not by the short window's own length.
        let window = vec![true; 5];
        let m = compute(&window, 1).unwrap();
        assert_eq!(m.score, -50.0);
        assert_eq!(m.direction, Direction::Bearish);
    }
}
