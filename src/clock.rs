// =============================================================================
// Clock & Backoff (C1) — monotonic time + adaptive exponential backoff
// =============================================================================
//
// Randomness and clocks are injected rather than called globally, so tests
// can drive deterministic sequences (spec §9 "Randomness and clocks").
// =============================================================================

use std::time::{Duration, Instant};

use rand::Rng;

/// Monotonic clock abstraction. The default implementation wraps
/// [`Instant::now`]; tests can substitute a fake clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Production clock backed by `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Coarse network-quality classification used to scale backoff delays
/// (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkClass {
    Wired,
    WiFi,
    Mobile,
    None,
}

impl NetworkClass {
    fn multiplier(self) -> f64 {
        match self {
            Self::Wired => 0.8,
            Self::WiFi => 0.9,
            Self::Mobile => 1.3,
            Self::None => 2.5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(5 * 60),
            max_retries: 10,
        }
    }
}

/// Adaptive exponential backoff with jitter and network-aware multipliers
/// (spec §4.1). Not `Sync` by itself — callers own one instance per
/// connection attempt loop and serialize access through their own task.
pub struct ExponentialBackoff {
    config: BackoffConfig,
    retry_count: u32,
    /// Wall-clock instant of the first retry in the current episode, used to
    /// detect the 15-minute total-age cooldown trigger.
    episode_start: Option<Instant>,
    /// Timestamps of retries within the most recent 5-minute window, used to
    /// detect the "8 retries within 5 min" cooldown trigger.
    recent_retries: Vec<Instant>,
    last_failure: Option<Instant>,
    cancelled: bool,
}

/// Outcome of requesting the next backoff delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffOutcome {
    /// Wait this long before the next attempt.
    Delay(Duration),
    /// Too many failures — enter a fixed cool-down and reset counters.
    CoolDown(Duration),
    /// The backoff was cancelled; produce no further work.
    Cancelled,
}

const COOL_DOWN: Duration = Duration::from_secs(5 * 60);
const RECENT_WINDOW: Duration = Duration::from_secs(5 * 60);
const IDLE_RESET: Duration = Duration::from_secs(5 * 60);
const TOTAL_AGE_LIMIT: Duration = Duration::from_secs(15 * 60);

impl ExponentialBackoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            retry_count: 0,
            episode_start: None,
            recent_retries: Vec::new(),
            last_failure: None,
            cancelled: false,
        }
    }

    /// Compute the base delay (pre-jitter, pre-network-multiplier) for the
    /// given 1-indexed retry count, per spec §4.1:
    /// `base = initial · 2^(n-1)` for `n < 6`, else `(1+n_zero_indexed)`
    /// minutes (where `n_zero_indexed = n - 1`), which collapses to
    /// `n` minutes once the switch-over happens.
    fn base_delay_secs(&self, retry_count: u32) -> f64 {
        let n0 = retry_count.saturating_sub(1);
        if n0 < 5 {
            self.config.initial_delay.as_secs_f64() * 2f64.powi(n0 as i32)
        } else {
            ((1 + n0) * 60) as f64
        }
    }

    /// Failure-recency penalty: `min(1.8, 1 + 0.15*n)`, reset after 5
    /// minutes of idleness since the last recorded failure.
    fn failure_penalty(&self, now: Instant) -> f64 {
        match self.last_failure {
            Some(t) if now.duration_since(t) < IDLE_RESET => {
                (1.0 + 0.15 * self.retry_count as f64).min(1.8)
            }
            _ => 1.0,
        }
    }

    /// Request the next delay, recording this as a new failed attempt.
    /// `rng` supplies the jitter source so tests can inject a seeded
    /// generator.
    pub fn next_delay(
        &mut self,
        now: Instant,
        network: NetworkClass,
        rng: &mut impl Rng,
    ) -> BackoffOutcome {
        if self.cancelled {
            return BackoffOutcome::Cancelled;
        }

        self.retry_count += 1;
        if self.episode_start.is_none() {
            self.episode_start = Some(now);
        }
        self.recent_retries.push(now);
        self.recent_retries
            .retain(|t| now.duration_since(*t) <= RECENT_WINDOW);

        let episode_age = self
            .episode_start
            .map(|s| now.duration_since(s))
            .unwrap_or_default();

        if self.recent_retries.len() as u32 >= 8
            || episode_age > TOTAL_AGE_LIMIT
            || self.retry_count >= self.config.max_retries
        {
            self.reset();
            return BackoffOutcome::CoolDown(COOL_DOWN);
        }

        let base = self.base_delay_secs(self.retry_count);
        let penalty = self.failure_penalty(now);
        let scaled = base * network.multiplier() * penalty;

        let jitter_frac = rng.gen_range(-0.3..=0.3);
        let jittered = scaled * (1.0 + jitter_frac);

        let clamped = jittered
            .max(self.config.initial_delay.as_secs_f64())
            .min(self.config.max_delay.as_secs_f64());

        self.last_failure = Some(now);
        BackoffOutcome::Delay(Duration::from_secs_f64(clamped))
    }

    /// Reset all counters. Called on any successful connect (spec §4.1) or
    /// internally when a cool-down is triggered.
    pub fn reset(&mut self) {
        self.retry_count = 0;
        self.episode_start = None;
        self.recent_retries.clear();
        self.last_failure = None;
    }

    /// Mark this backoff as cancelled; subsequent calls to `next_delay`
    /// return `Cancelled` without side effects.
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    fn zero_rng() -> StepRng {
        // StepRng with increment 0 always yields the same word; combined with
        // gen_range(-0.3..=0.3) this produces a fixed, reproducible jitter.
        StepRng::new(0, 0)
    }

    #[test]
    fn base_sequence_matches_switchover_at_sixth_retry() {
        let b = ExponentialBackoff::new(BackoffConfig::default());
        let expected = [2.0, 4.0, 8.0, 16.0, 32.0, 360.0, 420.0, 480.0, 540.0, 600.0];
        for (i, exp) in expected.iter().enumerate() {
            let n = (i + 1) as u32;
            assert!(
                (b.base_delay_secs(n) - exp).abs() < 1e-9,
                "retry {n}: got {}, want {exp}",
                b.base_delay_secs(n)
            );
        }
    }

    #[test]
    fn delay_is_clamped_to_initial_and_max() {
        let mut b = ExponentialBackoff::new(BackoffConfig {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(10),
            max_retries: 20,
        });
        let mut rng = zero_rng();
        let now = Instant::now();
        for _ in 0..3 {
            match b.next_delay(now, NetworkClass::Wired, &mut rng) {
                BackoffOutcome::Delay(d) => {
                    assert!(d >= Duration::from_secs(2));
                    assert!(d <= Duration::from_secs(10));
                }
                other => panic!("unexpected outcome: {other:?}"),
            }
        }
    }

    #[test]
    fn reset_clears_retry_count() {
        let mut b = ExponentialBackoff::new(BackoffConfig::default());
        let mut rng = zero_rng();
        let now = Instant::now();
        b.next_delay(now, NetworkClass::Wired, &mut rng);
        b.next_delay(now, NetworkClass::Wired, &mut rng);
        assert_eq!(b.retry_count(), 2);
        b.reset();
        assert_eq!(b.retry_count(), 0);
    }

    #[test]
    fn cool_down_triggers_after_max_retries() {
        let mut b = ExponentialBackoff::new(BackoffConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: 3,
        });
        let mut rng = zero_rng();
        let now = Instant::now();
        assert!(matches!(
            b.next_delay(now, NetworkClass::Wired, &mut rng),
            BackoffOutcome::Delay(_)
        ));
        assert!(matches!(
            b.next_delay(now, NetworkClass::Wired, &mut rng),
            BackoffOutcome::Delay(_)
        ));
        assert!(matches!(
            b.next_delay(now, NetworkClass::Wired, &mut rng),
            BackoffOutcome::CoolDown(_)
        ));
        // Cooldown resets the episode.
        assert_eq!(b.retry_count(), 0);
    }

    #[test]
    fn cool_down_triggers_on_eight_retries_within_five_minutes() {
        let mut b = ExponentialBackoff::new(BackoffConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: 100,
        });
        let mut rng = zero_rng();
        let start = Instant::now();
        let mut outcome = BackoffOutcome::Cancelled;
        for i in 0..8 {
            let now = start + Duration::from_secs(i * 10);
            outcome = b.next_delay(now, NetworkClass::Wired, &mut rng);
        }
        assert!(matches!(outcome, BackoffOutcome::CoolDown(_)));
    }

    #[test]
    fn cancelled_backoff_yields_no_further_delays() {
        let mut b = ExponentialBackoff::new(BackoffConfig::default());
        b.cancel();
        let mut rng = zero_rng();
        assert_eq!(
            b.next_delay(Instant::now(), NetworkClass::Wired, &mut rng),
            BackoffOutcome::Cancelled
        );
    }

    #[test]
    fn network_multiplier_scales_delay() {
        let wired = NetworkClass::Wired.multiplier();
        let none = NetworkClass::None.multiplier();
        assert!(wired < none);
        assert!((wired - 0.8).abs() < 1e-9);
        assert!((none - 2.5).abs() < 1e-9);
    }
}
