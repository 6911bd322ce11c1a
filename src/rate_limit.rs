// =============================================================================
// Rate Limiter (C2) — weight/order/raw-request sliding-window throttle
// =============================================================================
//
// Grounded on `binance/rate_limit.rs`'s atomic-counter header harvesting,
// generalized from a single hard-coded weight ceiling into the exchange's
// actual rule set (spec §4.2): one sliding FIFO window per rule, with a
// pre-flight `throttle` that sleeps rather than rejects.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    RequestWeight,
    Orders,
    RawRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleInterval {
    Second,
    Minute,
    Hour,
    Day,
}

impl RuleInterval {
    fn duration(self, interval_num: u32) -> Duration {
        let unit = match self {
            Self::Second => 1,
            Self::Minute => 60,
            Self::Hour => 60 * 60,
            Self::Day => 24 * 60 * 60,
        };
        Duration::from_secs(unit * interval_num as u64)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub kind: RuleKind,
    pub interval: RuleInterval,
    pub interval_num: u32,
    pub limit: u32,
}

impl RateLimitRule {
    pub fn new(kind: RuleKind, interval: RuleInterval, interval_num: u32, limit: u32) -> Self {
        Self {
            kind,
            interval,
            interval_num,
            limit,
        }
    }

    fn window(&self) -> Duration {
        self.interval.duration(self.interval_num)
    }
}

/// Default rules applied when the exchange's metadata has never been loaded
/// (spec §4.2): `RequestWeight: 2400/min`, `Orders: 300/10s`,
/// `Orders: 1200/min`.
fn default_rules() -> Vec<RateLimitRule> {
    vec![
        RateLimitRule::new(RuleKind::RequestWeight, RuleInterval::Minute, 1, 2400),
        RateLimitRule::new(RuleKind::Orders, RuleInterval::Second, 10, 300),
        RateLimitRule::new(RuleKind::Orders, RuleInterval::Minute, 1, 1200),
    ]
}

struct RuleState {
    rule: RateLimitRule,
    entries: VecDeque<(Instant, u32)>,
}

/// Sliding-window request pacer. One FIFO of `(timestamp, amount)` entries
/// is kept per rule; `throttle` blocks the caller until every applicable
/// rule has headroom, then records the new call.
pub struct RateLimiter {
    rules: RwLock<Vec<RuleState>>,
    reported_usage: RwLock<HashMap<String, u32>>,
    loaded_from_exchange: RwLock<bool>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(
                default_rules()
                    .into_iter()
                    .map(|rule| RuleState {
                        rule,
                        entries: VecDeque::new(),
                    })
                    .collect(),
            ),
            reported_usage: RwLock::new(HashMap::new()),
            loaded_from_exchange: RwLock::new(false),
        }
    }

    /// Replace the rule set with one loaded from exchange metadata
    /// (`GET /fapi/v1/exchangeInfo`). Existing windows are discarded.
    pub fn load_rules(&self, rules: Vec<RateLimitRule>) {
        let mut guard = self.rules.write();
        *guard = rules
            .into_iter()
            .map(|rule| RuleState {
                rule,
                entries: VecDeque::new(),
            })
            .collect();
        *self.loaded_from_exchange.write() = true;
        debug!(count = guard.len(), "rate-limit rules loaded from exchange metadata");
    }

    pub fn rules_loaded_from_exchange(&self) -> bool {
        *self.loaded_from_exchange.read()
    }

    fn amount_for(kind: RuleKind, weight: u32, is_order: bool) -> u32 {
        match kind {
            RuleKind::RequestWeight => weight,
            RuleKind::Orders => {
                if is_order {
                    1
                } else {
                    0
                }
            }
            RuleKind::RawRequest => 1,
        }
    }

    /// How long the caller must wait before `weight`/`is_order` can be
    /// spent without exceeding any applicable rule, as of `now`. Trims
    /// expired entries in the process. Returns `Duration::ZERO` when the
    /// call may proceed immediately.
    fn wait_needed(&self, weight: u32, is_order: bool, now: Instant) -> Duration {
        let mut guard = self.rules.write();
        let mut max_wait = Duration::ZERO;

        for state in guard.iter_mut() {
            let amount = Self::amount_for(state.rule.kind, weight, is_order);
            if amount == 0 {
                continue;
            }
            let window = state.rule.window();
            while let Some((t, _)) = state.entries.front() {
                if now.duration_since(*t) > window {
                    state.entries.pop_front();
                } else {
                    break;
                }
            }
            let projected: u32 = state.entries.iter().map(|(_, a)| *a).sum::<u32>() + amount;
            if projected > state.rule.limit {
                if let Some((oldest, _)) = state.entries.front() {
                    let elapsed = now.duration_since(*oldest);
                    let wait = window.saturating_sub(elapsed);
                    max_wait = max_wait.max(wait);
                } else {
                    // A single call already exceeds the limit outright;
                    // nothing to wait for will help, but don't busy-loop.
                    max_wait = max_wait.max(Duration::from_millis(50));
                }
            }
        }
        max_wait
    }

    fn record(&self, weight: u32, is_order: bool, now: Instant) {
        let mut guard = self.rules.write();
        for state in guard.iter_mut() {
            let amount = Self::amount_for(state.rule.kind, weight, is_order);
            if amount > 0 {
                state.entries.push_back((now, amount));
            }
        }
    }

    /// Block until `weight` request-weight units (and, if `is_order`, one
    /// order slot) can be spent without violating any loaded rule, then
    /// record the call (spec §4.2).
    pub async fn throttle(&self, weight: u32, is_order: bool) {
        loop {
            let wait = self.wait_needed(weight, is_order, Instant::now());
            if wait.is_zero() {
                break;
            }
            debug!(?wait, weight, is_order, "rate limiter sleeping before request");
            tokio::time::sleep(wait).await;
        }
        self.record(weight, is_order, Instant::now());
    }

    /// Harvest `X-MBX-USED-WEIGHT-*` / `X-MBX-ORDER-COUNT-*` response
    /// headers (case-insensitive keys) into the reported-usage map, used
    /// only for telemetry — it does not affect the sliding windows, which
    /// are maintained purely from calls this process has made.
    pub fn observe_headers<'a>(&self, headers: impl IntoIterator<Item = (&'a str, &'a str)>) {
        let mut usage = self.reported_usage.write();
        for (key, value) in headers {
            let lower = key.to_ascii_lowercase();
            if lower.starts_with("x-mbx-used-weight-") || lower.starts_with("x-mbx-order-count-") {
                if let Ok(v) = value.parse::<u32>() {
                    usage.insert(lower, v);
                } else {
                    warn!(header = %key, value, "failed to parse rate-limit usage header");
                }
            }
        }
    }

    /// Read-only telemetry view of the most recently reported usage values.
    pub fn reported_usage_snapshot(&self) -> HashMap<String, u32> {
        self.reported_usage.read().clone()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_applied_until_rules_loaded() {
        let limiter = RateLimiter::new();
        assert!(!limiter.rules_loaded_from_exchange());
        assert_eq!(limiter.rules.read().len(), 3);
    }

    #[test]
    fn load_rules_replaces_defaults() {
        let limiter = RateLimiter::new();
        limiter.load_rules(vec![RateLimitRule::new(
            RuleKind::RequestWeight,
            RuleInterval::Minute,
            1,
            10,
        )]);
        assert!(limiter.rules_loaded_from_exchange());
        assert_eq!(limiter.rules.read().len(), 1);
    }

    #[test]
    fn wait_needed_is_zero_under_limit() {
        let limiter = RateLimiter::new();
        let now = Instant::now();
        assert_eq!(limiter.wait_needed(10, false, now), Duration::ZERO);
    }

    #[test]
    fn wait_needed_positive_once_weight_exhausted() {
        let limiter = RateLimiter::new();
        limiter.load_rules(vec![RateLimitRule::new(
            RuleKind::RequestWeight,
            RuleInterval::Minute,
            1,
            100,
        )]);
        let now = Instant::now();
        limiter.record(100, false, now);
        let wait = limiter.wait_needed(1, false, now);
        assert!(wait > Duration::ZERO);
    }

    #[test]
    fn expired_entries_are_trimmed() {
        let limiter = RateLimiter::new();
        limiter.load_rules(vec![RateLimitRule::new(
            RuleKind::RequestWeight,
            RuleInterval::Second,
            1,
            10,
        )]);
        let t0 = Instant::now();
        limiter.record(10, false, t0);
        let later = t0 + Duration::from_secs(2);
        assert_eq!(limiter.wait_needed(10, false, later), Duration::ZERO);
    }

    #[test]
    fn orders_rule_ignores_non_order_calls() {
        let limiter = RateLimiter::new();
        limiter.load_rules(vec![RateLimitRule::new(
            RuleKind::Orders,
            RuleInterval::Second,
            1,
            1,
        )]);
        let now = Instant::now();
        limiter.record(1, false, now);
        // is_order=false never contributes to the Orders rule, so no wait.
        assert_eq!(limiter.wait_needed(1, false, now), Duration::ZERO);
    }

    #[test]
    fn observe_headers_is_case_insensitive() {
        let limiter = RateLimiter::new();
        limiter.observe_headers([("X-MBX-USED-WEIGHT-1M", "42")]);
        let snap = limiter.reported_usage_snapshot();
        assert_eq!(snap.get("x-mbx-used-weight-1m"), Some(&42));
    }

    #[tokio::test]
    async fn throttle_returns_immediately_under_limit() {
        let limiter = RateLimiter::new();
        tokio::time::timeout(Duration::from_millis(100), limiter.throttle(1, false))
            .await
            .expect("should not block");
    }
}
