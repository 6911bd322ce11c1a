// =============================================================================
// Engine Configuration — defaulted settings loadable from environment
// =============================================================================
//
// Grounded on `runtime_config.rs`'s defaulted-serde-struct pattern: every
// tunable carries `#[serde(default = "...")]` so a host can serialize a
// partial config and still get sane values for everything else. Unlike the
// teacher's config, this one has no file persistence (Non-goals: no
// persistent on-disk state) — it loads from environment variables and
// defaults only.
// =============================================================================

use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_rest_base_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_testnet_rest_base_url() -> String {
    "https://testnet.binancefuture.com".to_string()
}

fn default_ws_base_url() -> String {
    "wss://fstream.binance.com/stream".to_string()
}

fn default_testnet_ws_base_url() -> String {
    "wss://stream.binancefuture.com/stream".to_string()
}

fn default_fallback_symbols() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "SOLUSDT".to_string(),
        "XRPUSDT".to_string(),
    ]
}

fn default_aggtrade_top_n() -> usize {
    20
}

fn default_ticker_mid_tier() -> usize {
    30
}

fn default_ws_max_subscriptions() -> usize {
    1024
}

fn default_pong_timeout_secs() -> u64 {
    70
}

fn default_incoming_budget_per_sec() -> u32 {
    10
}

fn default_session_refresh_secs() -> u64 {
    23 * 3600 + 55 * 60
}

fn default_merge_window_ms() -> i64 {
    500
}

fn default_ticker_window_ms() -> i64 {
    1000
}

fn default_aggregator_flush_interval_ms() -> u64 {
    100
}

fn default_repository_publish_interval_ms() -> u64 {
    100
}

fn default_event_bus_max_messages_per_second() -> u32 {
    1000
}

fn default_analysis_interval_ms() -> u64 {
    2000
}

fn default_prediction_interval_ms() -> u64 {
    5000
}

fn default_janitor_interval_ms() -> u64 {
    30_000
}

fn default_health_check_interval_ms() -> u64 {
    30_000
}

fn default_session_age_check_interval_ms() -> u64 {
    5 * 60 * 1000
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

/// Central configuration for the ingestion/analytics core (spec §6, §5).
/// Loaded from environment variables at startup; no on-disk persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// `true` routes REST/WS calls at Binance's testnet endpoints.
    #[serde(default)]
    pub testnet: bool,

    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
    #[serde(default = "default_testnet_rest_base_url")]
    pub testnet_rest_base_url: String,
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,
    #[serde(default = "default_testnet_ws_base_url")]
    pub testnet_ws_base_url: String,

    /// Symbols to discover via bootstrap; empty means "ask REST for the
    /// top quote-volume USDT perpetuals". Used verbatim as the fallback
    /// list on repeated bootstrap failure (spec §7).
    #[serde(default = "default_fallback_symbols")]
    pub fallback_symbols: Vec<String>,

    /// Number of top-by-volume symbols that receive aggTrade/bookTicker/
    /// depth5 subscriptions (spec §6 subscription tiering, "conservative"
    /// profile default).
    #[serde(default = "default_aggtrade_top_n")]
    pub aggtrade_top_n: usize,
    /// Additional ticker-only mid-tier symbols beyond `aggtrade_top_n`.
    #[serde(default = "default_ticker_mid_tier")]
    pub ticker_mid_tier: usize,
    #[serde(default = "default_ws_max_subscriptions")]
    pub ws_max_subscriptions: usize,

    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
    #[serde(default = "default_incoming_budget_per_sec")]
    pub incoming_budget_per_sec: u32,
    #[serde(default = "default_session_refresh_secs")]
    pub session_refresh_secs: u64,

    #[serde(default = "default_merge_window_ms")]
    pub merge_window_ms: i64,
    #[serde(default = "default_ticker_window_ms")]
    pub ticker_window_ms: i64,
    #[serde(default = "default_true")]
    pub weighted_pricing: bool,
    #[serde(default)]
    pub replace_immediate: bool,
    #[serde(default = "default_aggregator_flush_interval_ms")]
    pub aggregator_flush_interval_ms: u64,

    #[serde(default = "default_repository_publish_interval_ms")]
    pub repository_publish_interval_ms: u64,
    #[serde(default = "default_event_bus_max_messages_per_second")]
    pub event_bus_max_messages_per_second: u32,

    #[serde(default = "default_analysis_interval_ms")]
    pub analysis_interval_ms: u64,
    #[serde(default = "default_prediction_interval_ms")]
    pub prediction_interval_ms: u64,

    #[serde(default = "default_janitor_interval_ms")]
    pub janitor_interval_ms: u64,
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,
    #[serde(default = "default_session_age_check_interval_ms")]
    pub session_age_check_interval_ms: u64,

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            testnet: false,
            rest_base_url: default_rest_base_url(),
            testnet_rest_base_url: default_testnet_rest_base_url(),
            ws_base_url: default_ws_base_url(),
            testnet_ws_base_url: default_testnet_ws_base_url(),
            fallback_symbols: default_fallback_symbols(),
            aggtrade_top_n: default_aggtrade_top_n(),
            ticker_mid_tier: default_ticker_mid_tier(),
            ws_max_subscriptions: default_ws_max_subscriptions(),
            pong_timeout_secs: default_pong_timeout_secs(),
            incoming_budget_per_sec: default_incoming_budget_per_sec(),
            session_refresh_secs: default_session_refresh_secs(),
            merge_window_ms: default_merge_window_ms(),
            ticker_window_ms: default_ticker_window_ms(),
            weighted_pricing: true,
            replace_immediate: false,
            aggregator_flush_interval_ms: default_aggregator_flush_interval_ms(),
            repository_publish_interval_ms: default_repository_publish_interval_ms(),
            event_bus_max_messages_per_second: default_event_bus_max_messages_per_second(),
            analysis_interval_ms: default_analysis_interval_ms(),
            prediction_interval_ms: default_prediction_interval_ms(),
            janitor_interval_ms: default_janitor_interval_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            session_age_check_interval_ms: default_session_age_check_interval_ms(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl EngineConfig {
    /// Load defaults, then apply environment overrides, mirroring
    /// `main.rs`'s `AURORA_SYMBOLS` / `AURORA_BIND_ADDR` idiom.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("INGEST_TESTNET") {
            cfg.testnet = v.eq_ignore_ascii_case("true") || v == "1";
        }
        if let Ok(syms) = std::env::var("INGEST_SYMBOLS") {
            let parsed: Vec<String> = syms
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
            if !parsed.is_empty() {
                cfg.fallback_symbols = parsed;
            }
        }
        if let Ok(addr) = std::env::var("INGEST_BIND_ADDR") {
            cfg.bind_addr = addr;
        }
        if let Ok(n) = std::env::var("INGEST_AGGTRADE_TOP_N") {
            if let Ok(n) = n.parse() {
                cfg.aggtrade_top_n = n;
            }
        }

        cfg
    }

    pub fn active_rest_base_url(&self) -> &str {
        if self.testnet {
            &self.testnet_rest_base_url
        } else {
            &self.rest_base_url
        }
    }

    pub fn active_ws_base_url(&self) -> &str {
        if self.testnet {
            &self.testnet_ws_base_url
        } else {
            &self.ws_base_url
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_picks_mainnet_urls() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.active_rest_base_url(), "https://fapi.binance.com");
        assert_eq!(cfg.active_ws_base_url(), "wss://fstream.binance.com/stream");
    }

    #[test]
    fn testnet_flag_switches_both_endpoints() {
        let mut cfg = EngineConfig::default();
        cfg.testnet = true;
        assert_eq!(cfg.active_rest_base_url(), "https://testnet.binancefuture.com");
        assert_eq!(cfg.active_ws_base_url(), "wss://stream.binancefuture.com/stream");
    }

    #[test]
    fn default_fallback_symbols_are_non_empty_uppercase() {
        let cfg = EngineConfig::default();
        assert!(!cfg.fallback_symbols.is_empty());
        for s in &cfg.fallback_symbols {
            assert_eq!(s, &s.to_uppercase());
        }
    }
}
