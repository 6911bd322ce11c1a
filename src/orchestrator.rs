// =============================================================================
// Orchestrator (C10) — connection lifecycle, health checks, automatic reconnect
// =============================================================================
//
// Generalizes `main.rs`'s per-stream `loop { connect; on error log + sleep(5s) }`
// idiom into a single supervising task that drives one `WsTransport` instead
// of one reconnect loop per symbol, and translates its status stream into
// the health/session-age bookkeeping spec §4.10 calls for.
// =============================================================================

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::event_bus::EventBus;
use crate::model::MarketInfo;
use crate::rest::RestClient;
use crate::ws::{ConnectionStatus, WsConfig, WsTransport};

const RECONNECT_DELAY_ON_DEGRADATION: Duration = Duration::from_secs(5);
const HEALTH_STALE_THRESHOLD: Duration = Duration::from_secs(2 * 60);
const SESSION_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// Bootstrap-then-drive state machine (spec §4.10). Owns the WS transport
/// and the background tasks that translate its status into reconnects,
/// health flags, and session-age checks.
pub struct Orchestrator {
    config: Arc<EngineConfig>,
    rest: Arc<RestClient>,
    transport: Arc<WsTransport>,
    retry_count: AtomicU32,
    session_started_ms: AtomicI64,
    healthy: AtomicBool,
    markets: Mutex<Vec<MarketInfo>>,
}

impl Orchestrator {
    pub fn new(config: Arc<EngineConfig>, rest: Arc<RestClient>) -> Self {
        let ws_config = WsConfig {
            base_url: config.active_ws_base_url().to_string(),
            pong_timeout: Duration::from_secs(config.pong_timeout_secs),
            incoming_budget_per_sec: config.incoming_budget_per_sec,
            session_refresh: Duration::from_secs(config.session_refresh_secs),
            backoff: crate::clock::BackoffConfig::default(),
            max_subscriptions: config.ws_max_subscriptions,
        };
        Self {
            config,
            rest,
            transport: Arc::new(WsTransport::new(ws_config)),
            retry_count: AtomicU32::new(0),
            session_started_ms: AtomicI64::new(0),
            healthy: AtomicBool::new(false),
            markets: Mutex::new(Vec::new()),
        }
    }

    pub fn transport(&self) -> Arc<WsTransport> {
        self.transport.clone()
    }

    /// Discover symbols via REST (spec §4.3), falling back to the
    /// configured static list when bootstrap fails (spec §7), then drive
    /// the transport to `connect(symbols)` and spawn the translation/health
    /// tasks. Returns once the initial connect has been requested.
    pub async fn start(self: &Arc<Self>) -> Vec<String> {
        let symbols = self.bootstrap().await;
        self.transport.connect(symbols.clone());

        self.spawn_status_translator();
        self.spawn_health_tick();
        self.spawn_session_age_tick();

        symbols
    }

    async fn bootstrap(&self) -> Vec<String> {
        match self.rest.fetch_exchange_info().await {
            Ok(markets) => {
                *self.markets.lock().await = markets;
            }
            Err(e) => {
                warn!(error = %e, "exchangeInfo bootstrap failed, falling back to static symbol list");
                return self.config.fallback_symbols.clone();
            }
        }

        match self.rest.fetch_ticker_24hr().await {
            Ok(body) => self.rank_symbols(&body),
            Err(e) => {
                warn!(error = %e, "ticker/24hr bootstrap failed, falling back to static symbol list");
                self.config.fallback_symbols.clone()
            }
        }
    }

    /// USDT-quoted symbols ranked by 24h quote volume descending, capped by
    /// the configured tier sizes (spec §6).
    fn rank_symbols(&self, body: &serde_json::Value) -> Vec<String> {
        let mut ranked: Vec<(String, f64)> = body
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| {
                        let symbol = v.get("symbol")?.as_str()?.to_string();
                        if !symbol.ends_with("USDT") {
                            return None;
                        }
                        let volume: f64 = v
                            .get("quoteVolume")
                            .and_then(|q| q.as_str())
                            .and_then(|s| s.parse().ok())
                            .unwrap_or(0.0);
                        Some((symbol, volume))
                    })
                    .collect()
            })
            .unwrap_or_default();

        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

        let total_tier = self.config.aggtrade_top_n + self.config.ticker_mid_tier;
        let symbols: Vec<String> = ranked.into_iter().take(total_tier).map(|(s, _)| s).collect();

        if symbols.is_empty() {
            self.config.fallback_symbols.clone()
        } else {
            symbols
        }
    }

    fn spawn_status_translator(self: &Arc<Self>) {
        let this = self.clone();
        let mut status_rx = self.transport.status_stream();
        tokio::spawn(async move {
            loop {
                if status_rx.changed().await.is_err() {
                    return;
                }
                let status = *status_rx.borrow();
                match status {
                    ConnectionStatus::Connected => {
                        this.retry_count.store(0, Ordering::Relaxed);
                        this.session_started_ms.store(now_ms(), Ordering::Relaxed);
                        this.healthy.store(true, Ordering::Relaxed);
                        info!("orchestrator observed transport connected");
                    }
                    ConnectionStatus::PongTimeout | ConnectionStatus::ServerError => {
                        this.healthy.store(false, Ordering::Relaxed);
                        warn!(?status, "transport degraded, reconnect scheduled");
                        let transport = this.transport.clone();
                        let symbols = transport.last_symbols();
                        tokio::spawn(async move {
                            tokio::time::sleep(RECONNECT_DELAY_ON_DEGRADATION).await;
                            transport.connect(symbols);
                        });
                    }
                    ConnectionStatus::Reconnecting => {
                        this.retry_count.fetch_add(1, Ordering::Relaxed);
                        this.healthy.store(false, Ordering::Relaxed);
                    }
                    ConnectionStatus::Disconnected => {
                        this.healthy.store(false, Ordering::Relaxed);
                        this.session_started_ms.store(0, Ordering::Relaxed);
                        return;
                    }
                    _ => {
                        this.healthy.store(false, Ordering::Relaxed);
                    }
                }
            }
        });
    }

    fn spawn_health_tick(self: &Arc<Self>) {
        let this = self.clone();
        let interval = Duration::from_millis(self.config.health_check_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let status = this.transport.status();
                let stale = this.transport.last_message_age() > HEALTH_STALE_THRESHOLD;
                let healthy = status.is_connected() && !stale && status != ConnectionStatus::RateLimited;
                this.healthy.store(healthy, Ordering::Relaxed);
                if !healthy {
                    warn!(?status, stale, "orchestrator health tick flags unhealthy");
                }
            }
        });
    }

    fn spawn_session_age_tick(self: &Arc<Self>) {
        let this = self.clone();
        let interval = Duration::from_millis(self.config.session_age_check_interval_ms);
        let refresh = Duration::from_secs(this.config.session_refresh_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Some(age_ms) = this.transport.session_age_ms(now_ms()) {
                    let age = Duration::from_millis(age_ms.max(0) as u64);
                    if refresh.saturating_sub(age) <= SESSION_REFRESH_MARGIN {
                        info!("session approaching 24h limit, forcing proactive reconnect");
                        let symbols = this.transport.last_symbols();
                        this.transport.connect(symbols);
                    }
                }
            }
        });
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Relaxed)
    }

    pub async fn markets(&self) -> Vec<MarketInfo> {
        self.markets.lock().await.clone()
    }

    pub async fn dispose(&self) {
        self.transport.dispose().await;
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
