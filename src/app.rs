// =============================================================================
// Engine State (app wiring) — constructs every subsystem and the periodic
// tasks that connect them
// =============================================================================
//
// Generalizes `app_state.rs`'s single-struct-of-`Arc`-handles wiring pattern:
// there it held trading subsystems built from `RuntimeConfig`; here it holds
// the ingestion/analytics pipeline built from `EngineConfig`, with the data
// flow spec §2 describes (Transport → Decoder → Bus → Repository →
// {Aggregator, Analytics}) wired up as a handful of cooperative tasks
// instead of each processor owning its own WS loop.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analytics::Analytics;
use crate::config::EngineConfig;
use crate::decoder;
use crate::event_bus::EventBus;
use crate::model::QuantAnalysis;
use crate::orchestrator::Orchestrator;
use crate::rate_limit::RateLimiter;
use crate::repository::Repository;
use crate::rest::RestClient;
use crate::ws::ConnectionStatus;

pub struct EngineState {
    pub config: Arc<EngineConfig>,
    pub event_bus: Arc<EventBus>,
    pub repository: Arc<Repository>,
    pub analytics: Arc<Analytics>,
    pub orchestrator: Arc<Orchestrator>,
    started_at_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub status: String,
    pub healthy: bool,
    pub retry_count: u32,
    pub uptime_ms: i64,
    pub tracked_symbols: usize,
    pub events_processed: u64,
    pub duplicates: u64,
    pub invalid: u64,
    pub bus_published: u64,
    pub bus_rate_limited: u64,
    pub analytics: Vec<QuantAnalysis>,
}

impl EngineState {
    /// Build every subsystem but do not yet start the orchestrator or any
    /// background task — callers call [`EngineState::run`] once they are
    /// ready to go live.
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let config = Arc::new(config);
        let limiter = Arc::new(RateLimiter::new());
        let rest = Arc::new(RestClient::with_base_url(
            config.active_rest_base_url().to_string(),
            limiter,
        ));

        let event_bus = Arc::new(EventBus::with_rate_cap(config.event_bus_max_messages_per_second));
        let aggregator = Arc::new(crate::aggregator::Aggregator::new(crate::aggregator::AggregatorConfig {
            merge_window_ms: config.merge_window_ms,
            ticker_window_ms: config.ticker_window_ms,
            weighted_pricing: config.weighted_pricing,
            replace_immediate: config.replace_immediate,
        }));
        let repository = Arc::new(Repository::new(aggregator));
        let analytics = Arc::new(Analytics::new());
        repository.set_analytics_sink(analytics.clone());

        let orchestrator = Arc::new(Orchestrator::new(config.clone(), rest));

        Arc::new(Self {
            config,
            event_bus,
            repository,
            analytics,
            orchestrator,
            started_at_ms: now_ms(),
        })
    }

    /// Bootstraps symbols, starts the WS transport, and spawns every
    /// periodic task described by spec §4/§5. Returns once everything has
    /// been spawned; the tasks themselves run for the lifetime of the
    /// process until `dispose`.
    pub async fn run(self: &Arc<Self>) {
        let symbols = self.orchestrator.start().await;
        info!(count = symbols.len(), "orchestrator bootstrapped symbol list");

        self.spawn_frame_decode_loop();
        self.spawn_bus_to_repository_loop();
        self.spawn_aggregator_flush_timer();
        self.spawn_repository_publish_timer();
        self.spawn_analysis_timer();
        self.spawn_prediction_timer();
        self.spawn_janitor_timer();
    }

    /// Pulls raw JSON frames off the transport, decodes them, and publishes
    /// the result to the event bus (spec §2's Transport → Decoder → Bus).
    fn spawn_frame_decode_loop(self: &Arc<Self>) {
        let this = self.clone();
        let Some(mut frame_rx) = this.orchestrator.transport().take_frame_receiver() else {
            warn!("frame receiver already taken, decode loop not started");
            return;
        };
        tokio::spawn(async move {
            while let Some(value) = frame_rx.recv().await {
                let now = now_ms();
                if let Some(event) = decoder::decode_frame(now, &value) {
                    this.event_bus.publish(event);
                }
            }
            debug!("frame decode loop ended: transport frame channel closed");
        });
    }

    /// Bus → Repository: the repository subscribes to the global topic and
    /// ingests every published event (spec §2: Bus → Repository).
    fn spawn_bus_to_repository_loop(self: &Arc<Self>) {
        let this = self.clone();
        let mut rx = this.event_bus.subscribe_global();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        this.repository.ingest(event);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "repository lagged behind event bus, oldest events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
        });
    }

    /// Drains the aggregator's merged output on a timer (default 100 ms);
    /// consumers reach it through [`Repository::watch_aggregated_trades`].
    fn spawn_aggregator_flush_timer(self: &Arc<Self>) {
        let this = self.clone();
        let interval = Duration::from_millis(this.config.aggregator_flush_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let flushed = this.repository.watch_aggregated_trades();
                if !flushed.is_empty() {
                    debug!(count = flushed.len(), "aggregator flush timer drained pending entries");
                }
            }
        });
    }

    /// Publishes the active filter-class batch on a timer (default 100 ms).
    fn spawn_repository_publish_timer(self: &Arc<Self>) {
        let this = self.clone();
        let interval = Duration::from_millis(this.config.repository_publish_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.repository.publish_batch();
            }
        });
    }

    /// Momentum/trend/liquidity/flow snapshot tick (default 2 s).
    fn spawn_analysis_timer(self: &Arc<Self>) {
        let this = self.clone();
        let interval = Duration::from_millis(this.config.analysis_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let snapshot = this.analytics.snapshot_all();
                debug!(count = snapshot.len(), "analysis tick");
            }
        });
    }

    /// Directional predictor tick (default 5 s).
    fn spawn_prediction_timer(self: &Arc<Self>) {
        let this = self.clone();
        let interval = Duration::from_millis(this.config.prediction_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let predictions = this.analytics.run_predictions(now_ms());
                debug!(count = predictions.len(), "prediction tick");
            }
        });
    }

    /// Memory-pressure tick (default 30 s, spec §5). The bounded
    /// collections this core owns (de-dup set, filter caches, outgoing
    /// rate windows) already self-trim on insert; this tick exists to log
    /// their sizes for observability, matching the spec's explicit janitor
    /// requirement.
    fn spawn_janitor_timer(self: &Arc<Self>) {
        let this = self.clone();
        let interval = Duration::from_millis(this.config.janitor_interval_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                debug!(
                    seen_ids = this.repository.seen_ids_len(),
                    tracked_symbols = this.analytics.tracked_symbol_count(),
                    "janitor tick"
                );
            }
        });
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let status = self.orchestrator.transport().status();
        EngineSnapshot {
            status: status.to_string(),
            healthy: self.orchestrator.is_healthy(),
            retry_count: self.orchestrator.retry_count(),
            uptime_ms: now_ms() - self.started_at_ms,
            tracked_symbols: self.analytics.tracked_symbol_count(),
            events_processed: self.repository.processed_count(),
            duplicates: self.repository.duplicate_count(),
            invalid: self.repository.invalid_count(),
            bus_published: self.event_bus.published_count(),
            bus_rate_limited: self.event_bus.rate_limited_count(),
            analytics: self.analytics.snapshot_all(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.orchestrator.transport().status()
    }

    pub async fn dispose(&self) {
        self.orchestrator.dispose().await;
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
