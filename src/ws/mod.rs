// =============================================================================
// WS Transport (C4) — framed combined-stream connection, subscribe control
// plane, heartbeats, session refresh, rate caps
// =============================================================================
//
// Generalizes `market_data/trade_stream.rs`/`market_data/orderbook.rs`'s
// connect_async → split → read-loop shape from a single bare stream into a
// supervised actor: one long-lived task owns the socket, a command channel
// carries `connect`/`disconnect`/`dispose` requests in, and a `watch`
// channel reports status transitions out (spec §9's "cooperative tasks with
// bounded channels" in place of the teacher's ad hoc reconnect-loop-per-task
// style, since here a single connection multiplexes every stream).
// =============================================================================

pub mod state;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use crate::clock::{BackoffConfig, BackoffOutcome, ExponentialBackoff, NetworkClass};
use crate::model::StreamKind;

pub use state::{classify_server_error_code, ConnectionStatus, ServerErrorAction};

const OUTGOING_CAP_PER_SEC: u32 = 5;

/// `{symbol_lower}@{suffix}` stream-name grammar (spec §6).
pub fn stream_name(symbol: &str, kind: StreamKind) -> String {
    format!("{}@{}", symbol.to_lowercase(), kind.suffix())
}

/// Inverse of [`stream_name`]. Returns the lowercase symbol as it appeared
/// in the stream name, not uppercased — callers that need the canonical
/// `TradeEvent.market` form normalize separately.
pub fn parse_stream_name(name: &str) -> Option<(String, StreamKind)> {
    let (symbol, suffix) = name.split_once('@')?;
    let kind = match suffix {
        "aggTrade" => StreamKind::AggTrade,
        "ticker" => StreamKind::Ticker,
        "bookTicker" => StreamKind::BookTicker,
        "depth5" => StreamKind::Depth5,
        _ => return None,
    };
    Some((symbol.to_string(), kind))
}

fn control_frame(method: &str, params: &[String], id: u64) -> String {
    json!({"method": method, "params": params, "id": id}).to_string()
}

#[derive(Debug, Clone)]
pub struct WsConfig {
    pub base_url: String,
    pub pong_timeout: Duration,
    pub incoming_budget_per_sec: u32,
    pub session_refresh: Duration,
    pub backoff: BackoffConfig,
    pub max_subscriptions: usize,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            base_url: "wss://fstream.binance.com/stream".to_string(),
            pong_timeout: Duration::from_secs(70),
            incoming_budget_per_sec: 10,
            session_refresh: Duration::from_secs(23 * 3600 + 55 * 60),
            backoff: BackoffConfig::default(),
            max_subscriptions: 1024,
        }
    }
}

/// Sliding-window cap on outgoing control frames (spec §4.4: at most 5 per
/// rolling 1s; excess is dropped, never queued).
struct OutgoingLimiter {
    cap: u32,
    recent: Mutex<VecDeque<Instant>>,
}

impl OutgoingLimiter {
    fn new(cap: u32) -> Self {
        Self {
            cap,
            recent: Mutex::new(VecDeque::new()),
        }
    }

    fn try_acquire(&self, now: Instant) -> bool {
        let mut recent = self.recent.lock();
        while let Some(front) = recent.front() {
            if now.duration_since(*front) > Duration::from_secs(1) {
                recent.pop_front();
            } else {
                break;
            }
        }
        if recent.len() as u32 >= self.cap {
            false
        } else {
            recent.push_back(now);
            true
        }
    }
}

enum Command {
    Connect(Vec<String>),
    Disconnect,
    Dispose,
}

/// Why the inner read loop broke out of its connection, driving the
/// subsequent status transition and whether backoff applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakReason {
    Disposed,
    Disconnected,
    ResubscribeRequested,
    PongTimeout,
    ServerError,
    RateLimited,
    SessionRefresh,
    StreamEnded,
}

/// Owns exactly one connection to the combined-stream endpoint (spec §4.4).
pub struct WsTransport {
    config: WsConfig,
    status_rx: watch::Receiver<ConnectionStatus>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    frame_rx: Mutex<Option<mpsc::UnboundedReceiver<Value>>>,
    last_message_at: Arc<RwLock<Instant>>,
    last_symbols: Arc<RwLock<Vec<String>>>,
    incoming_count: Arc<AtomicU64>,
    incoming_budget_exceeded: Arc<AtomicU64>,
    outgoing_dropped: Arc<AtomicU64>,
    connected_at_ms: Arc<AtomicI64>,
    supervisor: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WsTransport {
    pub fn new(config: WsConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let last_message_at = Arc::new(RwLock::new(Instant::now()));
        let last_symbols = Arc::new(RwLock::new(Vec::new()));
        let incoming_count = Arc::new(AtomicU64::new(0));
        let incoming_budget_exceeded = Arc::new(AtomicU64::new(0));
        let outgoing_dropped = Arc::new(AtomicU64::new(0));
        let connected_at_ms = Arc::new(AtomicI64::new(0));

        let supervisor = tokio::spawn(supervisor_loop(
            config.clone(),
            cmd_rx,
            status_tx,
            frame_tx,
            last_message_at.clone(),
            last_symbols.clone(),
            incoming_count.clone(),
            incoming_budget_exceeded.clone(),
            outgoing_dropped.clone(),
            connected_at_ms.clone(),
        ));

        Self {
            config,
            status_rx,
            cmd_tx,
            frame_rx: Mutex::new(Some(frame_rx)),
            last_message_at,
            last_symbols,
            incoming_count,
            incoming_budget_exceeded,
            outgoing_dropped,
            connected_at_ms,
            supervisor: Mutex::new(Some(supervisor)),
        }
    }

    /// Open (or re-open, closing any previous state first) a connection
    /// subscribed to `symbols` across the four stream kinds this core
    /// understands. Returns once the request has been enqueued — actual
    /// connect and `Connected` transition happen asynchronously.
    pub fn connect(&self, symbols: Vec<String>) {
        let _ = self.cmd_tx.send(Command::Connect(symbols));
    }

    /// Close the sink, cancel timers, transition to `Disconnected`. The
    /// transport can be reconnected afterward via `connect`.
    pub fn disconnect(&self) {
        let _ = self.cmd_tx.send(Command::Disconnect);
    }

    /// Idempotent teardown: cancels the supervisor task tree and awaits it.
    pub async fn dispose(&self) {
        let _ = self.cmd_tx.send(Command::Dispose);
        if let Some(handle) = self.supervisor.lock().take() {
            let _ = handle.await;
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    pub fn status_stream(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Takes ownership of the raw-frame receiver. Returns `None` if already
    /// taken — there is only ever one consumer (the orchestrator's decode
    /// loop).
    pub fn take_frame_receiver(&self) -> Option<mpsc::UnboundedReceiver<Value>> {
        self.frame_rx.lock().take()
    }

    pub fn last_message_age(&self) -> Duration {
        self.last_message_at.read().elapsed()
    }

    pub fn last_symbols(&self) -> Vec<String> {
        self.last_symbols.read().clone()
    }

    pub fn incoming_count(&self) -> u64 {
        self.incoming_count.load(Ordering::Relaxed)
    }

    pub fn incoming_budget_exceeded_count(&self) -> u64 {
        self.incoming_budget_exceeded.load(Ordering::Relaxed)
    }

    pub fn outgoing_dropped_count(&self) -> u64 {
        self.outgoing_dropped.load(Ordering::Relaxed)
    }

    /// Milliseconds since the current session was established, or `None`
    /// when disconnected. Used by the orchestrator's session-age tick
    /// (spec §4.10).
    pub fn session_age_ms(&self, now_ms: i64) -> Option<i64> {
        let started = self.connected_at_ms.load(Ordering::Relaxed);
        if started <= 0 {
            None
        } else {
            Some(now_ms - started)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn supervisor_loop(
    config: WsConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    status_tx: watch::Sender<ConnectionStatus>,
    frame_tx: mpsc::UnboundedSender<Value>,
    last_message_at: Arc<RwLock<Instant>>,
    last_symbols: Arc<RwLock<Vec<String>>>,
    incoming_count: Arc<AtomicU64>,
    incoming_budget_exceeded: Arc<AtomicU64>,
    outgoing_dropped: Arc<AtomicU64>,
    connected_at_ms: Arc<AtomicI64>,
) {
    let mut current_symbols: Vec<String> = Vec::new();
    let mut backoff = ExponentialBackoff::new(config.backoff);
    let outgoing = OutgoingLimiter::new(OUTGOING_CAP_PER_SEC);
    let mut rng = StdRng::from_entropy();
    let mut control_id: u64 = 1;

    'outer: loop {
        // Idle until told to connect (or torn down).
        loop {
            match cmd_rx.recv().await {
                Some(Command::Connect(symbols)) => {
                    current_symbols = symbols;
                    *last_symbols.write() = current_symbols.clone();
                    break;
                }
                Some(Command::Disconnect) => {
                    let _ = status_tx.send(ConnectionStatus::Disconnected);
                    continue;
                }
                Some(Command::Dispose) | None => {
                    let _ = status_tx.send(ConnectionStatus::Disconnected);
                    return;
                }
            }
        }

        'connection: loop {
            let _ = status_tx.send(ConnectionStatus::Connecting);

            let mut streams: Vec<String> = Vec::new();
            'build: for symbol in &current_symbols {
                for kind in [
                    StreamKind::AggTrade,
                    StreamKind::Ticker,
                    StreamKind::BookTicker,
                    StreamKind::Depth5,
                ] {
                    if streams.len() >= config.max_subscriptions {
                        break 'build;
                    }
                    streams.push(stream_name(symbol, kind));
                }
            }

            let url = format!("{}?streams={}", config.base_url, streams.join("/"));
            let connect_result = connect_async(&url).await;

            let (mut sink, mut read) = match connect_result {
                Ok((ws_stream, _response)) => {
                    info!(streams = streams.len(), "WS transport connected");
                    ws_stream.split()
                }
                Err(e) => {
                    warn!(error = %e, "WS transport connect failed");
                    if !apply_backoff(&mut backoff, &status_tx, &mut rng).await {
                        return;
                    }
                    continue 'connection;
                }
            };

            backoff.reset();
            *last_message_at.write() = Instant::now();
            connected_at_ms.store(now_ms(), Ordering::Relaxed);

            control_id += 1;
            if outgoing.try_acquire(Instant::now()) {
                let frame = control_frame("SUBSCRIBE", &streams, control_id);
                if sink.send(WsMessage::Text(frame)).await.is_err() {
                    warn!("failed to send SUBSCRIBE frame, will reconnect");
                    let _ = sink.close().await;
                    if !apply_backoff(&mut backoff, &status_tx, &mut rng).await {
                        return;
                    }
                    continue 'connection;
                }
            } else {
                outgoing_dropped.fetch_add(1, Ordering::Relaxed);
                let _ = status_tx.send(ConnectionStatus::RateLimited);
            }

            let _ = status_tx.send(ConnectionStatus::Connected);

            let mut liveness = tokio::time::interval(Duration::from_secs(1));
            let session_deadline = Instant::now() + config.session_refresh;
            let mut window_start = Instant::now();
            let mut window_count: u32 = 0;

            let reason: BreakReason = loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => {
                        match cmd {
                            Some(Command::Connect(symbols)) => {
                                current_symbols = symbols;
                                *last_symbols.write() = current_symbols.clone();
                                break BreakReason::ResubscribeRequested;
                            }
                            Some(Command::Disconnect) => break BreakReason::Disconnected,
                            Some(Command::Dispose) | None => break BreakReason::Disposed,
                        }
                    }
                    msg = read.next() => {
                        match msg {
                            Some(Ok(WsMessage::Text(text))) => {
                                *last_message_at.write() = Instant::now();
                                incoming_count.fetch_add(1, Ordering::Relaxed);

                                let now = Instant::now();
                                if now.duration_since(window_start) > Duration::from_secs(1) {
                                    window_start = now;
                                    window_count = 0;
                                }
                                window_count += 1;
                                if window_count > config.incoming_budget_per_sec {
                                    incoming_budget_exceeded.fetch_add(1, Ordering::Relaxed);
                                    warn!(count = window_count, "incoming message budget exceeded");
                                }

                                match serde_json::from_str::<Value>(&text) {
                                    Ok(value) => {
                                        if let Some(code) = value.get("code").and_then(Value::as_i64) {
                                            match classify_server_error_code(code) {
                                                ServerErrorAction::Reconnect => break BreakReason::ServerError,
                                                ServerErrorAction::RateLimit => break BreakReason::RateLimited,
                                                ServerErrorAction::Informational | ServerErrorAction::Ignore => {
                                                    debug!(code, "server-reported code on frame, connection preserved");
                                                }
                                            }
                                        }
                                        let _ = frame_tx.send(value);
                                    }
                                    Err(e) => {
                                        debug!(error = %e, "failed to parse inbound WS frame as JSON");
                                    }
                                }
                            }
                            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {
                                *last_message_at.write() = Instant::now();
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break BreakReason::StreamEnded,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(error = %e, "WS transport read error");
                                break BreakReason::StreamEnded;
                            }
                        }
                    }
                    _ = liveness.tick() => {
                        if last_message_at.read().elapsed() > config.pong_timeout {
                            break BreakReason::PongTimeout;
                        }
                        if Instant::now() >= session_deadline {
                            break BreakReason::SessionRefresh;
                        }
                    }
                }
            };

            let _ = sink.close().await;
            connected_at_ms.store(0, Ordering::Relaxed);

            match reason {
                BreakReason::Disposed => {
                    let _ = status_tx.send(ConnectionStatus::Disconnected);
                    return;
                }
                BreakReason::Disconnected => {
                    let _ = status_tx.send(ConnectionStatus::Disconnected);
                    continue 'outer;
                }
                BreakReason::PongTimeout => {
                    let _ = status_tx.send(ConnectionStatus::PongTimeout);
                }
                BreakReason::ServerError => {
                    let _ = status_tx.send(ConnectionStatus::ServerError);
                }
                BreakReason::RateLimited => {
                    let _ = status_tx.send(ConnectionStatus::RateLimited);
                }
                BreakReason::ResubscribeRequested
                | BreakReason::SessionRefresh
                | BreakReason::StreamEnded => {
                    let _ = status_tx.send(ConnectionStatus::Reconnecting);
                }
            }

            // Resubscribe requests reconnect immediately with the new
            // symbol set; every other break goes through backoff first.
            if reason != BreakReason::ResubscribeRequested
                && !apply_backoff(&mut backoff, &status_tx, &mut rng).await
            {
                return;
            }
        }
    }
}

/// Runs one backoff step, sleeping as appropriate. Returns `false` when the
/// backoff was cancelled and the supervisor should exit entirely.
async fn apply_backoff(
    backoff: &mut ExponentialBackoff,
    status_tx: &watch::Sender<ConnectionStatus>,
    rng: &mut impl Rng,
) -> bool {
    match backoff.next_delay(Instant::now(), NetworkClass::Wired, rng) {
        BackoffOutcome::Delay(d) => {
            sleep(d).await;
            true
        }
        BackoffOutcome::CoolDown(d) => {
            let _ = status_tx.send(ConnectionStatus::Banned);
            sleep(d).await;
            true
        }
        BackoffOutcome::Cancelled => {
            let _ = status_tx.send(ConnectionStatus::Disconnected);
            false
        }
    }
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_name_round_trips_for_every_kind() {
        for kind in [
            StreamKind::AggTrade,
            StreamKind::Ticker,
            StreamKind::BookTicker,
            StreamKind::Depth5,
        ] {
            let name = stream_name("btcusdt", kind);
            let (symbol, parsed_kind) = parse_stream_name(&name).expect("should parse");
            assert_eq!(symbol, "btcusdt");
            assert_eq!(parsed_kind, kind);
            assert_eq!(stream_name(&symbol, parsed_kind), name);
        }
    }

    #[test]
    fn stream_name_lowercases_symbol() {
        assert_eq!(stream_name("BTCUSDT", StreamKind::AggTrade), "btcusdt@aggTrade");
    }

    #[test]
    fn parse_stream_name_rejects_unknown_suffix() {
        assert!(parse_stream_name("btcusdt@markPrice").is_none());
    }

    #[test]
    fn control_frame_carries_method_params_and_id() {
        let frame = control_frame("SUBSCRIBE", &["btcusdt@aggTrade".to_string()], 7);
        let value: Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["method"], "SUBSCRIBE");
        assert_eq!(value["id"], 7);
        assert_eq!(value["params"][0], "btcusdt@aggTrade");
    }

    #[test]
    fn outgoing_limiter_caps_at_five_per_second() {
        let limiter = OutgoingLimiter::new(5);
        let t0 = Instant::now();
        for _ in 0..5 {
            assert!(limiter.try_acquire(t0));
        }
        assert!(!limiter.try_acquire(t0));
    }

    #[test]
    fn outgoing_limiter_recovers_after_window() {
        let limiter = OutgoingLimiter::new(1);
        let t0 = Instant::now();
        assert!(limiter.try_acquire(t0));
        assert!(!limiter.try_acquire(t0));
        let later = t0 + Duration::from_millis(1100);
        assert!(limiter.try_acquire(later));
    }

    #[tokio::test]
    async fn new_transport_starts_disconnected() {
        let transport = WsTransport::new(WsConfig::default());
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
        transport.dispose().await;
    }

    #[tokio::test]
    async fn dispose_is_idempotent_and_reports_disconnected() {
        let transport = WsTransport::new(WsConfig::default());
        transport.dispose().await;
        transport.dispose().await;
        assert_eq!(transport.status(), ConnectionStatus::Disconnected);
    }
}
