// =============================================================================
// WebSocket Handler — push-based engine snapshot updates
// =============================================================================
//
// Grounded on `api/ws.rs`'s push/recv `tokio::select!` loop: an immediate
// snapshot on connect, then further snapshots on a fixed interval whenever
// the repository's version counter has moved. No auth query parameter —
// this observability surface carries no private data.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::app::EngineState;

const PUSH_INTERVAL: Duration = Duration::from_millis(500);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<EngineState>>) -> impl IntoResponse {
    info!("observability WebSocket connection accepted");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(socket: WebSocket, state: Arc<EngineState>) {
    let (mut sender, mut receiver) = socket.split();

    let mut last_sent_version = u64::MAX;
    if let Err(e) = send_snapshot(&mut sender, &state, &mut last_sent_version).await {
        warn!(error = %e, "failed to send initial WS snapshot");
        return;
    }

    let mut push_interval = interval(PUSH_INTERVAL);

    loop {
        tokio::select! {
            _ = push_interval.tick() => {
                let current_version = state.repository.version();
                if current_version != last_sent_version {
                    if let Err(e) = send_snapshot(&mut sender, &state, &mut last_sent_version).await {
                        debug!(error = %e, "WS send failed, disconnecting");
                        break;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!(msg = %text, "observability WS text message ignored");
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        info!("observability WS close frame received");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "observability WS receive error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }
}

async fn send_snapshot<S>(
    sender: &mut S,
    state: &Arc<EngineState>,
    last_sent_version: &mut u64,
) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let snapshot = state.snapshot();
    *last_sent_version = state.repository.version();

    match serde_json::to_string(&snapshot) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "failed to serialize engine snapshot");
            Ok(())
        }
    }
}
