//! WebSocket stream of export progress.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::metrics::{WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_LAG_EVENTS, WS_MESSAGES_SENT};
use crate::state::AppState;

/// Optional subscription filter.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Only forward updates for this ticket set.
    pub ticket_set_id: Option<String>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.ticket_set_id))
}

/// Handle a single WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, filter: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    let mut rx = state.progress().subscribe();

    WS_CONNECTIONS_TOTAL.inc();
    WS_CONNECTIONS_ACTIVE.inc();

    info!(ticket_set_id = ?filter, "WebSocket client connected");

    // Forward progress updates to this client
    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(update) => {
                    if filter
                        .as_deref()
                        .is_some_and(|set| set != update.ticket_set_id)
                    {
                        continue;
                    }
                    match serde_json::to_string(&update) {
                        Ok(json) => {
                            if sender.send(Message::Text(json.into())).await.is_err() {
                                debug!("WebSocket send failed, client disconnected");
                                break;
                            }
                            WS_MESSAGES_SENT.inc();
                        }
                        Err(e) => {
                            error!("Failed to serialize progress update: {}", e);
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("WebSocket client lagged, skipped {} updates", n);
                    WS_LAG_EVENTS.inc();
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Progress channel closed");
                    break;
                }
            }
        }
    });

    // Client messages are only used to detect close
    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                debug!("WebSocket client requested close");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket receive error: {}", e);
                break;
            }
        }
    }

    send_task.abort();
    WS_CONNECTIONS_ACTIVE.dec();
    info!("WebSocket client disconnected");
}
