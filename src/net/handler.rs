//! WebSocket upgrade handler for the relay broker

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::net::protocol::RelayFrame;
use crate::net::room::RoomCode;
use crate::util::rate_limit::ConnectionRateLimiter;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Identifier the connecting instance wants to be reachable under
    pub id: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    match RoomCode::parse(&query.id) {
        Ok(id) => {
            info!(id = %id, "WebSocket upgrade for relay endpoint");
            ws.on_upgrade(move |socket| handle_socket(socket, id, state))
        }
        Err(e) => {
            warn!(error = %e, "Rejected relay id");
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, id: RoomCode, state: AppState) {
    let conn_id = Uuid::new_v4();
    let id = id.to_string();
    info!(conn_id = %conn_id, id = %id, "New relay connection");

    let (mut ws_sink, ws_stream) = socket.split();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel::<RelayFrame>();

    if let Err(e) = state.relay.register(&id, frame_tx.clone()) {
        warn!(conn_id = %conn_id, error = %e, "Relay registration failed");
        let _ = send_frame(
            &mut ws_sink,
            &RelayFrame::Error {
                message: e.to_string(),
            },
        )
        .await;
        let _ = ws_sink.close().await;
        return;
    }

    let _ = frame_tx.send(RelayFrame::Open { id: id.clone() });

    run_session(&id, conn_id, ws_sink, ws_stream, frame_tx, frame_rx, &state).await;

    // Cleanup on disconnect
    state.relay.unregister(&id);

    info!(conn_id = %conn_id, id = %id, "Relay connection closed");
}

/// Run the WebSocket session with read/write split
async fn run_session(
    id: &str,
    conn_id: Uuid,
    mut ws_sink: futures::stream::SplitSink<WebSocket, Message>,
    mut ws_stream: futures::stream::SplitStream<WebSocket>,
    frame_tx: mpsc::UnboundedSender<RelayFrame>,
    mut frame_rx: mpsc::UnboundedReceiver<RelayFrame>,
    state: &AppState,
) {
    let rate_limiter = ConnectionRateLimiter::new();

    // Spawn writer task: relay frames -> WebSocket
    let writer_handle = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = send_frame(&mut ws_sink, &frame).await {
                debug!(conn_id = %conn_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> registry
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_frame() {
                    warn!(conn_id = %conn_id, "Rate limited relay frame");
                    continue;
                }

                match serde_json::from_str::<RelayFrame>(&text) {
                    Ok(RelayFrame::Connect { to }) => {
                        let target = match RoomCode::parse(&to) {
                            Ok(code) => code.to_string(),
                            Err(e) => {
                                let _ = frame_tx.send(RelayFrame::Error {
                                    message: e.to_string(),
                                });
                                continue;
                            }
                        };
                        if let Err(e) = state.relay.link(id, &target) {
                            debug!(conn_id = %conn_id, error = %e, "Link request failed");
                            let _ = frame_tx.send(RelayFrame::Error {
                                message: e.to_string(),
                            });
                        }
                    }
                    Ok(RelayFrame::Data { payload }) => {
                        if !state.relay.forward(id, payload) {
                            debug!(conn_id = %conn_id, "Dropped data frame without a peer");
                        }
                    }
                    Ok(other) => {
                        debug!(conn_id = %conn_id, frame = ?other, "Ignoring relay-only frame from client");
                    }
                    Err(e) => {
                        warn!(conn_id = %conn_id, error = %e, "Failed to parse relay frame");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Abort writer task
    writer_handle.abort();
}

/// Send a frame over WebSocket
async fn send_frame(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    frame: &RelayFrame,
) -> Result<(), String> {
    let json = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}
