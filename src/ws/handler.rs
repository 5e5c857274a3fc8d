//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::http::middleware::{verify_jwt, AuthenticatedUser};
use crate::util::rate_limit::ConnectionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Outbound queue depth per connection
const OUTBOUND_BUFFER: usize = 256;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// JWT token for authentication
    pub token: String,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Verify JWT token before upgrading
    match verify_jwt(&query.token, &state.config.auth_jwt_secret) {
        Ok(claims) => {
            let user = AuthenticatedUser::from(claims);
            info!(user_id = %user.user_id, "WebSocket upgrade for authenticated user");
            ws.on_upgrade(move |socket| handle_socket(socket, user, state))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket auth failed");
            (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
        }
    }
}

/// Room membership held by one connection
struct CurrentRoom {
    room_id: String,
    forwarder: JoinHandle<()>,
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, user: AuthenticatedUser, state: AppState) {
    let user_id = user.user_id;
    info!(user_id = %user_id, "New WebSocket connection");

    let (ws_sink, mut ws_stream) = socket.split();
    let (out_tx, out_rx) = mpsc::channel::<ServerMsg>(OUTBOUND_BUFFER);

    // Single writer: everything for this socket goes through out_tx
    let writer_handle = tokio::spawn(write_loop(user_id, ws_sink, out_rx));

    let welcome = ServerMsg::Welcome {
        user_id,
        server_time: unix_millis(),
    };
    if out_tx.send(welcome).await.is_err() {
        error!(user_id = %user_id, "Failed to send welcome");
        writer_handle.abort();
        return;
    }

    let rate_limiter = ConnectionRateLimiter::new();
    let mut current: Option<CurrentRoom> = None;

    // Reader loop: WebSocket -> sessions
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(user_id = %user_id, "Rate limited input message");
                    continue;
                }

                let client_msg = match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => msg,
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Failed to parse client message");
                        let _ = out_tx
                            .send(ServerMsg::error("invalid_message", e.to_string()))
                            .await;
                        continue;
                    }
                };
                if let Err(reason) = client_msg.validate() {
                    let _ = out_tx.send(ServerMsg::error("validation_error", reason)).await;
                    continue;
                }

                handle_client_msg(&state, &user, client_msg, &mut current, &out_tx).await;
            }
            Ok(Message::Binary(_)) => {
                warn!(user_id = %user_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(user_id = %user_id, "Client initiated close");
                break;
            }
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    if let Some(room) = current.take() {
        leave_current(&state, user_id, room);
    }
    writer_handle.abort();

    info!(user_id = %user_id, "WebSocket connection closed");
}

async fn handle_client_msg(
    state: &AppState,
    user: &AuthenticatedUser,
    msg: ClientMsg,
    current: &mut Option<CurrentRoom>,
    out_tx: &mpsc::Sender<ServerMsg>,
) {
    let user_id = user.user_id;
    match msg {
        ClientMsg::Ping { t } => {
            let _ = out_tx.send(ServerMsg::Pong { t }).await;
        }

        ClientMsg::JoinRoom { room_id, mode } => {
            if let Some(room) = current.take() {
                if room.room_id == room_id {
                    // Rejoining the same room only refreshes the subscription
                    room.forwarder.abort();
                } else {
                    leave_current(state, user_id, room);
                }
            }

            match state
                .rooms
                .create_or_join(&room_id, user_id, &user.display_name, mode)
            {
                Ok(joined) => {
                    let events = joined.handle.subscribe();
                    let forwarder = tokio::spawn(forward_room_events(user_id, events, out_tx.clone()));
                    let _ = out_tx.send(joined.room_joined()).await;
                    *current = Some(CurrentRoom { room_id, forwarder });
                }
                Err(e) => {
                    debug!(user_id = %user_id, room_id = %room_id, error = %e, "Join rejected");
                    let _ = out_tx.send(ServerMsg::error(e.code(), e.to_string())).await;
                }
            }
        }

        ClientMsg::LeaveRoom => match current.take() {
            Some(room) => leave_current(state, user_id, room),
            None => {
                let _ = out_tx
                    .send(ServerMsg::error("not_in_room", "Not in a room"))
                    .await;
            }
        },

        other => {
            let Some(command) = other.to_command() else {
                return;
            };
            let Some(room) = current.as_ref() else {
                let _ = out_tx
                    .send(ServerMsg::error("not_in_room", "Join a room first"))
                    .await;
                return;
            };
            if let Err(e) = state.rooms.dispatch(&room.room_id, user_id, command) {
                let _ = out_tx.send(ServerMsg::error(e.code(), e.to_string())).await;
            }
        }
    }
}

fn leave_current(state: &AppState, user_id: Uuid, room: CurrentRoom) {
    room.forwarder.abort();
    if let Err(e) = state.rooms.leave(&room.room_id, user_id) {
        debug!(user_id = %user_id, room_id = %room.room_id, error = %e, "Leave ignored");
    }
}

/// Session broadcast -> this connection's outbound queue
async fn forward_room_events(
    user_id: Uuid,
    mut events: broadcast::Receiver<crate::game::Outbound>,
    out_tx: mpsc::Sender<ServerMsg>,
) {
    loop {
        match events.recv().await {
            Ok(outbound) => {
                if !outbound.is_for(user_id) {
                    continue;
                }
                if out_tx.send(outbound.msg).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(user_id = %user_id, lagged_count = n, "Client lagged, skipping {} events", n);
                // Continue - don't disconnect for lag
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(user_id = %user_id, "Room event channel closed");
                break;
            }
        }
    }
}

async fn write_loop(
    user_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<ServerMsg>,
) {
    while let Some(msg) = out_rx.recv().await {
        if let Err(e) = send_msg(&mut ws_sink, &msg).await {
            debug!(user_id = %user_id, error = %e, "WebSocket send failed");
            break;
        }
    }
    let _ = ws_sink.close().await;
}

/// Send a message over WebSocket
async fn send_msg(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMsg) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sink.send(Message::Text(json)).await.map_err(|e| e.to_string())
}
