use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::HeaderMap,
    response::IntoResponse,
};
use serde::Serialize;
use socialnet_common::protocol::ws::ErrorType;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::RelayState;
use crate::connection::ConnectionContext;
use crate::envelope::{self, Envelope};
use crate::error::RelayError;
use crate::membership::{self, MembershipDecision};
use crate::metrics;
use crate::room::RoomKey;

pub async fn chat_upgrade(
    Path(raw_id): Path<String>,
    State(state): State<RelayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let room = Uuid::parse_str(&raw_id).ok().map(RoomKey::Chat);
    let label = format!("chat_{raw_id}");
    upgrade(state, room, label, headers, ws)
}

pub async fn notifications_upgrade(
    State(state): State<RelayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let room = RoomKey::Notifications;
    upgrade(state, Some(room), room.group_name(), headers, ws)
}

// The handshake is always accepted; authentication and membership errors are
// reported on the open socket before it is closed.
fn upgrade(
    state: RelayState,
    room: Option<RoomKey>,
    room_label: String,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    let max_frame_bytes = state.max_frame_bytes;
    let connection_id = Uuid::new_v4();
    let span = info_span!("ws_connection", connection_id = %connection_id, room = %room_label);

    ws.max_frame_size(max_frame_bytes)
        .max_message_size(max_frame_bytes)
        .on_upgrade(move |socket| {
            handle_socket(state, connection_id, room, headers, socket).instrument(span)
        })
}

async fn handle_socket(
    state: RelayState,
    connection_id: Uuid,
    room: Option<RoomKey>,
    headers: HeaderMap,
    mut socket: WebSocket,
) {
    let (identity, auth_error) = state.gateway.authenticate(&headers).await;
    if let Some(auth_error) = auth_error {
        warn!(reason = auth_error.reason.as_str(), "rejected unauthenticated connection");
        metrics::record_connection("auth_failed");
        close_with_error(&mut socket, &auth_error.to_relay_error()).await;
        return;
    }

    let Some(room) = room else {
        warn!(identity = identity.label(), "rejected connection to malformed room id");
        metrics::record_connection("denied");
        close_with_error(&mut socket, &RelayError::from_code(ErrorType::InvalidId)).await;
        return;
    };

    let grant = match membership::validate(&state.store, &identity, &room).await {
        Ok(MembershipDecision::Allow(grant)) => grant,
        Ok(MembershipDecision::Deny(denial)) => {
            metrics::record_connection("denied");
            close_with_error(&mut socket, &denial).await;
            return;
        }
        Err(error) => {
            error!(error = ?error, "failed to evaluate room membership");
            metrics::record_connection("error");
            let _ = send_json(&mut socket, &RelayError::from_code(ErrorType::ServerError).to_frame())
                .await;
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: Utf8Bytes::from_static(ErrorType::ServerError.as_str()),
                })))
                .await;
            return;
        }
    };

    let context = ConnectionContext { connection_id, room, identity, grant };
    run_connection(&state, &context, socket).await;
}

async fn run_connection(state: &RelayState, context: &ConnectionContext, mut socket: WebSocket) {
    let mut subscription = state.router.join(context).await;
    metrics::record_connection("accepted");
    metrics::connection_opened();
    info!(
        identity = context.identity.label(),
        grant = context.grant.label(),
        dm_recipient = ?context.grant.dm_recipient(),
        "connection subscribed"
    );

    loop {
        tokio::select! {
            maybe_envelope = subscription.recv() => {
                let Some(envelope) = maybe_envelope else {
                    break;
                };
                if let Some(frame) = state.router.on_receive(context, &envelope) {
                    if send_json(&mut socket, &frame).await.is_err() {
                        break;
                    }
                }
            }
            maybe_message = socket.recv() => {
                let Some(Ok(message)) = maybe_message else {
                    break;
                };

                match message {
                    Message::Text(raw) => {
                        let outcome = envelope::validate(&state.store, raw.as_str(), context).await;
                        if !handle_inbound(state, context, &mut socket, outcome).await {
                            break;
                        }
                    }
                    Message::Binary(_) => {
                        let rejection = match envelope::check_write_access(context) {
                            Ok(()) => RelayError::from_code(ErrorType::InvalidDataType),
                            Err(denied) => denied,
                        };
                        if !handle_inbound(state, context, &mut socket, Err(rejection)).await {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => {}
                }
            }
        }
    }

    state.router.leave(context).await;
    metrics::connection_closed();
    info!("connection closed");
}

/// Publishes a validated envelope or reports the rejection. Returns `false`
/// when the connection must end.
async fn handle_inbound(
    state: &RelayState,
    context: &ConnectionContext,
    socket: &mut WebSocket,
    outcome: Result<Envelope, RelayError>,
) -> bool {
    match outcome {
        Ok(envelope) => {
            state.router.publish(context.room, envelope).await;
            true
        }
        Err(rejection) => {
            metrics::record_rejected(rejection.code().as_str());
            if rejection.close_code().is_some() {
                warn!(code = rejection.code().as_str(), "closing connection after rejected frame");
                close_with_error(socket, &rejection).await;
                return false;
            }
            debug!(code = rejection.code().as_str(), "rejected inbound frame");
            send_json(socket, &rejection.to_frame()).await.is_ok()
        }
    }
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> Result<(), ()> {
    let encoded = serde_json::to_string(value).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

/// One error frame, then a close carrying the error's close code.
async fn close_with_error(socket: &mut WebSocket, error: &RelayError) {
    let _ = send_json(socket, &error.to_frame()).await;
    let code = error.close_code().unwrap_or(close_code::POLICY);
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: Utf8Bytes::from_static(error.code().as_str()),
        })))
        .await;
}
