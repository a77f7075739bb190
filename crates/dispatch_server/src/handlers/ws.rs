use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use dispatch_core::ids::{ActorId, ConnectionId};
use dispatch_core::notify::{NotificationEnvelope, NotificationGateway, PushEvent};
use dispatch_core::ride::ActorRole;
use dispatch_core::spatial::Location;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tracing::{debug, warn};

use crate::auth::{bearer_token, AuthenticatedActor};
use crate::error::AppError;
use crate::models::{InboundFrame, JoinData, LocationUpdateData, WsParams};
use crate::state::AppState;

/// Browsers cannot set headers on a WebSocket handshake, so the token may
/// also arrive as `?token=`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
    params: Result<Query<WsParams>, QueryRejection>,
) -> Result<Response, AppError> {
    let Query(params) = params?;
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(params.token)
        .ok_or_else(|| AppError::Unauthenticated("missing bearer token".to_string()))?;
    let actor = state.auth.verify(&token)?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, actor)))
}

async fn handle_socket(socket: WebSocket, state: AppState, actor: AuthenticatedActor) {
    let (connection_id, mut outbox) = state.service.hub().open();
    let (mut sink, mut stream) = socket.split();
    debug!(actor_id = %actor.actor_id, %connection_id, "socket opened");

    let writer = tokio::spawn(async move {
        while let Some(message) = outbox.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(err) => {
                    warn!(%connection_id, error = %err, "dropping unencodable frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut joined = None;
    while let Some(frame) = stream.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        if let Err(reason) = handle_frame(&state, actor, connection_id, &mut joined, text.as_str()) {
            send_error(&state, connection_id, reason).await;
        }
    }

    state.service.disconnect(joined, connection_id);
    writer.abort();
}

/// Apply one inbound frame. The `Err` text goes back to the client as an
/// `error` event; the socket stays open.
pub(crate) fn handle_frame(
    state: &AppState,
    actor: AuthenticatedActor,
    connection_id: ConnectionId,
    joined: &mut Option<(ActorId, ActorRole)>,
    text: &str,
) -> Result<(), String> {
    let frame: InboundFrame =
        serde_json::from_str(text).map_err(|err| format!("malformed frame: {err}"))?;

    match frame.event.as_str() {
        "join" => {
            let data: JoinData = serde_json::from_value(frame.data)
                .map_err(|err| format!("invalid join payload: {err}"))?;
            if data.actor_id != actor.actor_id || data.actor_type != actor.role {
                return Err("join does not match the authenticated account".to_string());
            }
            state.service.join(actor.actor_id, actor.role, connection_id);
            *joined = Some((actor.actor_id, actor.role));
            Ok(())
        }
        "update-location" => {
            if actor.role != ActorRole::Driver {
                return Err("only drivers report locations".to_string());
            }
            let data: LocationUpdateData = serde_json::from_value(frame.data)
                .map_err(|err| format!("invalid location payload: {err}"))?;
            if data.actor_id != actor.actor_id {
                return Err("location update for another account".to_string());
            }
            let coordinates = data.location.ok_or("location is required")?;
            let (Some(latitude), Some(longitude)) = (coordinates.latitude, coordinates.longitude)
            else {
                return Err("latitude and longitude are required".to_string());
            };
            state
                .service
                .update_location(actor.actor_id, Location::new(latitude, longitude))
                .map_err(|err| err.to_string())
        }
        other => Err(format!("unknown event {other:?}")),
    }
}

async fn send_error(state: &AppState, connection_id: ConnectionId, message: String) {
    let envelope = NotificationEnvelope {
        target_connection_id: connection_id,
        event: PushEvent::Error,
        payload: json!({ "message": message }),
    };
    if let Err(err) = state.service.hub().deliver(envelope).await {
        debug!(%connection_id, error = %err, "error frame not delivered");
    }
}
