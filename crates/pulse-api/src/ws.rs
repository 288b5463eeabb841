// WebSocket connection endpoint
// Decision: The credential is verified and the connection registered before the
// upgrade, so a bad token gets a plain 401 and never a socket
// Decision: One task pumps the registry queue to the socket, another reads client
// frames; when either ends the connection is removed from the registry

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{SinkExt, StreamExt};
use pulse_core::{ClientMessage, ConnectionHandle};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::auth::AuthError;
use crate::error::ErrorResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /v1/ws?token=...
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    upgrade: Option<WebSocketUpgrade>,
) -> Response {
    let token = match query.token.filter(|t| !t.is_empty()) {
        Some(token) => token,
        None => return AuthError::unauthorized("Authentication required").into_response(),
    };

    let handle = match state.registry().connect(&token).await {
        Ok(handle) => handle,
        Err(e) if e.is_auth() => {
            debug!("Rejected connection: {}", e);
            return AuthError::unauthorized("Invalid or expired token").into_response();
        }
        Err(e) => {
            warn!("Connection setup failed: {}", e);
            return AuthError::unavailable("Authentication unavailable").into_response();
        }
    };

    let Some(upgrade) = upgrade else {
        state.registry().disconnect(handle.id);
        return (
            StatusCode::UPGRADE_REQUIRED,
            Json(ErrorResponse {
                error: "WebSocket upgrade required".to_string(),
            }),
        )
            .into_response();
    };

    upgrade.on_upgrade(move |socket| serve_connection(state, handle, socket))
}

async fn serve_connection(state: AppState, handle: ConnectionHandle, socket: WebSocket) {
    let ConnectionHandle {
        id,
        identity,
        mut receiver,
        ..
    } = handle;
    info!(connection = %id, user_id = %identity.user_id, role = %identity.role, "Client connected");

    let (mut sink, mut stream) = socket.split();

    let mut outbound = tokio::spawn(async move {
        while let Some(frame) = receiver.recv().await {
            let text = match serde_json::to_string(frame.as_ref()) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to encode {} frame: {}", frame.kind(), e);
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let fanout = state.fanout.clone();
    let mut inbound = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        if let Err(e) = fanout.handle_client_message(id, &identity, message).await {
                            warn!(connection = %id, "Client message failed: {}", e);
                        }
                    }
                    Err(e) => debug!(connection = %id, "Ignoring unparseable frame: {}", e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut outbound => inbound.abort(),
        _ = &mut inbound => outbound.abort(),
    }

    state.registry().disconnect(id);
    info!(connection = %id, "Client disconnected");
}
