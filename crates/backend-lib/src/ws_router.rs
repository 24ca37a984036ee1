// ============================
// relay-backend/src/ws_router.rs
// ============================
//! HTTP router and WebSocket connection handling.
use crate::handlers::meeting::{check_meeting, start_meeting};
use crate::registry::Outbound;
use crate::validation;
use crate::websocket::SignalingHandler;
use crate::metrics::{WS_ACTIVE, WS_CONNECTION, WS_DISCONNECTION};
use crate::{error::AppError, AppState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use relay_common::MeetingId;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

/// Query string of the WebSocket handshake
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub meeting_id: MeetingId,
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/api/meeting/start", post(start_meeting))
        .route("/api/meeting/join", get(check_meeting))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "Healthy"
}

/// Handler for WebSocket connections
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConnectParams>,
) -> Response {
    if let Err(e) = validation::validate_meeting_id(&params.meeting_id) {
        return AppError::from(e).into_response();
    }

    // The transport cap sits above the application limit so oversized frames
    // reach `handle_text` and get an ERROR reply instead of a dropped socket.
    let transport_cap = state.settings.max_message_bytes.saturating_mul(2);
    ws.max_message_size(transport_cap)
        .max_frame_size(transport_cap)
        .on_upgrade(move |socket| handle_connection(socket, state, params.meeting_id))
}

async fn handle_connection(socket: WebSocket, state: Arc<AppState>, meeting_id: MeetingId) {
    let (mut tx, mut rx) = socket.split();

    // Outbound queue drained by the writer task; the registry holds the sender
    let (client_tx, mut client_rx) = mpsc::channel::<Outbound>(state.settings.outbound_buffer);

    let mut handler = SignalingHandler::new(state.clone(), meeting_id);
    let connection_id = handler.connection_id();
    state.registry.register(connection_id, client_tx);

    counter!(WS_CONNECTION).increment(1);
    gauge!(WS_ACTIVE).increment(1.0);
    info!(meeting_id = %handler.meeting_id(), %connection_id, "connection opened");

    // Writer: forward queued frames to the socket until closed
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = client_rx.recv().await {
            match frame {
                Outbound::Text(json) => {
                    if tx.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                },
                Outbound::Close => {
                    let _ = tx.send(Message::Close(None)).await;
                    break;
                },
            }
        }
    });

    // Reader: frames are handled one at a time, in arrival order
    loop {
        tokio::select! {
            frame = rx.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = handler.handle_text(text.as_str()).await {
                        handler.report_error(&e);
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}, // binary, ping and pong frames carry no signaling
                Some(Err(e)) => {
                    debug!(%connection_id, error = %e, "socket read failed");
                    break;
                },
            },
            _ = &mut send_task => break,
        }
    }

    // Disconnect callback: unregister and deactivate the participant
    handler.on_close().await;
    send_task.abort();

    counter!(WS_DISCONNECTION).increment(1);
    gauge!(WS_ACTIVE).decrement(1.0);
    info!(%connection_id, user_id = ?handler.user_id(), "connection closed");
}
