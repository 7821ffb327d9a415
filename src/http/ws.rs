//! Realtime WebSocket channel
//!
//! One connection per client. Outbound frames flow through the hub's
//! unbounded outbox so the engine never blocks on a slow socket; the pump
//! below drains it into the sink. Inbound frames are dispatched
//! synchronously into the engine.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::engine::{gate, scheduler};
use crate::hub::Role;
use crate::messages::{ClientMessage, ServerMessage};
use crate::state::AppState;

/// Handle WebSocket upgrade requests
pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket) {
    let conn_id = Uuid::new_v4().to_string();
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<String>();
    state.hub.add(conn_id.clone(), outbox);
    tracing::info!(conn = %conn_id, "client connected");

    {
        let session = state.session.lock();
        state.hub.send_to(&conn_id, &ServerMessage::Init {
            conn_id: conn_id.clone(),
            running: session.running,
            delay_secs: session.delay_secs,
            mode: session.mode,
            fragment_mode: session.fragment_active,
        });
    }

    let (mut sink, mut stream) = socket.split();

    let writer = async {
        while let Some(frame) = outbox_rx.recv().await {
            if sink.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    };

    let reader = async {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => dispatch(&state, &conn_id, text.as_str()),
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // ping/pong handled by axum
                Err(e) => {
                    tracing::debug!(conn = %conn_id, error = %e, "websocket error");
                    break;
                }
            }
        }
    };

    // Run both directions until either side closes
    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }

    // Teardown: a vanished subtitler is an implicit fragment:leave
    state.hub.remove(&conn_id);
    scheduler::subtitler_leave(&state, &conn_id);
    tracing::info!(conn = %conn_id, "client disconnected");
}

/// Route one inbound frame into the engine
pub(crate) fn dispatch(state: &Arc<AppState>, conn_id: &str, raw: &str) {
    let message = match serde_json::from_str::<ClientMessage>(raw) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(conn = %conn_id, error = %e, "dropping unparseable frame");
            return;
        }
    };

    match message {
        ClientMessage::Identify { client_type, name } => {
            state.hub.set_identity(conn_id, client_type, name);
            tracing::debug!(conn = %conn_id, role = ?client_type, "client identified");
        }
        ClientMessage::FragmentJoin { name } => {
            if state.hub.role_of(conn_id) == Some(Role::Subtitler) {
                scheduler::subtitler_join(state, conn_id, name);
            } else {
                tracing::debug!(conn = %conn_id, "fragment:join from non-subtitler ignored");
            }
        }
        ClientMessage::FragmentLeave => {
            scheduler::subtitler_leave(state, conn_id);
        }
        ClientMessage::Caption {
            text, auto_sent, ..
        } => {
            if state.hub.role_of(conn_id) != Some(Role::Subtitler) {
                tracing::debug!(conn = %conn_id, "caption from non-subtitler ignored");
                return;
            }
            if let Err(reason) = gate::submit_caption(state, conn_id, &text, auto_sent.unwrap_or(false))
            {
                tracing::debug!(conn = %conn_id, %reason, "caption rejected");
            }
        }
    }
}
