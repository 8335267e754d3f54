//! WebSocket upgrade handler for the session data plane.
//!
//! `GET /ws` upgrades the connection and runs one full gateway session over
//! it.
//!
//! ## Protocol
//!
//! | Direction | Format | Content |
//! |---|---|---|
//! | Client → Server | Binary | Raw PCM16 LE, 16 kHz, mono |
//! | Client → Server | Text (JSON) | `{type, payload?}` control frames |
//! | Server → Client | Text (JSON) | `{type, seq, payload}` events |
//!
//! ## Task wiring
//!
//! 1. Handler creates the coordinator and its inbox/outbound channels.
//! 2. **Reader** — classifies client frames (text vs binary) and dispatches
//!    them into the coordinator inbox; a socket close becomes
//!    `SessionInput::ClientClosed`.
//! 3. **Coordinator** — single consumer of the inbox, sole owner of state.
//! 4. **Writer** — single consumer of the outbound queue and the only task
//!    that sends on the socket; it mints `seq` in delivery order.
//!
//! The writer exits when the coordinator drops the outbound queue (terminal
//! state), which drains any pending events first; the reader is then
//! stopped and the socket closed.

use std::net::SocketAddr;

use axum::extract::State;
use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;

use voicegate_core::logging;
use voicegate_session::{SequencedWriter, SessionCoordinator, SessionInput};

use crate::state::AppState;

/// `GET /ws` — WebSocket upgrade endpoint for the session data plane.
pub async fn session_ws(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_session_ws(socket, state, addr))
}

async fn handle_session_ws(socket: WebSocket, state: AppState, addr: SocketAddr) {
    let session_id = uuid::Uuid::new_v4().to_string();
    logging::gateway_event(
        "connection_accepted",
        json!({"session_id": session_id, "client_ip": addr.ip().to_string()}),
    );

    let (coordinator, inbox, mut outbound_rx) = SessionCoordinator::new(
        session_id.clone(),
        state.settings.clone(),
        state.verifier.clone(),
        state.upstream_factory.clone(),
        state.recognizer_factory.clone(),
    );
    let coordinator_task = tokio::spawn(coordinator.run());

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // ── Reader: client frames → coordinator inbox ────────────────────

    let reader_inbox = inbox;
    let reader = tokio::spawn(async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if reader_inbox.send(SessionInput::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Binary(data)) => {
                    if reader_inbox.send(SessionInput::Binary(data)).await.is_err() {
                        break;
                    }
                }
                // Graceful close or protocol error — stop reading.
                Ok(Message::Close(_)) | Err(_) => break,
                // Ping/pong are handled by axum.
                Ok(_) => {}
            }
        }
        let _ = reader_inbox.send(SessionInput::ClientClosed).await;
    });

    // ── Writer: outbound queue → socket, minting seq ─────────────────

    let writer_session = session_id.clone();
    let writer = tokio::spawn(async move {
        let mut sequencer = SequencedWriter::new();
        while let Some(event) = outbound_rx.recv().await {
            let frame = sequencer.frame(&event);
            if ws_sender.send(Message::Text(frame)).await.is_err() {
                tracing::debug!(session_id = %writer_session, "Client socket gone — writer exiting");
                break;
            }
        }
        // Outbound queue closed: the session is over. Best-effort close.
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    // The writer ends once the coordinator reaches a terminal state and the
    // outbound queue drains; that, not the reader, decides the teardown
    // order so pending events are never cut off.
    let _ = writer.await;
    reader.abort();
    let _ = coordinator_task.await;

    logging::gateway_event("connection_closed", json!({"session_id": session_id}));
}
