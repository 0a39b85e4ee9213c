//! WebSocket handling
//!
//! One task per connection. The receive loop reads one frame at a time and
//! awaits its dispatch before reading the next, so a client's envelopes are
//! handled strictly in arrival order. Outbound frames go through a bounded
//! channel drained by a separate send task.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::registry::{OutboundMessage, OutboundSender};
use crate::state::AppState;

const OUTBOUND_CAPACITY: usize = 100;

/// Why a connection left the Connected state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    CloseFrame,
    TransportError,
    StreamEnded,
}

impl CloseReason {
    fn as_str(self) -> &'static str {
        match self {
            CloseReason::CloseFrame => "close_frame",
            CloseReason::TransportError => "transport_error",
            CloseReason::StreamEnded => "stream_ended",
        }
    }
}

/// WebSocket upgrade handler for `/ws/{nickname}`
pub async fn ws_handler(
    Path(nickname): Path<String>,
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let nickname = nickname.trim().to_string();
    if nickname.is_empty() {
        return (StatusCode::BAD_REQUEST, "nickname must not be empty").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, nickname))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, nickname: String) {
    let conn_id = state.registry.next_connection_id();
    let (mut ws_tx, ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundMessage>(OUTBOUND_CAPACITY);

    let send_task = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let result = match msg {
                OutboundMessage::Record(record) => match serde_json::to_string(&*record) {
                    Ok(json) => ws_tx.send(Message::Text(json.into())).await,
                    Err(e) => {
                        error!(
                            component = "websocket",
                            event = "ws.send.serialize_failed",
                            connection_id = conn_id,
                            error = %e,
                            "Failed to serialize record"
                        );
                        continue;
                    }
                },
                OutboundMessage::Pong(data) => ws_tx.send(Message::Pong(data)).await,
            };

            if result.is_err() {
                debug!(
                    component = "websocket",
                    event = "ws.send.disconnected",
                    connection_id = conn_id,
                    "WebSocket send failed, client disconnected"
                );
                break;
            }
        }
    });

    run_connection(&state, &nickname, conn_id, ws_rx, outbound_tx).await;
    send_task.abort();
}

/// Drive one connection from registration to its departure notice.
///
/// Cleanup (unregister, then announce) runs on every way out of the
/// receive loop.
pub(crate) async fn run_connection<S>(
    state: &AppState,
    nickname: &str,
    conn_id: u64,
    inbound: S,
    outbound_tx: OutboundSender,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    if let Err(e) = state
        .registry
        .register(nickname, conn_id, outbound_tx.clone())
    {
        warn!(
            component = "websocket",
            event = "ws.connection.rejected",
            connection_id = conn_id,
            error = %e,
            "Refusing connection"
        );
        return;
    }

    info!(
        component = "websocket",
        event = "ws.connection.opened",
        connection_id = conn_id,
        nickname = %nickname,
        "WebSocket connection opened"
    );

    let reason = receive_loop(state, nickname, conn_id, inbound, &outbound_tx).await;

    // Closed: unregister first so the departing client never sees its own notice
    state.registry.unregister_connection(nickname, conn_id);
    info!(
        component = "websocket",
        event = "ws.connection.closed",
        connection_id = conn_id,
        nickname = %nickname,
        reason = reason.as_str(),
        remaining = state.registry.connection_count(),
        "WebSocket connection closed"
    );
    state.dispatcher.announce_departure(nickname).await;
}

async fn receive_loop<S>(
    state: &AppState,
    nickname: &str,
    conn_id: u64,
    mut inbound: S,
    outbound_tx: &OutboundSender,
) -> CloseReason
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(result) = inbound.next().await {
        let text = match result {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(data)) => {
                let _ = outbound_tx.send(OutboundMessage::Pong(data)).await;
                continue;
            }
            Ok(Message::Close(_)) => {
                info!(
                    component = "websocket",
                    event = "ws.connection.close_frame",
                    connection_id = conn_id,
                    "Client sent close frame"
                );
                return CloseReason::CloseFrame;
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(
                    component = "websocket",
                    event = "ws.connection.error",
                    connection_id = conn_id,
                    error = %e,
                    "WebSocket error"
                );
                return CloseReason::TransportError;
            }
        };

        state.dispatcher.handle_frame(nickname, text.as_str()).await;
    }
    CloseReason::StreamEnded
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chatrelay_protocol::{RecordKind, SYSTEM_SENDER};
    use futures::stream;

    use crate::dispatch::tests::{drain, listen, ScriptedAssistant};
    use crate::persistence::SqliteStore;

    fn app_state() -> AppState {
        AppState::new(
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            Arc::new(ScriptedAssistant::default()),
            10,
        )
    }

    fn text(body: &str) -> Result<Message, axum::Error> {
        let frame = serde_json::json!({ "type": "text", "message": body }).to_string();
        Ok(Message::Text(frame.into()))
    }

    #[tokio::test]
    async fn departure_reaches_peers_but_not_the_leaver() {
        let state = app_state();
        let mut alice_rx = listen(&state.registry, "alice");
        let (bob_tx, mut bob_rx) = mpsc::channel(32);
        let conn_id = state.registry.next_connection_id();

        let frames = stream::iter(vec![text("bye all"), Ok(Message::Close(None))]);
        run_connection(&state, "bob", conn_id, frames, bob_tx).await;

        assert!(!state.registry.contains("bob"));

        let alice_got = drain(&mut alice_rx);
        let notices: Vec<_> = alice_got
            .iter()
            .filter(|r| r.kind == RecordKind::System)
            .collect();
        assert_eq!(notices.len(), 1);
        assert!(notices[0].body.contains("bob"));
        assert_eq!(notices[0].sender, SYSTEM_SENDER);

        let bob_got = drain(&mut bob_rx);
        assert_eq!(bob_got.len(), 1);
        assert_eq!(bob_got[0].body, "bye all");
    }

    #[tokio::test]
    async fn frames_are_handled_in_arrival_order() {
        let state = app_state();
        let mut alice_rx = listen(&state.registry, "alice");
        let (carol_tx, _carol_rx) = mpsc::channel(32);
        let conn_id = state.registry.next_connection_id();

        let frames = stream::iter(vec![text("A"), text("B"), text("C")]);
        run_connection(&state, "carol", conn_id, frames, carol_tx).await;

        let delivered: Vec<String> = drain(&mut alice_rx)
            .iter()
            .filter(|r| r.kind == RecordKind::Text)
            .map(|r| r.body.clone())
            .collect();
        assert_eq!(delivered, ["A", "B", "C"]);

        let stored: Vec<String> = state
            .store
            .all()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.kind == RecordKind::Text)
            .map(|r| r.body)
            .collect();
        assert_eq!(stored, ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn transport_error_closes_and_announces() {
        let state = app_state();
        let mut alice_rx = listen(&state.registry, "alice");
        let (dave_tx, _dave_rx) = mpsc::channel(32);
        let conn_id = state.registry.next_connection_id();

        let frames = stream::iter(vec![
            Err(axum::Error::new(std::io::Error::other("reset"))),
            text("never handled"),
        ]);
        run_connection(&state, "dave", conn_id, frames, dave_tx).await;

        let got = drain(&mut alice_rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, RecordKind::System);
        assert_eq!(state.store.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let state = app_state();
        let (erin_tx, mut erin_rx) = mpsc::channel(32);
        let conn_id = state.registry.next_connection_id();

        let frames = stream::iter(vec![Ok(Message::Ping(Bytes::from_static(b"hb")))]);
        run_connection(&state, "erin", conn_id, frames, erin_tx).await;

        match erin_rx.try_recv().unwrap() {
            OutboundMessage::Pong(data) => assert_eq!(&data[..], b"hb"),
            OutboundMessage::Record(record) => panic!("expected pong, got {:?}", record),
        }
    }

    #[tokio::test]
    async fn evicted_connection_leaves_replacement_registered() {
        let state = Arc::new(app_state());
        let (frames_tx, frames_rx) = futures::channel::mpsc::unbounded();
        let (first_tx, _first_rx) = mpsc::channel(32);
        let first_id = state.registry.next_connection_id();

        let task = {
            let state = Arc::clone(&state);
            tokio::spawn(async move {
                run_connection(&state, "frank", first_id, frames_rx, first_tx).await;
            })
        };
        while state.registry.connection_id("frank") != Some(first_id) {
            tokio::task::yield_now().await;
        }

        // Same name from another device takes over
        let mut second_rx = listen(&state.registry, "frank");
        let second_id = state.registry.connection_id("frank").unwrap();
        assert_ne!(first_id, second_id);

        drop(frames_tx);
        task.await.unwrap();

        assert_eq!(state.registry.connection_id("frank"), Some(second_id));
        let got = drain(&mut second_rx);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].kind, RecordKind::System);
    }

    #[tokio::test]
    async fn ai_reply_in_flight_still_reaches_peers_after_disconnect() {
        let state = app_state();
        let mut alice_rx = listen(&state.registry, "alice");
        let (gina_tx, _gina_rx) = mpsc::channel(32);
        let conn_id = state.registry.next_connection_id();

        let ask = serde_json::json!({ "type": "ai_chat", "message": "anyone there?" }).to_string();
        let frames = stream::iter(vec![Ok(Message::Text(ask.into()))]);
        run_connection(&state, "gina", conn_id, frames, gina_tx).await;

        let kinds: Vec<RecordKind> = drain(&mut alice_rx).iter().map(|r| r.kind).collect();
        assert_eq!(kinds, [RecordKind::AiChat, RecordKind::System]);

        let stored = state.store.all().await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].body, "reply to anyone there?");
        assert!(stored[1].body.contains("gina"));
    }
}
