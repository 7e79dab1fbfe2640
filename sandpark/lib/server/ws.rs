//! WebSocket fan-out.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::event::{EventBus, EventType};

use super::state::ServerState;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One event as delivered to browsers.
#[derive(Debug, Clone, Serialize)]
pub struct WsEvent {
    /// The event's wire name ("instance stats", ...).
    pub name: String,

    /// The event payload.
    pub data: Value,
}

/// Messages browsers send upstream.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    /// Terminal keystrokes for an instance.
    TerminalIn {
        instance: String,
        data: String,
    },

    /// Viewport resize of an instance's terminal.
    Resize {
        instance: String,
        rows: u32,
        cols: u32,
    },
}

/// Fans broker events out to the WebSocket connections of each session.
///
/// The hub registers one broker handler per event type at startup; per-topic
/// emission order carries through to each connection's queue.
pub struct WsHub {
    sessions: DashMap<String, Vec<mpsc::UnboundedSender<WsEvent>>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl WsHub {
    /// Creates a hub subscribed to every event type on `broker`.
    pub fn attached(broker: &Arc<dyn EventBus>) -> Arc<Self> {
        let hub = Arc::new(Self {
            sessions: DashMap::new(),
        });

        for event_type in EventType::all() {
            let hub = hub.clone();
            broker.on(
                event_type,
                Arc::new(move |event_type: EventType, session_id: &str, payload: &Value| {
                    hub.forward(event_type, session_id, payload);
                }),
            );
        }

        hub
    }

    /// Queues a connection for `session_id` and returns its event feed.
    pub fn subscribe(&self, session_id: &str) -> mpsc::UnboundedReceiver<WsEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions
            .entry(session_id.to_string())
            .or_default()
            .push(tx);

        rx
    }

    fn forward(&self, event_type: EventType, session_id: &str, payload: &Value) {
        if let Some(mut connections) = self.sessions.get_mut(session_id) {
            let event = WsEvent {
                name: event_type.as_str().to_string(),
                data: payload.clone(),
            };

            // Dropped connections reveal themselves as send failures.
            connections.retain(|tx| tx.send(event.clone()).is_ok());
        }

        if event_type == EventType::SessionEnd {
            self.sessions.remove(session_id);
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// Handler for `GET /sessions/{session_id}/ws`.
pub async fn session_ws(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    if state.core().session_get(&session_id).is_err() {
        return axum::http::StatusCode::NOT_FOUND.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(state, session_id, socket))
}

async fn handle_socket(state: ServerState, session_id: String, socket: WebSocket) {
    let mut events = state.hub().subscribe(&session_id);
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(_) => continue,
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_message(&state, &session_id, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn handle_client_message(state: &ServerState, session_id: &str, text: &str) {
    let Ok(message) = serde_json::from_str::<ClientMessage>(text) else {
        tracing::debug!(session = session_id, "unparseable client message");
        return;
    };

    let Ok(session) = state.core().session_get(session_id) else {
        return;
    };

    match message {
        ClientMessage::TerminalIn { instance, data } => {
            // Input is scoped to the connection's session.
            if state.core().instance_get(&session, &instance).is_ok() {
                state
                    .core()
                    .instance_terminal_write(&instance, Bytes::from(data.into_bytes()));
            }
        }
        ClientMessage::Resize {
            instance,
            rows,
            cols,
        } => {
            let Ok(instance) = state.core().instance_get(&session, &instance) else {
                return;
            };

            if let Err(e) = state.core().instance_resize(&instance, rows, cols).await {
                tracing::debug!(instance = %instance.name, error = %e, "resize failed");
                return;
            }

            state.core().broker().emit(
                EventType::InstanceViewportResize,
                session_id,
                json!({ "instance": instance.name, "rows": rows, "cols": cols }),
            );
        }
    }
}
