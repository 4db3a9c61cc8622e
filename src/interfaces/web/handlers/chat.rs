use axum::{
    Json,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use super::super::{AppState, sse_events};
use crate::core::stream::StreamEvent;
use crate::core::turn::TurnRequest;

pub async fn chat_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<TurnRequest>,
) -> impl IntoResponse {
    sse_events(state.services.conversation.stream(payload))
}

pub async fn ws_endpoint(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_event(socket: &mut WebSocket, event: &StreamEvent) -> bool {
    socket
        .send(Message::Text(event.to_json().into()))
        .await
        .is_ok()
}

/// One turn per inbound text frame, handled to completion before the next
/// frame is read.
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    while let Some(msg) = socket.recv().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let request = match serde_json::from_str::<TurnRequest>(text.as_str()) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejected malformed chat frame: {}", e);
                let event = StreamEvent::Error(format!("Invalid request: {e}"));
                if !send_event(&mut socket, &event).await {
                    break;
                }
                continue;
            }
        };

        let mut events = state.services.conversation.stream(request);
        while let Some(event) = events.next().await {
            if !send_event(&mut socket, &event).await {
                debug!("Chat socket closed mid-turn");
                return;
            }
        }
    }
}
