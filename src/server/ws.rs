//! WebSocket heartbeat for the web UI.
//!
//! The page keeps one socket open while it is loaded. It sends
//! `{"type":"ping"}` periodically and `{"tab_active":true|false}` on
//! visibility changes; both count as activity for the idle timeout.

use super::{ActivityTracker, AppState};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Deserialize;

const CONNECTED: &str = r#"{"type":"connected"}"#;
const PONG: &str = r#"{"type":"pong"}"#;

#[derive(Debug, Deserialize)]
struct ClientMessage {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    tab_active: Option<bool>,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let _client = state.activity.client_connected();
    let mut shutdown = state.shutdown.subscribe();
    if *shutdown.borrow() {
        return;
    }

    if socket.send(Message::Text(CONNECTED.into())).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_client_message(&state.activity, &text) {
                            if socket.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        state.activity.touch();
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => state.activity.touch(),
                }
            }
        }
    }
}

/// Apply one text message from the page and return the reply, if any.
/// Unreadable messages still count as activity.
fn handle_client_message(activity: &ActivityTracker, text: &str) -> Option<&'static str> {
    activity.touch();
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            log::debug!("Ignoring WebSocket message {:?}: {}", text, e);
            return None;
        }
    };

    if let Some(active) = message.tab_active {
        activity.set_tab_active(active);
    }
    (message.kind.as_deref() == Some("ping")).then_some(PONG)
}
