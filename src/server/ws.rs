// WebSocket Subscribers - hub fan-out plus inbound control commands
// One task per direction per client; a dead client only unsubscribes itself

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use tracing::{debug, info, warn};

use crate::hub::{ClientMessage, WsMessage};
use crate::server::AppState;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscriber = state.hub.subscribe();

    // greet the new client with the current configuration
    let welcome = WsMessage::connected(&state.symbols, state.mode.as_str());
    if let Ok(json) = serde_json::to_string(&welcome) {
        if sender.send(Message::Text(json)).await.is_err() {
            return;
        }
    }

    // hub → socket
    let send_task = tokio::spawn(async move {
        while let Some(message) = subscriber.recv().await {
            let Ok(json) = serde_json::to_string(&message) else {
                continue;
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        subscriber.dropped()
    });

    // socket → control commands
    let control_state = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => handle_client_message(&control_state, &text),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        dropped = send_task => {
            if let Ok(dropped) = dropped {
                if dropped > 0 {
                    warn!(dropped, "subscriber closed after dropping messages");
                }
            }
        }
        _ = recv_task => {}
    }

    info!("websocket client disconnected");
}

/// Route a client command. Protocol errors answer with an `Error` message
/// and keep the connection alive.
fn handle_client_message(state: &AppState, text: &str) {
    let parsed: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(error) => {
            debug!(%error, "bad client message");
            state
                .hub
                .publish(WsMessage::error(format!("bad client message: {}", error)));
            return;
        }
    };

    match parsed.action.as_str() {
        "replay_pause" => match state.clock.replay() {
            Some(replay) => {
                if replay.pause() {
                    info!("replay paused by client");
                }
                state.hub.publish(WsMessage::replay_status(&replay.state()));
            }
            None => state.hub.publish(WsMessage::error("not in replay mode")),
        },
        "replay_resume" => match state.clock.replay() {
            Some(replay) => {
                if replay.resume() {
                    info!("replay resumed by client");
                }
                state.hub.publish(WsMessage::replay_status(&replay.state()));
            }
            None => state.hub.publish(WsMessage::error("not in replay mode")),
        },
        "set_replay_speed" => match (state.clock.replay(), parsed.speed) {
            (Some(replay), Some(speed)) => {
                let applied = replay.set_speed(speed);
                info!(requested = speed, applied, "replay speed changed");
                state.hub.publish(WsMessage::replay_status(&replay.state()));
            }
            (Some(_), None) => state
                .hub
                .publish(WsMessage::error("set_replay_speed requires a speed")),
            (None, _) => state.hub.publish(WsMessage::error("not in replay mode")),
        },
        "set_min_size" => match parsed.min_size {
            Some(min_size) => {
                state.min_size.store(min_size, Ordering::Relaxed);
                info!(min_size, "minimum trade size updated");
            }
            None => state
                .hub
                .publish(WsMessage::error("set_min_size requires a min_size")),
        },
        other => {
            state
                .hub
                .publish(WsMessage::error(format!("unknown action: {}", other)));
        }
    }
}
