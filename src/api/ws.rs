use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::api::server::AppState;
use crate::notify::BroadcastNotifier;

pub async fn preview_ws_handler(
    State(state): State<AppState>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let notifier = state.notifier.clone();
    upgrade.on_upgrade(move |socket| forward_previews(socket, notifier))
}

async fn forward_previews(mut socket: WebSocket, notifier: BroadcastNotifier) {
    let mut events = notifier.subscribe();
    debug!(subscribers = notifier.subscriber_count(), "preview subscriber connected");

    loop {
        tokio::select! {
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "preview subscriber lagging; events dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let frame = match event.to_frame() {
                    Ok(frame) => frame,
                    Err(error) => {
                        warn!(%error, "skipping unencodable preview event");
                        continue;
                    }
                };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    debug!("preview subscriber disconnected");
}
