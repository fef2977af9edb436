//! WebSocket event and command channel.
//!
//! Every client receives the broadcast event stream. Command results and
//! answers to bad frames go only to the client that sent the frame.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tagbridge_core::{InboundMessage, OutboundEvent, OutboundMessage};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Replies buffered per client before command tasks wait.
const REPLY_CAPACITY: usize = 16;

/// Upgrade to the bridge WebSocket.
#[utoipa::path(
    get,
    path = "/ws",
    tag = "bridge",
    operation_id = "openBridgeSocket",
    summary = "Open the reader event and command channel",
    description = "JSON text frames tagged by `type`. The server sends `reader_connected`, \
        `reader_disconnected`, `tag_detected`, `tag_removed`, `auth_result`, `write_result`, \
        `error` and `status` frames (see `OutboundEvent`) and accepts `authenticate` and \
        `write` frames (see `InboundMessage`).",
    responses(
        (status = 101, description = "Switching to the WebSocket protocol")
    )
)]
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let _guard = state.client_guard();
    info!(clients = state.clients(), "Client connected");

    let (sink, mut stream) = socket.split();
    let (replies, reply_queue) = mpsc::channel::<OutboundEvent>(REPLY_CAPACITY);
    let events = state.registry().subscribe();

    let _ = replies.send(OutboundMessage::welcome().stamped()).await;
    let mut writer = tokio::spawn(forward(sink, events, reply_queue));

    loop {
        tokio::select! {
            _ = &mut writer => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let state = state.clone();
                    let replies = replies.clone();
                    tokio::spawn(async move {
                        let reply = answer(&state, text.as_str()).await;
                        let _ = replies.send(reply.stamped()).await;
                    });
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!(error = %err, "WebSocket receive failed");
                    break;
                }
            },
        }
    }

    writer.abort();
    info!("Client disconnected");
}

/// Interleave broadcast events and this client's replies onto the socket.
async fn forward(
    mut sink: futures::stream::SplitSink<WebSocket, Message>,
    mut events: broadcast::Receiver<OutboundEvent>,
    mut replies: mpsc::Receiver<OutboundEvent>,
) {
    loop {
        let event = tokio::select! {
            biased;
            reply = replies.recv() => match reply {
                Some(reply) => reply,
                None => break,
            },
            event = events.recv() => match event {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Client lagging, events dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        };

        let text = match event.to_json() {
            Ok(text) => text,
            Err(err) => {
                warn!(error = %err, "Failed to serialize event");
                continue;
            }
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}

/// Handle one inbound text frame.
async fn answer(state: &AppState, frame: &str) -> OutboundMessage {
    let message = match InboundMessage::parse(frame) {
        Ok(message) => message,
        Err(err) => {
            debug!(error = %err, "Rejected inbound frame");
            return OutboundMessage::error(err.to_string());
        }
    };

    match message.clone().into_command() {
        Ok(command) => state.registry().submit(command).await,
        Err(err) => message.failure(&err),
    }
}
