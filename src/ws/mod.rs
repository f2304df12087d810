//! Live subscription endpoint
//!
//! WebSocket transport for the broadcast hub.
//!
//! ## Protocol
//!
//! Client text frames:
//! - `{"type": "join", "channelId": "abc"}` - receive events for a channel
//! - `{"type": "leave", "channelId": "abc"}` - stop receiving them
//!
//! Server text frames are hub events:
//! - `{"type": "new-request", "channelId": "abc", "request": {...}}`
//! - `{"type": "cleared", "channelId": "abc"}`
//! - `{"type": "forward-result", "channelId": "abc", "outcome": {...}, "stats": {...}}`
//!
//! `GET /ws/{channel_id}` joins that channel on connect.

use crate::hub::{SharedHub, SubscriberId, Subscription};
use crate::server::ServerState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Control message from client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Join { channel_id: String },
    #[serde(rename_all = "camelCase")]
    Leave { channel_id: String },
}

/// Create the WebSocket router
pub fn create_ws_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/ws", get(ws_connect))
        .route("/ws/:channel_id", get(ws_connect_channel))
        .with_state(state)
}

async fn ws_connect(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub, None))
}

async fn ws_connect_channel(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    Path(channel_id): Path<String>,
) -> Response {
    let hub = state.hub.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub, Some(channel_id)))
}

/// Apply a client control message to the hub
pub fn apply_client_message(
    hub: &SharedHub,
    subscription_id: SubscriberId,
    message: ClientMessage,
) {
    match message {
        ClientMessage::Join { channel_id } => {
            hub.join(subscription_id, &channel_id);
        }
        ClientMessage::Leave { channel_id } => {
            hub.leave(subscription_id, &channel_id);
        }
    }
}

async fn handle_socket(socket: WebSocket, hub: SharedHub, initial_channel: Option<String>) {
    let subscription = hub.connect();
    let id = subscription.id();
    info!(subscriber = id, "Observer connected");

    if let Some(channel_id) = initial_channel {
        hub.join(id, &channel_id);
    }

    let (sender, mut receiver) = socket.split();
    let mut send_task = tokio::spawn(forward_events(subscription, sender));

    let recv_hub = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        debug!(subscriber = id, message = ?message, "Client control message");
                        apply_client_message(&recv_hub, id, message);
                    }
                    Err(e) => warn!(subscriber = id, error = %e, "Invalid client message"),
                },
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!(subscriber = id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    // Whichever side finishes first ends the connection
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.disconnect(id);
    info!(subscriber = id, "Observer disconnected");
}

/// Drain hub events into the socket until either side closes
async fn forward_events(
    mut subscription: Subscription,
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
) {
    while let Some(event) = subscription.recv().await {
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to serialize hub event");
                continue;
            }
        };
        if sender.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    let _ = sender.close().await;
}
