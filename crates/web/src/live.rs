//! Live push channel over WebSocket
//!
//! Each connection is one observer: it receives the current state on join,
//! then every push message in publication order.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use testdeck_harness::{Delivery, RunStore};
use tracing::{debug, trace, warn};

use crate::server::AppState;

pub async fn ws_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> Response {
    let store = state.store.clone();
    ws.on_upgrade(move |socket| observe(socket, store))
}

async fn observe(socket: WebSocket, store: Arc<RunStore>) {
    let mut subscription = store.subscribe();
    let id = subscription.id();
    let (mut ws_write, mut ws_read) = socket.split();
    debug!("Live observer {} connected", id);

    loop {
        tokio::select! {
            delivery = subscription.next() => {
                let message = match delivery {
                    Delivery::Message(message) => message,
                    Delivery::Lagged(skipped) => {
                        warn!("Live observer {} lagged by {} message(s), resyncing", id, skipped);
                        store.resync(&mut subscription);
                        continue;
                    }
                    Delivery::Closed => break,
                };
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!("Failed to encode {} message: {}", message.kind(), e);
                        continue;
                    }
                };
                trace!("Live observer {} <- {}", id, message.kind());
                if ws_write.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = ws_read.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                // Observers are read-only.
                Some(Ok(_)) => {}
            }
        }
    }

    debug!("Live observer {} disconnected", id);
}
