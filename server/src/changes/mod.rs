//! Change notifications for realtime clients.
//!
//! Clients hold a websocket per collection and refetch on every message.
//! The [`ChangeNotice`] payload is informational only.

mod hub;

pub use hub::ChangeHub;

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use stash_engine::remote::wire::{ChangeKind, ChangeNotice};
use tokio::sync::broadcast::{self, error::RecvError};

/// Handle an established change socket.
///
/// Registers with the hub, forwards notices from a separate task and reads
/// the client side until it closes.
pub async fn handle_change_socket(socket: WebSocket, hub: Arc<ChangeHub>, collection: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut rx = hub.subscribe(&collection);
    let stream_id = uuid::Uuid::new_v4();

    tracing::info!(
        collection = %collection,
        stream_id = %stream_id,
        streams = hub.stream_count(&collection),
        "change socket connected"
    );

    let forwarded = collection.clone();
    let send_task = tokio::spawn(async move {
        while let Some(notice) = next_notice(&mut rx, &forwarded).await {
            match serde_json::to_string(&notice) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!(error = %e, "failed to send change notice");
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize change notice");
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Close(_)) => {
                tracing::debug!(stream_id = %stream_id, "change socket close frame received");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {}
            Ok(_) => {
                tracing::trace!(stream_id = %stream_id, "ignoring client message");
            }
            Err(e) => {
                tracing::warn!(stream_id = %stream_id, error = %e, "change socket error");
                break;
            }
        }
    }

    send_task.abort();
    // Let the aborted task drop its receiver before the count is read.
    let _ = send_task.await;

    tracing::info!(
        collection = %collection,
        stream_id = %stream_id,
        streams = hub.stream_count(&collection),
        "change socket disconnected"
    );
}

/// Next notice to forward. A lagged receiver gets a single
/// [`ChangeKind::Resync`] in place of everything it missed; `None` once the
/// channel closes.
pub async fn next_notice(
    rx: &mut broadcast::Receiver<ChangeNotice>,
    collection: &str,
) -> Option<ChangeNotice> {
    match rx.recv().await {
        Ok(notice) => Some(notice),
        Err(RecvError::Lagged(skipped)) => {
            tracing::debug!(collection = %collection, skipped, "change socket lagged, sending resync");
            Some(ChangeNotice {
                collection: collection.to_string(),
                kind: ChangeKind::Resync,
            })
        }
        Err(RecvError::Closed) => None,
    }
}
