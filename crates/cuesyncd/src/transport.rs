//! Bridges an accepted axum WebSocket to an endpoint's frame channels.

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use cuesync_protocol::Outbound;

/// Spawn the socket pump. Text frames from the peer arrive on the returned
/// receiver, which yields `None` once the socket is gone.
pub fn pump(socket: WebSocket) -> (Outbound, mpsc::UnboundedReceiver<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (incoming_tx, incoming) = mpsc::unbounded_channel::<String>();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = ws_rx.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if incoming_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "websocket read error");
                        break;
                    }
                    Some(Ok(_)) => {}
                },
                frame = outbound_rx.recv() => match frame {
                    Some(frame) => {
                        if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                },
            }
        }
    });

    (outbound, incoming)
}
