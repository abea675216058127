//! WebSocket client transport.
//!
//! Bridges a `tokio-tungstenite` connection to the channel pair endpoints
//! work with: frames written to the returned [`Outbound`] are sent as text
//! messages, and text messages from the peer arrive on the returned
//! receiver. The receiver yields `None` once the connection is gone; that
//! is the caller's cue to call `closed()` on its endpoint.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::endpoint::Outbound;

/// Connect to `url` (`ws://host:port/path`) and start pumping frames.
pub async fn connect(url: &str) -> anyhow::Result<(Outbound, mpsc::UnboundedReceiver<String>)> {
    let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
    tracing::info!(%url, "websocket connected");

    let (mut ws_tx, mut ws_rx) = ws.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let (incoming_tx, incoming) = mpsc::unbounded_channel::<String>();
    let url = url.to_string();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = ws_rx.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => {
                        if incoming_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::info!(%url, "websocket closed by peer");
                        break;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(%url, error = %e, "websocket read error");
                        break;
                    }
                    // Binary is not part of the protocol; pings are answered by tungstenite.
                    Some(Ok(_)) => {}
                },
                frame = outbound_rx.recv() => match frame {
                    Some(frame) => {
                        if let Err(e) = ws_tx.send(WsMessage::Text(frame.into())).await {
                            tracing::warn!(%url, error = %e, "websocket write error");
                            break;
                        }
                    }
                    None => {
                        let _ = ws_tx.send(WsMessage::Close(None)).await;
                        break;
                    }
                },
            }
        }
        tracing::debug!(%url, "websocket pump finished");
    });

    Ok((outbound, incoming))
}
