//! WebSocket transport for signaling.
//!
//! Each upgraded socket gets one reader loop and one writer task. The reader
//! multiplexes client frames, media events and service shutdown into the
//! connection's [`ConnectionHandler`]; the writer drains the outbound channel
//! into the socket.

use crate::signaling::handler::{ConnectionHandler, Flow, SignalContext};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Serve one signaling connection until either side closes it.
pub async fn serve_connection(
    socket: WebSocket,
    signal: Arc<SignalContext>,
    shutdown: CancellationToken,
) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Value>();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut handler = ConnectionHandler::new(signal, outbound);
    debug!(target: "sfu.signaling", "Signaling connection opened");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                debug!(target: "sfu.signaling", "Service shutting down, closing connection");
                break;
            }
            frame = stream.next() => {
                let flow = match frame {
                    Some(Ok(Message::Text(text))) => handler.handle_text(&text).await,
                    Some(Ok(Message::Close(_))) | None => Flow::Close,
                    // Ping/pong is answered by the WebSocket layer
                    Some(Ok(_)) => Flow::Continue,
                    Some(Err(e)) => {
                        warn!(target: "sfu.signaling", error = %e, "WebSocket read failed");
                        Flow::Close
                    }
                };
                if flow == Flow::Close {
                    break;
                }
            }
            event = handler.next_peer_event() => {
                if handler.handle_peer_event(event) == Flow::Close {
                    break;
                }
            }
        }
    }

    handler.shutdown().await;
    // Dropping the handler closes the outbound channel and ends the writer
    drop(handler);
    let _ = writer.await;
    debug!(target: "sfu.signaling", "Signaling connection closed");
}
