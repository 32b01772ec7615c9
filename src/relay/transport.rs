//! WebSocket Transport Layer
//!
//! Single responsibility: Connect to the relay and hand back the split socket.
//! No knowledge of the relay protocol, pairing, or request correlation.

use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, warn};

use crate::error::BridgeError;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<Socket, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<Socket>;

/// Open a WebSocket to `url`.
pub async fn connect(url: &str) -> Result<(WsSink, WsStream), BridgeError> {
    debug!(url = %url, "Connecting to relay");

    let (ws, _) = connect_async(url)
        .await
        .map_err(|e| BridgeError::Transport(format!("WebSocket connect failed: {}", e)))?;

    debug!(url = %url, "WebSocket connected");
    Ok(ws.split())
}

/// Drain `rx` into the socket until the channel closes or a write fails.
///
/// All writes go through this one task so frames never interleave.
pub async fn writer_loop(mut sink: WsSink, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = rx.recv().await {
        if let Err(e) = sink.send(Message::Text(text)).await {
            warn!(error = %e, "Failed to write relay frame");
            break;
        }
    }
    let _ = sink.close().await;
    debug!("Relay writer stopped");
}

/// Next text frame from the relay, or `None` once the socket is closed.
///
/// Binary, ping and pong frames are skipped (pong is answered by tungstenite).
pub async fn next_text(stream: &mut WsStream) -> Option<String> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Some(text),
            Some(Ok(Message::Close(frame))) => {
                debug!(frame = ?frame, "Relay closed connection");
                return None;
            }
            Some(Ok(_)) => continue,
            Some(Err(WsError::ConnectionClosed)) | None => return None,
            Some(Err(e)) => {
                warn!(error = %e, "Relay socket error");
                return None;
            }
        }
    }
}
