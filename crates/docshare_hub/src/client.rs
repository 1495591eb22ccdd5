//! Peer side of the hub connection.

use docshare_core::{DocShareError, Result, SyncMessage};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A device joined to a hub.
pub struct SyncClient {
    user_id: String,
    socket: WsStream,
}

impl SyncClient {
    /// Connect to a hub, e.g. `ws://192.168.1.20:8080`.
    pub async fn connect(url: &str, user_id: impl Into<String>) -> Result<Self> {
        let (socket, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| DocShareError::Connection(format!("{}: {}", url, e)))?;
        info!("Connected to hub at {}", url);
        Ok(Self {
            user_id: user_id.into(),
            socket,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Send the full content of a document as an `update`.
    pub async fn send_update(&mut self, document_id: i64, content: &str) -> Result<()> {
        let message = SyncMessage::update(document_id, self.user_id.clone(), content);
        self.send(&message).await
    }

    pub async fn send(&mut self, message: &SyncMessage) -> Result<()> {
        self.send_text(message.encode()?).await
    }

    /// Send an already encoded frame as-is.
    pub async fn send_text(&mut self, frame: impl Into<String>) -> Result<()> {
        let frame: String = frame.into();
        self.socket
            .send(Message::text(frame))
            .await
            .map_err(|e| DocShareError::Connection(e.to_string()))
    }

    /// Wait for the next well-formed message from the hub.
    ///
    /// Malformed frames are logged and skipped. Returns `None` once the hub
    /// closes the connection.
    pub async fn next_message(&mut self) -> Option<SyncMessage> {
        while let Some(frame) = self.socket.next().await {
            let decoded = match frame {
                Ok(Message::Text(text)) => SyncMessage::decode(text.as_str()),
                Ok(Message::Binary(data)) => SyncMessage::decode_bytes(&data),
                Ok(Message::Close(_)) => {
                    debug!("Hub closed the connection");
                    return None;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("Connection to hub failed: {}", e);
                    return None;
                }
            };
            match decoded {
                Ok(message) => return Some(message),
                Err(e) => warn!("Ignoring frame from hub: {}", e),
            }
        }
        None
    }

    /// Close the connection.
    pub async fn close(mut self) -> Result<()> {
        self.socket
            .close(None)
            .await
            .map_err(|e| DocShareError::Connection(e.to_string()))
    }
}
