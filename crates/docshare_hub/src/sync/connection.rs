use super::events::{EventSender, ServerEvent};
use super::registry::{ConnectionId, ConnectionRegistry, PeerTransport};
use docshare_core::SyncMessage;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Longest a single frame write may take before the peer is dropped
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Serve one peer from handshake to disconnect.
///
/// Inbound frames are decoded in transport order. Each well-formed message is
/// reported to the listener and forwarded to every other peer; malformed
/// frames are reported and skipped. Frames queued on the peer's transport by
/// the registry are written back out on the same task.
pub(crate) async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<ConnectionRegistry>,
    events: EventSender,
) {
    let socket = match tokio_tungstenite::accept_async(stream).await {
        Ok(s) => s,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", peer_addr, e);
            let _ = events.send(ServerEvent::error(format!(
                "handshake with {} failed: {}",
                peer_addr, e
            )));
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (transport, mut outbound_rx) = PeerTransport::channel(Some(peer_addr));
    let id = registry.register(transport);

    info!(
        "Peer connected: id={}, addr={}, connections={}",
        id,
        peer_addr,
        registry.count()
    );

    loop {
        tokio::select! {
            // Frames from the peer
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(id, SyncMessage::decode(text.as_str()), &registry, &events);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        handle_frame(id, SyncMessage::decode_bytes(&data), &registry, &events);
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("Peer {} requested close", id);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("Connection {} failed: {}", id, e);
                        let _ = events.send(ServerEvent::error(format!(
                            "connection {} failed: {}",
                            id, e
                        )));
                        break;
                    }
                    None => break,
                }
            }

            // Frames queued for the peer by the registry
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(message) => {
                        let closing = message.is_close();
                        match tokio::time::timeout(WRITE_TIMEOUT, ws_tx.send(message)).await {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => {
                                warn!("Failed to write to connection {}: {}", id, e);
                                break;
                            }
                            Err(_) => {
                                warn!("Connection {} stopped reading, dropping it", id);
                                break;
                            }
                        }
                        if closing {
                            break;
                        }
                    }
                    None => {
                        let _ = ws_tx.close().await;
                        break;
                    }
                }
            }
        }
    }

    registry.unregister(id);

    info!(
        "Peer disconnected: id={}, addr={}, connections={}",
        id,
        peer_addr,
        registry.count()
    );
}

fn handle_frame(
    id: ConnectionId,
    decoded: docshare_core::Result<SyncMessage>,
    registry: &ConnectionRegistry,
    events: &EventSender,
) {
    match decoded {
        Ok(message) => {
            debug!(
                "Connection {} sent {} for document {}",
                id, message.action, message.document_id
            );
            if let Err(e) = registry.broadcast(&message, Some(id)) {
                warn!("Failed to forward message from {}: {}", id, e);
            }
            let _ = events.send(ServerEvent::MessageReceived { message });
        }
        Err(e) => {
            warn!("Dropping frame from connection {}: {}", id, e);
            let _ = events.send(ServerEvent::error(format!(
                "connection {}: {}",
                id, e
            )));
        }
    }
}
