use docshare_core::SyncMessage;
use serde::Serialize;
use tokio::sync::mpsc;

/// Status events emitted by the broadcast server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The number of registered peers changed.
    ConnectionCountChanged { count: usize },
    /// A peer sent a well-formed frame.
    MessageReceived { message: SyncMessage },
    /// Something failed inside a server loop. The loop kept running.
    ServerError { message: String },
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        ServerEvent::ServerError {
            message: message.into(),
        }
    }
}

/// Sending half handed to the server and its loops.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Receiving half consumed by whoever owns the server.
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_serialize_tagged() {
        let json = serde_json::to_value(ServerEvent::ConnectionCountChanged { count: 2 }).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "connection_count_changed", "count": 2})
        );

        let json = serde_json::to_value(ServerEvent::error("boom")).unwrap();
        assert_eq!(json["type"], "server_error");
        assert_eq!(json["message"], "boom");
    }
}
