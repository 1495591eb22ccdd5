//! Wire protocol for document sync.
//!
//! Every frame is a single JSON text object with exactly four fields:
//!
//! ```json
//! {"documentId": 1, "userId": "a1b2", "action": "update", "content": "Body"}
//! ```
//!
//! Frames carry the full document body, never a diff. There is no
//! acknowledgement and no sequence number; the latest frame wins.

use serde::{Deserialize, Serialize};

use crate::error::{DocShareError, Result};

/// What a [`SyncMessage`] asks the receiver to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Replace the document content with the payload.
    Update,
}

impl SyncAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncAction::Update => "update",
        }
    }
}

impl std::fmt::Display for SyncAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single sync frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncMessage {
    /// Identifier of the document this frame refers to
    pub document_id: i64,
    /// Opaque identifier of the peer that originated the edit
    pub user_id: String,
    pub action: SyncAction,
    /// Full document body
    pub content: String,
}

impl SyncMessage {
    /// Build an `update` frame.
    pub fn update(document_id: i64, user_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            document_id,
            user_id: user_id.into(),
            action: SyncAction::Update,
            content: content.into(),
        }
    }

    /// Encode this message as a text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| DocShareError::MalformedMessage(e.to_string()))
    }

    /// Decode a text frame.
    ///
    /// Fails with [`DocShareError::MalformedMessage`] when the frame is not a
    /// JSON object, a required field is missing, or a field has the wrong type.
    /// Unknown extra fields are ignored.
    pub fn decode(frame: &str) -> Result<Self> {
        serde_json::from_str(frame).map_err(|e| DocShareError::MalformedMessage(e.to_string()))
    }

    /// Decode a binary frame, which must hold UTF-8 JSON.
    pub fn decode_bytes(frame: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(frame)
            .map_err(|e| DocShareError::MalformedMessage(format!("frame is not UTF-8: {}", e)))?;
        Self::decode(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_encode_uses_wire_field_names() {
        let msg = SyncMessage::update(1, "host", "Body");
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({"documentId": 1, "userId": "host", "action": "update", "content": "Body"})
        );
        assert_eq!(value.as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_decode_valid_frame() {
        let msg = SyncMessage::decode(
            r##"{"documentId":42,"userId":"peer-1","action":"update","content":"# Notes"}"##,
        )
        .unwrap();

        assert_eq!(msg.document_id, 42);
        assert_eq!(msg.user_id, "peer-1");
        assert_eq!(msg.action, SyncAction::Update);
        assert_eq!(msg.content, "# Notes");
    }

    #[test]
    fn test_decode_missing_content_is_malformed() {
        let err = SyncMessage::decode(r#"{"documentId":1,"userId":"p","action":"update"}"#)
            .unwrap_err();
        assert!(matches!(err, DocShareError::MalformedMessage(_)));
        assert!(err.to_string().contains("content"));
    }

    #[test]
    fn test_decode_wrong_field_type_is_malformed() {
        let err = SyncMessage::decode(
            r#"{"documentId":"one","userId":"p","action":"update","content":"x"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DocShareError::MalformedMessage(_)));
    }

    #[test]
    fn test_decode_unknown_action_is_malformed() {
        let err = SyncMessage::decode(
            r#"{"documentId":1,"userId":"p","action":"delete","content":"x"}"#,
        )
        .unwrap_err();
        assert!(matches!(err, DocShareError::MalformedMessage(_)));
    }

    #[test]
    fn test_decode_rejects_non_objects() {
        assert!(SyncMessage::decode("not json").is_err());
        assert!(SyncMessage::decode("[1,2,3]").is_err());
        assert!(SyncMessage::decode_bytes(&[0xff, 0xfe]).is_err());
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let msg = SyncMessage::decode(
            r#"{"documentId":3,"userId":"p","action":"update","content":"x","title":"T"}"#,
        )
        .unwrap();
        assert_eq!(msg, SyncMessage::update(3, "p", "x"));
    }
}
