use serde::Serialize;
use thiserror::Error;

/// Unified error type for docshare operations
#[derive(Debug, Error)]
pub enum DocShareError {
    // Server lifecycle errors
    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    // Transport errors
    #[error("Connection error: {0}")]
    Connection(String),

    // Protocol errors
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    // Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Document {0} not found")]
    DocumentNotFound(i64),

    // Export errors
    #[error("Invalid rich text delta: {0}")]
    InvalidDelta(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DocShareError {
    /// Variant name, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            DocShareError::Bind { .. } => "BindError",
            DocShareError::Connection(_) => "ConnectionError",
            DocShareError::MalformedMessage(_) => "MalformedMessage",
            DocShareError::Persistence(_) => "PersistenceError",
            DocShareError::DocumentNotFound(_) => "DocumentNotFound",
            DocShareError::InvalidDelta(_) => "InvalidDelta",
            DocShareError::Export(_) => "ExportError",
            #[cfg(all(feature = "sqlite", not(target_arch = "wasm32")))]
            DocShareError::Sqlite(_) => "PersistenceError",
            DocShareError::Io(_) => "Io",
        }
    }
}

/// Result type alias for docshare operations
pub type Result<T> = std::result::Result<T, DocShareError>;

/// A serializable representation of DocShareError for a UI layer
#[derive(Debug, Clone, Serialize)]
pub struct SerializableError {
    /// Error kind/variant name
    pub kind: String,
    /// Human-readable error message
    pub message: String,
}

impl From<&DocShareError> for SerializableError {
    fn from(err: &DocShareError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<DocShareError> for SerializableError {
    fn from(err: DocShareError) -> Self {
        SerializableError::from(&err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializable_error_kind() {
        let err = DocShareError::Bind {
            addr: "0.0.0.0:8080".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        let ser = SerializableError::from(&err);
        assert_eq!(ser.kind, "BindError");
        assert!(ser.message.contains("0.0.0.0:8080"));

        let ser: SerializableError = DocShareError::DocumentNotFound(7).into();
        assert_eq!(ser.kind, "DocumentNotFound");
        assert_eq!(ser.message, "Document 7 not found");
    }
}
