//! Error types for the ingestion pipeline
//!
//! The variants mirror how the scheduler reacts to a failure:
//! configuration errors abort startup, decode errors drop a notification,
//! object-level errors skip one object, and backend errors are logged and
//! left to the next poll.

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Main error type for ingestion
#[derive(Error, Debug)]
pub enum IngestError {
    /// Invalid or inconsistent configuration, detected at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Notification body could not be decoded into object descriptors
    #[error("Failed to decode notification: {0}")]
    Decode(String),

    /// Object content could not be fetched, decompressed or decoded as text
    #[error("Failed to read object '{key}': {message}")]
    ObjectRead { key: String, message: String },

    /// Record decoder rejected a line
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    /// Object storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Notification queue backend failure
    #[error("Queue error: {0}")]
    Queue(String),

    /// Downstream sink is closed or failed to accept a record
    #[error("Sink error: {0}")]
    Sink(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IngestError {
    pub fn config(message: impl Into<String>) -> Self {
        IngestError::Config(message.into())
    }

    pub fn object_read(key: impl Into<String>, message: impl std::fmt::Display) -> Self {
        IngestError::ObjectRead {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn storage(message: impl std::fmt::Display) -> Self {
        IngestError::Storage(message.to_string())
    }

    pub fn queue(message: impl std::fmt::Display) -> Self {
        IngestError::Queue(message.to_string())
    }
}

/// Error raised by a record decoder for a single line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CodecError {
    pub message: String,
}

impl CodecError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<config::ConfigError> for IngestError {
    fn from(err: config::ConfigError) -> Self {
        IngestError::Config(err.to_string())
    }
}

impl From<regex::Error> for IngestError {
    fn from(err: regex::Error) -> Self {
        IngestError::Config(format!("invalid exclude_pattern: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_read_message_carries_key() {
        let err = IngestError::object_read("logs/a.gz", "corrupt deflate stream");
        assert_eq!(
            err.to_string(),
            "Failed to read object 'logs/a.gz': corrupt deflate stream"
        );
    }

    #[test]
    fn test_codec_error_converts() {
        let err: IngestError = CodecError::new("unterminated record").into();
        assert!(matches!(err, IngestError::Codec(_)));
        assert_eq!(err.to_string(), "Codec error: unterminated record");
    }
}
