//! Notification messages and their decoding into object descriptors
//!
//! A message body is base64-encoded JSON in the OSS event notification
//! schema:
//!
//! ```json
//! {"events": [{"eventName": "ObjectCreated:PutObject",
//!              "oss": {"bucket": {"name": "logs"},
//!                      "object": {"key": "a.log", "size": 42, "eTag": "..."}}}]}
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;

use crate::error::{IngestError, Result};

/// A message received from the notification queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationMessage {
    pub message_id: String,
    /// Handle used to delete the message once processed
    pub receipt_handle: String,
    /// Encoded payload, see [`decode`]
    pub body: String,
    /// How many times the queue has delivered this message
    pub dequeue_count: u32,
}

/// One object mutation reported by a notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectChangeDescriptor {
    pub event_name: String,
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: String,
}

#[derive(Debug, Deserialize)]
struct EventDocument {
    events: Vec<EventEntry>,
}

#[derive(Debug, Deserialize)]
struct EventEntry {
    #[serde(rename = "eventName")]
    event_name: String,
    oss: OssEntity,
}

#[derive(Debug, Deserialize)]
struct OssEntity {
    object: OssObject,
}

#[derive(Debug, Deserialize)]
struct OssObject {
    key: String,
    #[serde(default)]
    size: u64,
    #[serde(rename = "eTag", default)]
    etag: String,
}

/// Decode a notification body into object descriptors, in payload order.
///
/// Descriptors are bound to `bucket`, the source bucket this pipeline reads
/// from.
pub fn decode(body: &[u8], bucket: &str) -> Result<Vec<ObjectChangeDescriptor>> {
    let compact: Vec<u8> = body
        .iter()
        .copied()
        .filter(|b| !b.is_ascii_whitespace())
        .collect();

    let json = STANDARD
        .decode(&compact)
        .map_err(|e| IngestError::Decode(format!("invalid base64 body: {e}")))?;

    let document: EventDocument = serde_json::from_slice(&json)
        .map_err(|e| IngestError::Decode(format!("invalid event document: {e}")))?;

    Ok(document
        .events
        .into_iter()
        .map(|event| ObjectChangeDescriptor {
            event_name: event.event_name,
            bucket: bucket.to_string(),
            key: event.oss.object.key,
            size: event.oss.object.size,
            etag: event.oss.object.etag,
        })
        .collect())
}

/// Encode an event document the way OSS publishes it. Used to build
/// messages for in-memory queues.
pub fn encode(document: &serde_json::Value) -> String {
    STANDARD.encode(document.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> serde_json::Value {
        json!({
            "events": [
                {
                    "eventName": "ObjectCreated:PutObject",
                    "eventSource": "acs:oss",
                    "oss": {
                        "bucket": {"name": "other-bucket"},
                        "object": {"key": "logs/a.log", "size": 120, "eTag": "0CC175B9C0F1B6A831C399E269772661"}
                    }
                },
                {
                    "eventName": "ObjectCreated:PostObject",
                    "oss": {"object": {"key": "logs/b.log.gz", "size": 7, "eTag": "E1"}}
                }
            ]
        })
    }

    #[test]
    fn test_decode_preserves_order() {
        let body = encode(&sample());
        let descriptors = decode(body.as_bytes(), "logs").unwrap();

        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].key, "logs/a.log");
        assert_eq!(descriptors[0].event_name, "ObjectCreated:PutObject");
        assert_eq!(descriptors[0].size, 120);
        assert_eq!(descriptors[0].bucket, "logs");
        assert_eq!(descriptors[1].key, "logs/b.log.gz");
        assert_eq!(descriptors[1].etag, "E1");
    }

    #[test]
    fn test_decode_tolerates_wrapped_base64() {
        let body = encode(&sample());
        let (head, tail) = body.split_at(body.len() / 2);
        let wrapped = format!("{head}\n{tail}\n");

        assert_eq!(decode(wrapped.as_bytes(), "logs").unwrap().len(), 2);
    }

    #[test]
    fn test_decode_empty_events() {
        let body = encode(&json!({"events": []}));
        assert!(decode(body.as_bytes(), "logs").unwrap().is_empty());
    }

    #[test]
    fn test_decode_rejects_bad_base64() {
        let err = decode(b"%%% not base64 %%%", "logs").unwrap_err();
        assert!(matches!(err, IngestError::Decode(_)));
    }

    #[test]
    fn test_decode_rejects_missing_events() {
        let body = encode(&json!({"records": []}));
        assert!(matches!(
            decode(body.as_bytes(), "logs"),
            Err(IngestError::Decode(_))
        ));
    }

    #[test]
    fn test_decode_rejects_missing_key() {
        let body = encode(&json!({"events": [{"eventName": "x", "oss": {"object": {"size": 1}}}]}));
        assert!(decode(body.as_bytes(), "logs").is_err());
    }
}
