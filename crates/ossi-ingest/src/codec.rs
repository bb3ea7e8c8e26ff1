//! Record decoders
//!
//! A codec turns one data line into zero or more records. Codecs may buffer
//! partial records between lines; [`Codec::flush`] drains whatever is left
//! when an object's content ends. A fresh codec is built for every object so
//! buffered state never leaks across objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;
use crate::record::Record;

/// Tag added by [`JsonCodec`] when a line is not a JSON object.
pub const JSON_PARSE_FAILURE_TAG: &str = "_jsonparsefailure";

/// Line decoder
pub trait Codec: Send {
    /// Decode one data line
    fn decode(&mut self, line: &str) -> Result<Vec<Record>, CodecError>;

    /// Drain buffered records at end of stream
    fn flush(&mut self) -> Vec<Record> {
        Vec::new()
    }
}

/// Builds a fresh codec for each object
pub trait CodecFactory: Send + Sync {
    fn build(&self) -> Box<dyn Codec>;
}

/// Built-in codecs selectable from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Plain,
    Json,
}

impl CodecFactory for CodecKind {
    fn build(&self) -> Box<dyn Codec> {
        match self {
            CodecKind::Plain => Box::new(PlainCodec),
            CodecKind::Json => Box::new(JsonCodec),
        }
    }
}

/// One record per line, carrying the line as `message`
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCodec;

impl Codec for PlainCodec {
    fn decode(&mut self, line: &str) -> Result<Vec<Record>, CodecError> {
        Ok(vec![Record::from_message(line)])
    }
}

/// One record per JSON object line
///
/// Lines that are not JSON objects still produce a record holding the raw
/// line, tagged with [`JSON_PARSE_FAILURE_TAG`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn decode(&mut self, line: &str) -> Result<Vec<Record>, CodecError> {
        if line.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(fields)) => Ok(vec![Record::from_fields(fields)]),
            _ => {
                let mut record = Record::from_message(line);
                record.add_tag(JSON_PARSE_FAILURE_TAG);
                Ok(vec![record])
            },
        }
    }
}
