//! Records handed to the downstream sink

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field holding the raw line for line-oriented codecs.
pub const MESSAGE_FIELD: &str = "message";
pub const TAGS_FIELD: &str = "tags";
pub const CLOUDFRONT_VERSION_FIELD: &str = "cloudfront_version";
pub const CLOUDFRONT_FIELDS_FIELD: &str = "cloudfront_fields";

/// Provenance key that is always present.
pub const PROVENANCE_KEY: &str = "key";

/// Reserved top-level name of the provenance namespace
pub const METADATA_FIELD: &str = "@metadata";

/// One decoded record plus provenance about the object it came from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    fields: Map<String, Value>,
    #[serde(rename = "@metadata", default)]
    pub metadata: RecordMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMetadata {
    /// Object storage provenance: always `key`, optionally raw properties
    #[serde(default)]
    pub oss: BTreeMap<String, String>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record with a single `message` field
    pub fn from_message(message: impl Into<String>) -> Self {
        let mut record = Self::new();
        record.set(MESSAGE_FIELD, Value::String(message.into()));
        record
    }

    /// Record from a decoded object. A top-level `@metadata` entry is
    /// folded into the provenance namespace instead of becoming a field.
    pub fn from_fields(mut fields: Map<String, Value>) -> Self {
        let mut record = Self::new();
        if let Some(reserved) = fields.remove(METADATA_FIELD) {
            record.absorb_metadata(reserved);
        }
        record.fields = fields;
        record
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// Set a payload field; `@metadata` is routed to provenance.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        let field = field.into();
        if field == METADATA_FIELD {
            self.absorb_metadata(value);
        } else {
            self.fields.insert(field, value);
        }
    }

    /// Only the `oss` namespace is kept; values are stringified.
    fn absorb_metadata(&mut self, value: Value) {
        let Value::Object(mut namespaces) = value else {
            return;
        };
        let Some(Value::Object(oss)) = namespaces.remove("oss") else {
            return;
        };
        for (name, value) in oss {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            self.metadata.oss.insert(name, value);
        }
    }

    pub fn add_tag(&mut self, tag: &str) {
        let tags = self
            .fields
            .entry(TAGS_FIELD)
            .or_insert_with(|| Value::Array(Vec::new()));
        match tags {
            Value::Array(items) => items.push(Value::String(tag.to_string())),
            other => *other = Value::Array(vec![other.take(), Value::String(tag.to_string())]),
        }
    }

    pub fn provenance(&self, name: &str) -> Option<&str> {
        self.metadata.oss.get(name).map(String::as_str)
    }

    pub fn set_provenance(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.metadata.oss.insert(name.into(), value.into());
    }
}
