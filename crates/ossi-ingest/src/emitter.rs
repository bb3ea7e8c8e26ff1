//! Record emission for one object's line stream
//!
//! Header lines update the per-object [`ObjectMetadataState`]; data lines go
//! through the codec and every resulting record is enriched with the current
//! metadata and the object's provenance before it is pushed downstream.

use serde_json::Value;
use tracing::{debug, trace};

use crate::codec::Codec;
use crate::error::Result;
use crate::metadata::{LineKind, ObjectMetadataState};
use crate::reader::ObjectLines;
use crate::record::{Record, CLOUDFRONT_FIELDS_FIELD, CLOUDFRONT_VERSION_FIELD, PROVENANCE_KEY};
use crate::sink::RecordSink;
use crate::storage::ObjectProperties;

/// Counters for one emitted object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmitStats {
    pub lines: u64,
    pub metadata_lines: u64,
    pub records: u64,
}

pub struct RecordEmitter<'a> {
    sink: &'a dyn RecordSink,
    include_object_properties: bool,
}

impl<'a> RecordEmitter<'a> {
    pub fn new(sink: &'a dyn RecordSink, include_object_properties: bool) -> Self {
        Self {
            sink,
            include_object_properties,
        }
    }

    /// Drain `lines`, decoding and pushing records until the stream ends.
    ///
    /// Records already pushed stay pushed if a later line fails.
    pub async fn emit_object(
        &self,
        lines: &mut ObjectLines,
        properties: &ObjectProperties,
        codec: &mut dyn Codec,
    ) -> Result<EmitStats> {
        let key = lines.key().to_string();
        let mut state = ObjectMetadataState::new();
        let mut stats = EmitStats::default();

        while let Some(line) = lines.next_line().await {
            let line = line?;
            stats.lines += 1;

            let kind = LineKind::classify(&line);
            if kind.is_metadata() {
                state.observe(kind);
                trace!(key = %key, line = %line, "Updated object metadata");
                stats.metadata_lines += 1;
                continue;
            }

            for record in codec.decode(&line)? {
                self.push(record, &state, &key, properties).await?;
                stats.records += 1;
            }
        }

        for record in codec.flush() {
            self.push(record, &state, &key, properties).await?;
            stats.records += 1;
        }

        debug!(
            key = %key,
            lines = stats.lines,
            records = stats.records,
            "Finished emitting object"
        );

        Ok(stats)
    }

    async fn push(
        &self,
        mut record: Record,
        state: &ObjectMetadataState,
        key: &str,
        properties: &ObjectProperties,
    ) -> Result<()> {
        self.enrich(&mut record, state, key, properties);
        self.sink.push(record).await
    }

    fn enrich(
        &self,
        record: &mut Record,
        state: &ObjectMetadataState,
        key: &str,
        properties: &ObjectProperties,
    ) {
        if let Some(ref version) = state.cloudfront_version {
            record.set(CLOUDFRONT_VERSION_FIELD, Value::String(version.clone()));
        }
        if let Some(ref fields) = state.cloudfront_fields {
            record.set(CLOUDFRONT_FIELDS_FIELD, Value::String(fields.clone()));
        }

        if self.include_object_properties {
            for (name, value) in properties {
                record.set_provenance(name.as_str(), value.as_str());
            }
        }
        record.set_provenance(PROVENANCE_KEY, key);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::codec::PlainCodec;
    use crate::error::{CodecError, IngestError};
    use crate::reader::ObjectLineReader;
    use crate::sink::ChannelSink;
    use crate::storage::MemoryStore;
    use tokio::sync::mpsc;

    async fn emit(
        store: &MemoryStore,
        key: &str,
        include: bool,
        codec: &mut dyn Codec,
    ) -> (Result<EmitStats>, Vec<Record>) {
        let (sink, mut rx) = ChannelSink::channel(1024);
        let emitter = RecordEmitter::new(&sink, include);
        let (mut lines, properties) = ObjectLineReader::new(store).open("logs", key).await.unwrap();
        let result = emitter.emit_object(&mut lines, &properties, codec).await;
        drop(sink);
        (result, drain(&mut rx).await)
    }

    async fn drain(rx: &mut mpsc::Receiver<Record>) -> Vec<Record> {
        let mut out = Vec::new();
        while let Some(r) = rx.recv().await {
            out.push(r);
        }
        out
    }

    #[tokio::test]
    async fn test_metadata_is_attached_to_following_records() {
        let store = MemoryStore::new();
        store
            .put("logs", "cf.log", "#Version: 1.0\n#Fields: a b c\n1 2 3\n4 5 6\n")
            .unwrap();

        let (result, records) = emit(&store, "cf.log", false, &mut PlainCodec).await;
        let stats = result.unwrap();

        assert_eq!(stats, EmitStats { lines: 4, metadata_lines: 2, records: 2 });
        for record in &records {
            assert_eq!(record.get_str("cloudfront_version"), Some("1.0"));
            assert_eq!(record.get_str("cloudfront_fields"), Some("a b c"));
            assert_eq!(record.provenance("key"), Some("cf.log"));
            assert_eq!(record.metadata.oss.len(), 1);
        }
        assert_eq!(records[0].get_str("message"), Some("1 2 3"));
    }

    #[tokio::test]
    async fn test_records_before_headers_have_no_metadata() {
        let store = MemoryStore::new();
        store.put("logs", "a.log", "early\n#Version: 2.0\nlate\n").unwrap();

        let (_, records) = emit(&store, "a.log", false, &mut PlainCodec).await;

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].get("cloudfront_version"), None);
        assert_eq!(records[1].get_str("cloudfront_version"), Some("2.0"));
        assert_eq!(records[1].get("cloudfront_fields"), None);
    }

    #[tokio::test]
    async fn test_object_properties_are_optional_provenance() {
        let store = MemoryStore::new();
        let mut properties = ObjectProperties::new();
        properties.insert("Content-Type".to_string(), "text/plain".to_string());
        store
            .put_with_properties("logs", "a.log", "x\n", properties)
            .unwrap();

        let (_, without) = emit(&store, "a.log", false, &mut PlainCodec).await;
        assert_eq!(without[0].provenance("Content-Type"), None);

        let (_, with) = emit(&store, "a.log", true, &mut PlainCodec).await;
        assert_eq!(with[0].provenance("Content-Type"), Some("text/plain"));
        assert_eq!(with[0].provenance("Content-Length"), Some("2"));
        assert_eq!(with[0].provenance("key"), Some("a.log"));
    }

    /// Emits one record per two lines, holding the odd line until flushed.
    struct PairCodec {
        pending: Option<String>,
    }

    impl Codec for PairCodec {
        fn decode(&mut self, line: &str) -> std::result::Result<Vec<Record>, CodecError> {
            match self.pending.take() {
                Some(first) => Ok(vec![Record::from_message(format!("{first}+{line}"))]),
                None => {
                    self.pending = Some(line.to_string());
                    Ok(Vec::new())
                },
            }
        }

        fn flush(&mut self) -> Vec<Record> {
            self.pending.take().map(Record::from_message).into_iter().collect()
        }
    }

    #[tokio::test]
    async fn test_flushed_records_are_enriched() {
        let store = MemoryStore::new();
        store
            .put("logs", "p.log", "#Version: 1.0\na\nb\n#Fields: f\nc\n")
            .unwrap();

        let mut codec = PairCodec { pending: None };
        let (result, records) = emit(&store, "p.log", false, &mut codec).await;

        assert_eq!(result.unwrap().records, 2);
        assert_eq!(records[1].get_str("message"), Some("c"));
        assert_eq!(records[1].get_str("cloudfront_version"), Some("1.0"));
        assert_eq!(records[1].get_str("cloudfront_fields"), Some("f"));
        assert_eq!(records[1].provenance("key"), Some("p.log"));
    }

    struct RejectingCodec;

    impl Codec for RejectingCodec {
        fn decode(&mut self, line: &str) -> std::result::Result<Vec<Record>, CodecError> {
            if line == "bad" {
                Err(CodecError::new("unparseable"))
            } else {
                Ok(vec![Record::from_message(line)])
            }
        }
    }

    #[tokio::test]
    async fn test_codec_error_aborts_object_without_rollback() {
        let store = MemoryStore::new();
        store.put("logs", "c.log", "ok\nbad\nnever\n").unwrap();

        let (result, records) = emit(&store, "c.log", false, &mut RejectingCodec).await;

        assert!(matches!(result, Err(IngestError::Codec(_))));
        assert_eq!(records.len(), 1);
    }
}
