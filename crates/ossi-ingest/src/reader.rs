//! Streaming line reader for stored objects
//!
//! Objects are read in a single forward pass. The byte stream is bridged
//! onto a blocking task where it is optionally gunzipped and split into
//! lines; lines come back over a bounded channel. Dropping [`ObjectLines`]
//! closes the channel, which makes the blocking task stop at its next line
//! and release the body, the decompressor and the buffer.

use flate2::read::MultiGzDecoder;
use std::io::{BufRead, BufReader, Read};
use tokio::sync::mpsc;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, instrument};

use crate::error::{IngestError, Result};
use crate::storage::{ObjectProperties, ObjectStore};

/// Lines buffered ahead of the consumer
const LINE_CHANNEL_CAPACITY: usize = 1024;

/// Read buffer for the decompressed stream
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Whether `key` names gzip-compressed content
pub fn is_gzip(key: &str) -> bool {
    key.ends_with(".gz") || key.ends_with(".gzip")
}

/// Lazily produced lines of one object
#[derive(Debug)]
pub struct ObjectLines {
    key: String,
    rx: mpsc::Receiver<Result<String>>,
}

impl ObjectLines {
    /// Next line, without its terminator. `None` once the object is
    /// exhausted; an `Err` is always the last item.
    pub async fn next_line(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

pub struct ObjectLineReader<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> ObjectLineReader<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    /// Open an object and start streaming its lines.
    #[instrument(skip(self))]
    pub async fn open(&self, bucket: &str, key: &str) -> Result<(ObjectLines, ObjectProperties)> {
        let handle = self.store.get_object(bucket, key).await?;
        let gzip = is_gzip(key);

        debug!(gzip, "Opened object stream");

        let bridge = SyncIoBridge::new(handle.body);
        let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
        let task_key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let raw: Box<dyn Read + Send> = if gzip {
                Box::new(MultiGzDecoder::new(bridge))
            } else {
                Box::new(bridge)
            };
            pump_lines(BufReader::with_capacity(READ_BUFFER_SIZE, raw), &tx, &task_key);
        });

        Ok((
            ObjectLines {
                key: key.to_string(),
                rx,
            },
            handle.properties,
        ))
    }
}

/// Split `reader` into UTF-8 lines and send them until the input ends, an
/// error occurs, or the receiver goes away.
fn pump_lines<R: BufRead>(mut reader: R, tx: &mpsc::Sender<Result<String>>, key: &str) {
    loop {
        let mut buf = Vec::new();
        let item = match reader.read_until(b'\n', &mut buf) {
            Ok(0) => return,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                String::from_utf8(buf)
                    .map_err(|e| IngestError::object_read(key, format!("invalid UTF-8: {e}")))
            },
            Err(e) => Err(IngestError::object_read(key, e)),
        };

        let failed = item.is_err();
        if tx.blocking_send(item).is_err() || failed {
            return;
        }
    }
}
