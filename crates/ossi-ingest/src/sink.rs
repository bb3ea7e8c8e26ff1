//! Downstream record sinks

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};

use crate::error::{IngestError, Result};
use crate::record::Record;

/// Append-only consumer of finished records
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Hand a record to the consumer; ownership is transferred.
    async fn push(&self, record: Record) -> Result<()>;
}

/// Sink backed by a bounded channel. `push` waits when the consumer falls
/// behind.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Record>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<Record>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving half.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Record>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl RecordSink for ChannelSink {
    async fn push(&self, record: Record) -> Result<()> {
        self.tx
            .send(record)
            .await
            .map_err(|_| IngestError::Sink("record channel closed".to_string()))
    }
}

/// Writes each record as one JSON document per line
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W> JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W> RecordSink for JsonLinesSink<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn push(&self, record: Record) -> Result<()> {
        let mut line = serde_json::to_vec(&record)
            .map_err(|e| IngestError::Sink(format!("failed to serialize record: {e}")))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }
}
