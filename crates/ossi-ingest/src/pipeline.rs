//! Per-notification processing
//!
//! [`Ingestor`] ties the pieces together for one message: decode the body,
//! filter each descriptor, stream and emit the object, post-process it, and
//! finally decide whether to acknowledge. Every object yields a typed
//! [`ObjectOutcome`]; nothing that goes wrong with one object stops its
//! siblings.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::codec::CodecFactory;
use crate::config::{AckPolicy, IngestConfig};
use crate::emitter::{EmitStats, RecordEmitter};
use crate::error::{IngestError, Result};
use crate::filter::{FilterDecision, ObjectFilter, SkipReason};
use crate::notification::{self, NotificationMessage, ObjectChangeDescriptor};
use crate::postprocess::{PostProcessOutcome, PostProcessor};
use crate::queue::NotificationQueue;
use crate::reader::ObjectLineReader;
use crate::sink::RecordSink;
use crate::storage::ObjectStore;

/// What happened to one descriptor
#[derive(Debug)]
pub enum ObjectOutcome {
    Skipped(SkipReason),
    Processed {
        stats: EmitStats,
        post: PostProcessOutcome,
    },
    Failed(IngestError),
}

/// Summary of one processed notification
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NotificationReport {
    pub message_id: String,
    /// Descriptors decoded from the body
    pub total: usize,
    /// Descriptors that passed the filter (processed or failed)
    pub accepted: usize,
    pub skipped_directory: usize,
    pub skipped_prefix: usize,
    pub skipped_excluded: usize,
    /// Accepted objects whose read or decode failed
    pub failed: usize,
    pub records: u64,
    pub post_failures: usize,
    pub decode_error: Option<String>,
    /// A stop request arrived before all descriptors were handled
    pub interrupted: bool,
    pub acknowledged: bool,
}

impl NotificationReport {
    pub fn skipped(&self) -> usize {
        self.skipped_directory + self.skipped_prefix + self.skipped_excluded
    }

    fn record(&mut self, outcome: &ObjectOutcome) {
        match outcome {
            ObjectOutcome::Skipped(SkipReason::Directory) => self.skipped_directory += 1,
            ObjectOutcome::Skipped(SkipReason::PrefixMismatch) => self.skipped_prefix += 1,
            ObjectOutcome::Skipped(SkipReason::Excluded) => self.skipped_excluded += 1,
            ObjectOutcome::Processed { stats, post } => {
                self.accepted += 1;
                self.records += stats.records;
                self.post_failures += post.failures.len();
            },
            ObjectOutcome::Failed(_) => {
                self.accepted += 1;
                self.failed += 1;
            },
        }
    }
}

pub struct Ingestor {
    bucket: String,
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn NotificationQueue>,
    sink: Arc<dyn RecordSink>,
    codecs: Arc<dyn CodecFactory>,
    filter: ObjectFilter,
    post: PostProcessor,
    include_object_properties: bool,
    ack_policy: AckPolicy,
}

impl Ingestor {
    pub fn new(
        config: &IngestConfig,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn NotificationQueue>,
        sink: Arc<dyn RecordSink>,
    ) -> Result<Self> {
        Ok(Self {
            bucket: config.bucket.clone(),
            store,
            queue,
            sink,
            codecs: Arc::new(config.codec),
            filter: ObjectFilter::new(config.prefix.clone(), config.exclude_regex()?),
            post: PostProcessor::from_config(config),
            include_object_properties: config.include_object_properties,
            ack_policy: config.ack_policy,
        })
    }

    /// Replace the configured codec
    pub fn with_codec(mut self, codecs: Arc<dyn CodecFactory>) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn queue(&self) -> &Arc<dyn NotificationQueue> {
        &self.queue
    }

    /// Prepare backup targets before the first poll.
    pub async fn register(&self, config: &IngestConfig) -> Result<()> {
        info!(bucket = %self.bucket, "Registering OSS ingestion");

        if let Some(ref backup) = config.backup_to_bucket {
            if backup == &self.bucket {
                return Err(IngestError::config(
                    "backup bucket and source bucket should be different",
                ));
            }
            if !self.store.bucket_exists(backup).await? {
                info!(bucket = %backup, "Creating backup bucket");
                self.store.create_bucket(backup).await?;
            }
        }

        if let Some(ref dir) = config.backup_to_dir {
            if !tokio::fs::try_exists(dir).await? {
                tokio::fs::create_dir_all(dir).await?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    tokio::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                        .await?;
                }
                info!(dir = %dir.display(), "Created backup directory");
            }
        }

        Ok(())
    }

    /// Filter, read, emit and post-process one object.
    #[instrument(skip(self, descriptor), fields(key = %descriptor.key))]
    pub async fn process_object(&self, descriptor: &ObjectChangeDescriptor) -> ObjectOutcome {
        let key = descriptor.key.as_str();

        if let FilterDecision::Skip(reason) = self.filter.check(key) {
            info!(key = %key, reason = %reason, "Skipping object");
            return ObjectOutcome::Skipped(reason);
        }

        info!(key = %key, size = descriptor.size, "Processing object");

        let stats = match self.read_object(descriptor).await {
            Ok(stats) => stats,
            Err(e) => {
                error!(key = %key, error = %e, "Failed to read object, skipping");
                return ObjectOutcome::Failed(e);
            },
        };

        let post = self.post.run(self.store.as_ref(), &descriptor.bucket, key).await;
        if post.is_clean() {
            debug!(key = %key, steps = post.completed.len(), "Post-processing complete");
        } else {
            warn!(
                key = %key,
                failed = post.failures.len(),
                "Object read but post-processing incomplete"
            );
        }

        ObjectOutcome::Processed { stats, post }
    }

    async fn read_object(&self, descriptor: &ObjectChangeDescriptor) -> Result<EmitStats> {
        let reader = ObjectLineReader::new(self.store.as_ref());
        let (mut lines, properties) = reader.open(&descriptor.bucket, &descriptor.key).await?;

        let emitter = RecordEmitter::new(self.sink.as_ref(), self.include_object_properties);
        let mut codec = self.codecs.build();

        emitter
            .emit_object(&mut lines, &properties, codec.as_mut())
            .await
    }

    /// Process every descriptor of `message` in order, then acknowledge it
    /// according to the acknowledgment policy.
    ///
    /// Descriptors are not started once `stop` is cancelled; an interrupted
    /// message is left unacknowledged so the queue delivers it again.
    #[instrument(skip(self, message, stop), fields(message_id = %message.message_id))]
    pub async fn process_notification(
        &self,
        message: &NotificationMessage,
        stop: &CancellationToken,
    ) -> NotificationReport {
        let mut report = NotificationReport {
            message_id: message.message_id.clone(),
            ..Default::default()
        };

        match notification::decode(message.body.as_bytes(), &self.bucket) {
            Ok(descriptors) => {
                report.total = descriptors.len();
                for descriptor in &descriptors {
                    if stop.is_cancelled() {
                        report.interrupted = true;
                        break;
                    }
                    let outcome = self.process_object(descriptor).await;
                    report.record(&outcome);
                }
            },
            Err(e) => {
                error!(error = %e, "Dropping undecodable notification");
                report.decode_error = Some(e.to_string());
            },
        }

        report.acknowledged = self.finish(message, &report).await;

        info!(
            total = report.total,
            accepted = report.accepted,
            skipped = report.skipped(),
            failed = report.failed,
            records = report.records,
            acknowledged = report.acknowledged,
            "Notification processed"
        );

        report
    }

    async fn finish(&self, message: &NotificationMessage, report: &NotificationReport) -> bool {
        if report.interrupted {
            warn!("Stopped mid-notification, leaving message for redelivery");
            return false;
        }

        let acknowledge = report.decode_error.is_some()
            || self
                .ack_policy
                .should_acknowledge(report.failed, message.dequeue_count);

        if !acknowledge {
            info!(
                failed = report.failed,
                dequeue_count = message.dequeue_count,
                "Leaving notification for redelivery"
            );
            return false;
        }

        match self.queue.acknowledge(message).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Failed to acknowledge notification, it may be redelivered");
                false
            },
        }
    }
}
