//! OSSI Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Notification-driven ingestion of objects from an OSS bucket.
//!
//! # Flow
//!
//! 1. Poll the MNS queue for a notification ([`queue`])
//! 2. Decode it into object descriptors ([`notification`])
//! 3. Drop directories and keys outside the prefix or matching the exclude
//!    pattern ([`filter`])
//! 4. Stream each object's lines, gunzipping `.gz`/`.gzip` keys ([`reader`])
//! 5. Track `#Version:`/`#Fields:` headers ([`metadata`]) and push decoded,
//!    enriched records to the sink ([`emitter`], [`codec`], [`sink`])
//! 6. Back up and optionally delete the object ([`postprocess`])
//! 7. Acknowledge the notification ([`pipeline`])
//!
//! [`scheduler::IngestionScheduler`] runs this loop until stopped.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ossi_ingest::{
//!     config::IngestConfig, pipeline::Ingestor, queue::MnsClient,
//!     scheduler::IngestionScheduler, sink::JsonLinesSink, storage::OssStorage,
//! };
//!
//! #[tokio::main]
//! async fn main() -> ossi_ingest::Result<()> {
//!     let config = IngestConfig::load("ossi.toml")?;
//!     let store = Arc::new(OssStorage::new(&config)?);
//!     let queue = Arc::new(MnsClient::new(
//!         &config.mns_settings,
//!         &config.access_key_id,
//!         &config.access_key_secret,
//!     )?);
//!     let sink = Arc::new(JsonLinesSink::new(tokio::io::stdout()));
//!
//!     let ingestor = Ingestor::new(&config, store, queue, sink)?;
//!     ingestor.register(&config).await?;
//!
//!     let scheduler = IngestionScheduler::new(Arc::new(ingestor), &config.mns_settings);
//!     scheduler.run().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod emitter;
pub mod error;
pub mod filter;
pub mod metadata;
pub mod notification;
pub mod pipeline;
pub mod postprocess;
pub mod queue;
pub mod reader;
pub mod record;
pub mod scheduler;
pub mod sink;
pub mod storage;

pub use error::{IngestError, Result};
