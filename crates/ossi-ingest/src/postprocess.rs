//! Post-processing of read objects: backup copy, local backup, delete
//!
//! Steps run in that fixed order and independently: a failed copy does not
//! stop the local backup or the delete of the same object.

use std::path::{Component, Path, PathBuf};
use tracing::{debug, error};

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::storage::ObjectStore;

/// One post-processing action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostStep {
    BackupToBucket,
    BackupToDir,
    Delete,
}

/// Failures of a single object's post-processing
#[derive(Debug, Default)]
pub struct PostProcessOutcome {
    pub completed: Vec<PostStep>,
    pub failures: Vec<(PostStep, IngestError)>,
}

impl PostProcessOutcome {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostProcessor {
    backup_bucket: Option<String>,
    backup_prefix: String,
    backup_dir: Option<PathBuf>,
    delete: bool,
}

impl PostProcessor {
    pub fn new(
        backup_bucket: Option<String>,
        backup_prefix: Option<String>,
        backup_dir: Option<PathBuf>,
        delete: bool,
    ) -> Self {
        Self {
            backup_bucket,
            backup_prefix: backup_prefix.unwrap_or_default(),
            backup_dir,
            delete,
        }
    }

    pub fn from_config(config: &IngestConfig) -> Self {
        Self::new(
            config.backup_to_bucket.clone(),
            config.backup_add_prefix.clone(),
            config.backup_to_dir.clone(),
            config.delete,
        )
    }

    /// Key used for the backup copy of `key`
    pub fn backup_key(&self, key: &str) -> String {
        format!("{}{}", self.backup_prefix, key)
    }

    /// Local path mirroring `key` under the backup directory
    pub fn backup_path(&self, key: &str) -> Option<PathBuf> {
        self.backup_dir.as_ref().map(|dir| local_path(dir, key))
    }

    pub async fn run(&self, store: &dyn ObjectStore, bucket: &str, key: &str) -> PostProcessOutcome {
        let mut outcome = PostProcessOutcome::default();

        if let Some(ref backup_bucket) = self.backup_bucket {
            let backup_key = self.backup_key(key);
            record(
                &mut outcome,
                PostStep::BackupToBucket,
                key,
                store.copy_object(bucket, key, backup_bucket, &backup_key).await,
            );
        }

        if let Some(path) = self.backup_path(key) {
            record(
                &mut outcome,
                PostStep::BackupToDir,
                key,
                download(store, bucket, key, &path).await,
            );
        }

        if self.delete {
            record(
                &mut outcome,
                PostStep::Delete,
                key,
                store.delete_object(bucket, key).await,
            );
        }

        outcome
    }
}

fn record(outcome: &mut PostProcessOutcome, step: PostStep, key: &str, result: Result<()>) {
    match result {
        Ok(()) => {
            debug!(key = %key, step = ?step, "Post-processing step completed");
            outcome.completed.push(step);
        },
        Err(e) => {
            error!(key = %key, step = ?step, error = %e, "Post-processing step failed");
            outcome.failures.push((step, e));
        },
    }
}

async fn download(store: &dyn ObjectStore, bucket: &str, key: &str, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    store.download_to_file(bucket, key, path).await
}

/// Join an object key onto `dir`, keeping only normal path components so a
/// key can never point outside the directory.
fn local_path(dir: &Path, key: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    for component in Path::new(key).components() {
        if let Component::Normal(part) = component {
            path.push(part);
        }
    }
    path
}
