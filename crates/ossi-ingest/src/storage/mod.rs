//! Object storage access
//!
//! [`ObjectStore`] is the set of storage operations the pipeline needs.
//! [`OssStorage`] talks to an S3-compatible endpoint; [`MemoryStore`] keeps
//! buckets in memory.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::pin::Pin;
use tokio::io::AsyncRead;

use crate::error::Result;

pub mod memory;
pub mod s3;

pub use memory::MemoryStore;
pub use s3::OssStorage;

/// Raw object properties (HTTP-style header names to values)
pub type ObjectProperties = BTreeMap<String, String>;

/// Byte stream of an object's content
pub type ObjectBody = Pin<Box<dyn AsyncRead + Send>>;

/// An opened object: its content stream and raw properties
pub struct ObjectHandle {
    pub body: ObjectBody,
    pub properties: ObjectProperties,
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("properties", &self.properties)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Open an object for streaming
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectHandle>;

    /// Server-side copy
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()>;

    /// Download an object to a local file, replacing it if present
    async fn download_to_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn bucket_exists(&self, bucket: &str) -> Result<bool>;

    async fn create_bucket(&self, bucket: &str) -> Result<()>;
}
