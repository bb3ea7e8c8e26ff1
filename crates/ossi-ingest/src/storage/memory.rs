//! In-memory object store
//!
//! Buckets live in a shared map, so clones observe each other's writes.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, RwLock};

use super::{ObjectHandle, ObjectProperties, ObjectStore};
use crate::error::{IngestError, Result};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    properties: ObjectProperties,
}

type Buckets = HashMap<String, BTreeMap<String, StoredObject>>;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    buckets: Arc<RwLock<Buckets>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Buckets>> {
        self.buckets
            .read()
            .map_err(|_| IngestError::storage("memory store lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Buckets>> {
        self.buckets
            .write()
            .map_err(|_| IngestError::storage("memory store lock poisoned"))
    }

    /// Store an object, creating the bucket if needed.
    pub fn put(&self, bucket: &str, key: &str, data: impl Into<Vec<u8>>) -> Result<()> {
        self.put_with_properties(bucket, key, data, ObjectProperties::new())
    }

    pub fn put_with_properties(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Vec<u8>>,
        mut properties: ObjectProperties,
    ) -> Result<()> {
        let data = data.into();
        properties
            .entry("Content-Length".to_string())
            .or_insert_with(|| data.len().to_string());

        self.write()?
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), StoredObject { data, properties });
        Ok(())
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.read()
            .map(|b| b.get(bucket).is_some_and(|objects| objects.contains_key(key)))
            .unwrap_or(false)
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.read()
            .map(|b| {
                b.get(bucket)
                    .map(|objects| objects.keys().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn fetch(&self, bucket: &str, key: &str) -> Result<StoredObject> {
        self.read()?
            .get(bucket)
            .and_then(|objects| objects.get(key))
            .cloned()
            .ok_or_else(|| IngestError::storage(format!("no such object oss://{bucket}/{key}")))
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectHandle> {
        let object = self
            .fetch(bucket, key)
            .map_err(|e| IngestError::object_read(key, e))?;

        Ok(ObjectHandle {
            body: Box::pin(Cursor::new(object.data)),
            properties: object.properties,
        })
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        let object = self.fetch(src_bucket, src_key)?;
        let mut buckets = self.write()?;
        let target = buckets
            .get_mut(dst_bucket)
            .ok_or_else(|| IngestError::storage(format!("no such bucket {dst_bucket}")))?;
        target.insert(dst_key.to_string(), object);
        Ok(())
    }

    async fn download_to_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let object = self.fetch(bucket, key)?;
        tokio::fs::write(path, object.data).await?;
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        if let Some(objects) = self.write()?.get_mut(bucket) {
            objects.remove(key);
        }
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        Ok(self.read()?.contains_key(bucket))
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        self.write()?.entry(bucket.to_string()).or_default();
        Ok(())
    }
}
