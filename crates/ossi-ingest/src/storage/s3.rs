//! S3-compatible client for the OSS endpoint

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{AppName, Credentials, Region},
    error::DisplayErrorContext,
    primitives::DateTimeFormat,
    Client,
};
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWriteExt, ReadBuf};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument};

use super::{ObjectBody, ObjectHandle, ObjectProperties, ObjectStore};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};

const APP_NAME: &str = "ossi-ingest";

/// Prefix under which user-defined object metadata is exposed.
pub const USER_METADATA_PREFIX: &str = "x-oss-meta-";

/// S3-compatible storage client.
///
/// At most `max_connections` requests are in flight at once; an open object
/// stream counts until its body is dropped.
#[derive(Clone)]
pub struct OssStorage {
    client: Client,
    connections: Arc<Semaphore>,
}

impl OssStorage {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let settings = &config.additional_oss_settings;
        let endpoint = config.endpoint_url();

        let credentials = Credentials::new(
            &config.access_key_id,
            &config.access_key_secret,
            None,
            None,
            APP_NAME,
        );

        let app_name = AppName::new(APP_NAME)
            .map_err(|e| IngestError::config(format!("invalid app name: {e}")))?;

        let s3_config = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(settings.region.clone()))
            .endpoint_url(&endpoint)
            .force_path_style(settings.path_style)
            .app_name(app_name)
            .build();

        info!(
            endpoint = %endpoint,
            region = %settings.region,
            max_connections = settings.max_connections,
            "Storage client initialized"
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            connections: Arc::new(Semaphore::new(connection_limit(settings.max_connections))),
        })
    }

    async fn connection(&self) -> Result<OwnedSemaphorePermit> {
        self.connections
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| IngestError::storage("storage client is shut down"))
    }

    /// Free connection slots
    pub fn available_connections(&self) -> usize {
        self.connections.available_permits()
    }
}

fn connection_limit(max_connections: i64) -> usize {
    usize::try_from(max_connections)
        .unwrap_or(1)
        .clamp(1, Semaphore::MAX_PERMITS)
}

/// Object body that holds a connection slot until dropped
struct PermitBody {
    inner: ObjectBody,
    _permit: OwnedSemaphorePermit,
}

impl AsyncRead for PermitBody {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.inner.as_mut().poll_read(cx, buf)
    }
}

fn storage_error<E>(action: &str, bucket: &str, key: &str, err: E) -> IngestError
where
    E: std::error::Error,
{
    IngestError::storage(format!(
        "{action} oss://{bucket}/{key}: {}",
        DisplayErrorContext(err)
    ))
}

#[async_trait]
impl ObjectStore for OssStorage {
    #[instrument(skip(self))]
    async fn get_object(&self, bucket: &str, key: &str) -> Result<ObjectHandle> {
        debug!("Opening oss://{}/{}", bucket, key);

        let permit = self.connection().await?;
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| IngestError::object_read(key, DisplayErrorContext(e)))?;

        let mut properties = ObjectProperties::new();
        if let Some(modified) = response
            .last_modified()
            .and_then(|dt| dt.fmt(DateTimeFormat::HttpDate).ok())
        {
            properties.insert("Last-Modified".to_string(), modified);
        }
        if let Some(content_type) = response.content_type() {
            properties.insert("Content-Type".to_string(), content_type.to_string());
        }
        if let Some(length) = response.content_length() {
            properties.insert("Content-Length".to_string(), length.to_string());
        }
        if let Some(etag) = response.e_tag() {
            properties.insert("ETag".to_string(), etag.to_string());
        }
        if let Some(user) = response.metadata() {
            for (name, value) in user {
                properties.insert(format!("{USER_METADATA_PREFIX}{name}"), value.clone());
            }
        }

        Ok(ObjectHandle {
            body: Box::pin(PermitBody {
                inner: Box::pin(response.body.into_async_read()),
                _permit: permit,
            }),
            properties,
        })
    }

    #[instrument(skip(self))]
    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<()> {
        let copy_source = format!("{}/{}", src_bucket, urlencoding::encode(src_key));

        let _permit = self.connection().await?;
        self.client
            .copy_object()
            .copy_source(&copy_source)
            .bucket(dst_bucket)
            .key(dst_key)
            .send()
            .await
            .map_err(|e| storage_error("copy", src_bucket, src_key, e))?;

        info!(
            "Copied oss://{}/{} to oss://{}/{}",
            src_bucket, src_key, dst_bucket, dst_key
        );

        Ok(())
    }

    #[instrument(skip(self))]
    async fn download_to_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        let _permit = self.connection().await?;
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error("download", bucket, key, e))?;

        let mut body = response.body.into_async_read();
        let mut file = tokio::fs::File::create(path).await?;
        let bytes = tokio::io::copy(&mut body, &mut file).await?;
        file.flush().await?;

        debug!("Downloaded {} bytes to {}", bytes, path.display());

        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let _permit = self.connection().await?;
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error("delete", bucket, key, e))?;

        info!("Deleted oss://{}/{}", bucket, key);

        Ok(())
    }

    #[instrument(skip(self))]
    async fn bucket_exists(&self, bucket: &str) -> Result<bool> {
        let _permit = self.connection().await?;
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e.as_service_error().is_some_and(|s| s.is_not_found())
                    || e.raw_response().map(|r| r.status().as_u16()) == Some(404);
                if not_found {
                    Ok(false)
                } else {
                    Err(storage_error("head bucket", bucket, "", e))
                }
            },
        }
    }

    #[instrument(skip(self))]
    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let _permit = self.connection().await?;
        self.client
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .map_err(|e| storage_error("create bucket", bucket, "", e))?;

        info!("Created bucket {}", bucket);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_limit() {
        assert_eq!(connection_limit(1024), 1024);
        assert_eq!(connection_limit(1), 1);
        assert_eq!(connection_limit(0), 1);
        assert_eq!(connection_limit(i64::MAX), Semaphore::MAX_PERMITS);
    }
}
