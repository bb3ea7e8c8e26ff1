//! Ingestion configuration
//!
//! Loaded from a TOML file layered with `OSSI__*` environment variables
//! (double underscore separates nesting, e.g. `OSSI__MNS_SETTINGS__QUEUE`).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::codec::CodecKind;
use crate::error::{IngestError, Result};

// ============================================================================
// Configuration Constants
// ============================================================================

/// Default sleep between polls when the queue returned nothing.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;

/// Default HTTP connection cap for the storage client.
pub const DEFAULT_MAX_CONNECTIONS: i64 = 1024;

/// Upper bound MNS accepts for long-polling receives.
pub const MAX_WAIT_SECONDS: u64 = 30;

/// Default region used to sign storage requests.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default delivery cap for the `retry_failed` acknowledgment policy.
pub const DEFAULT_MAX_DELIVERIES: u32 = 3;

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "OSSI";

/// Main ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Source bucket holding the objects announced by notifications
    pub bucket: String,
    /// Storage endpoint (host or URL)
    pub endpoint: String,
    pub access_key_id: String,
    pub access_key_secret: String,

    /// Literal key prefix an object must start with to be processed
    #[serde(default)]
    pub prefix: Option<String>,
    /// Regular expression; matching keys are skipped
    #[serde(default)]
    pub exclude_pattern: Option<String>,

    /// Bucket to copy processed objects into
    #[serde(default)]
    pub backup_to_bucket: Option<String>,
    /// Prefix prepended to the key of backup copies
    #[serde(default)]
    pub backup_add_prefix: Option<String>,
    /// Local directory mirroring processed objects
    #[serde(default)]
    pub backup_to_dir: Option<PathBuf>,
    /// Delete source objects after processing
    #[serde(default)]
    pub delete: bool,

    /// Copy raw object properties into every record's provenance
    #[serde(default)]
    pub include_object_properties: bool,

    pub mns_settings: MnsSettings,
    #[serde(default)]
    pub additional_oss_settings: OssSettings,

    #[serde(default)]
    pub codec: CodecKind,
    #[serde(default)]
    pub ack_policy: AckPolicy,
}

/// Notification queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MnsSettings {
    pub endpoint: String,
    pub queue: String,
    /// Long-poll wait for a receive; backend default when unset
    #[serde(default)]
    pub wait_seconds: Option<u64>,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
}

/// Storage client tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OssSettings {
    /// Force https (true) or http (false) when the endpoint has no scheme
    #[serde(default)]
    pub secure_connection_enabled: Option<bool>,
    /// Upper bound on concurrent storage requests, open object streams
    /// included
    #[serde(default = "default_max_connections", alias = "max_connections_to_oss")]
    pub max_connections: i64,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub path_style: bool,
}

/// What to do with a notification whose objects did not all succeed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Always acknowledge after processing
    #[default]
    Always,
    /// Leave failed notifications for redelivery until `max_deliveries`
    RetryFailed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckPolicy {
    #[serde(default)]
    pub mode: AckMode,
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_max_connections() -> i64 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_max_deliveries() -> u32 {
    DEFAULT_MAX_DELIVERIES
}

impl Default for OssSettings {
    fn default() -> Self {
        Self {
            secure_connection_enabled: None,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            region: default_region(),
            path_style: false,
        }
    }
}

impl Default for AckPolicy {
    fn default() -> Self {
        Self {
            mode: AckMode::Always,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
        }
    }
}

impl MnsSettings {
    pub fn wait(&self) -> Option<Duration> {
        self.wait_seconds.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }
}

impl AckPolicy {
    /// Whether a notification should be acknowledged given its failure
    /// count and how many times it has been delivered.
    pub fn should_acknowledge(&self, failed_objects: usize, dequeue_count: u32) -> bool {
        match self.mode {
            AckMode::Always => true,
            AckMode::RetryFailed => failed_objects == 0 || dequeue_count >= self.max_deliveries,
        }
    }
}

impl IngestConfig {
    /// Load configuration from a file plus environment overrides, then
    /// validate it.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        let config: IngestConfig = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Parse configuration from a TOML string, then validate it.
    pub fn from_toml(source: &str) -> Result<Self> {
        let config: IngestConfig = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(IngestError::config("bucket cannot be empty"));
        }

        if self.endpoint.is_empty() {
            return Err(IngestError::config("endpoint cannot be empty"));
        }

        if let Some(ref backup) = self.backup_to_bucket {
            if backup == &self.bucket {
                return Err(IngestError::config(
                    "backup bucket and source bucket should be different",
                ));
            }
        }

        if self.additional_oss_settings.max_connections <= 0 {
            return Err(IngestError::config(format!(
                "max_connections must be positive, got {}",
                self.additional_oss_settings.max_connections
            )));
        }

        if self.mns_settings.endpoint.is_empty() || self.mns_settings.queue.is_empty() {
            return Err(IngestError::config(
                "mns_settings.endpoint and mns_settings.queue are required",
            ));
        }

        if let Some(wait) = self.mns_settings.wait_seconds {
            if wait > MAX_WAIT_SECONDS {
                return Err(IngestError::config(format!(
                    "mns_settings.wait_seconds must be at most {MAX_WAIT_SECONDS}, got {wait}"
                )));
            }
        }

        self.exclude_regex()?;

        if self.delete && self.backup_to_bucket.is_none() && self.backup_to_dir.is_none() {
            tracing::warn!("delete is enabled without any backup target - processed objects will be lost");
        }

        Ok(())
    }

    /// Compiled `exclude_pattern`, if any.
    pub fn exclude_regex(&self) -> Result<Option<Regex>> {
        match self.exclude_pattern.as_deref() {
            Some(pattern) => Ok(Some(Regex::new(pattern)?)),
            None => Ok(None),
        }
    }

    /// Storage endpoint with a scheme, honoring `secure_connection_enabled`.
    pub fn endpoint_url(&self) -> String {
        let secure = self.additional_oss_settings.secure_connection_enabled;
        match (self.endpoint.split_once("://"), secure) {
            (Some((_, host)), Some(secure)) => format!("{}://{}", scheme(secure), host),
            (Some(_), None) => self.endpoint.clone(),
            (None, secure) => format!("{}://{}", scheme(secure.unwrap_or(true)), self.endpoint),
        }
    }
}

fn scheme(secure: bool) -> &'static str {
    if secure {
        "https"
    } else {
        "http"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serial_test::serial;

    const MINIMAL: &str = r#"
        bucket = "logs"
        endpoint = "oss-cn-hangzhou.aliyuncs.com"
        access_key_id = "id"
        access_key_secret = "secret"

        [mns_settings]
        endpoint = "https://123.mns.cn-hangzhou.aliyuncs.com"
        queue = "oss-events"
    "#;

    #[test]
    fn test_defaults() {
        let config = IngestConfig::from_toml(MINIMAL).unwrap();

        assert!(!config.delete);
        assert!(!config.include_object_properties);
        assert_eq!(config.mns_settings.poll_interval_seconds, 10);
        assert_eq!(config.mns_settings.wait_seconds, None);
        assert_eq!(config.additional_oss_settings.max_connections, 1024);
        assert_eq!(config.codec, CodecKind::Plain);
        assert_eq!(config.ack_policy.mode, AckMode::Always);
    }

    #[test]
    fn test_backup_bucket_must_differ() {
        let source = format!("backup_to_bucket = \"logs\"\n{MINIMAL}");
        let err = IngestConfig::from_toml(&source).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
        assert!(err.to_string().contains("should be different"));
    }

    #[test]
    fn test_max_connections_must_be_positive() {
        let source = format!("{MINIMAL}\n[additional_oss_settings]\nmax_connections = 0\n");
        let err = IngestConfig::from_toml(&source).unwrap_err();
        assert!(err.to_string().contains("max_connections"));
    }

    #[test]
    fn test_invalid_exclude_pattern() {
        let source = format!("exclude_pattern = \"(unclosed\"\n{MINIMAL}");
        assert!(matches!(
            IngestConfig::from_toml(&source),
            Err(IngestError::Config(_))
        ));
    }

    #[test]
    fn test_missing_mns_settings() {
        let source = r#"
            bucket = "logs"
            endpoint = "oss.example.com"
            access_key_id = "id"
            access_key_secret = "secret"
        "#;
        assert!(IngestConfig::from_toml(source).is_err());
    }

    #[test]
    fn test_wait_seconds_ceiling() {
        let source = MINIMAL.replace("queue = \"oss-events\"", "queue = \"oss-events\"\nwait_seconds = 31");
        assert!(IngestConfig::from_toml(&source).is_err());
    }

    #[test]
    fn test_endpoint_url_scheme() {
        let mut config = IngestConfig::from_toml(MINIMAL).unwrap();
        assert_eq!(config.endpoint_url(), "https://oss-cn-hangzhou.aliyuncs.com");

        config.additional_oss_settings.secure_connection_enabled = Some(false);
        assert_eq!(config.endpoint_url(), "http://oss-cn-hangzhou.aliyuncs.com");

        config.endpoint = "https://minio.local:9000".to_string();
        assert_eq!(config.endpoint_url(), "http://minio.local:9000");

        config.additional_oss_settings.secure_connection_enabled = None;
        assert_eq!(config.endpoint_url(), "https://minio.local:9000");
    }

    #[test]
    fn test_ack_policy() {
        let always = AckPolicy::default();
        assert!(always.should_acknowledge(5, 1));

        let retry = AckPolicy {
            mode: AckMode::RetryFailed,
            max_deliveries: 3,
        };
        assert!(retry.should_acknowledge(0, 1));
        assert!(!retry.should_acknowledge(1, 1));
        assert!(!retry.should_acknowledge(1, 2));
        assert!(retry.should_acknowledge(1, 3));
    }

    #[test]
    #[serial]
    fn test_load_file_with_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ossi.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        std::env::set_var("OSSI__DELETE", "true");
        std::env::set_var("OSSI__MNS_SETTINGS__QUEUE", "override-queue");
        let config = IngestConfig::load(&path);
        std::env::remove_var("OSSI__DELETE");
        std::env::remove_var("OSSI__MNS_SETTINGS__QUEUE");

        let config = config.unwrap();
        assert!(config.delete);
        assert_eq!(config.mns_settings.queue, "override-queue");
        assert_eq!(config.bucket, "logs");
    }

    #[test]
    #[serial]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            IngestConfig::load(dir.path().join("absent.toml")),
            Err(IngestError::Config(_))
        ));
    }

    #[test]
    fn test_legacy_max_connections_key() {
        let source = format!("{MINIMAL}\n[additional_oss_settings]\nmax_connections_to_oss = 0\n");
        let err = IngestConfig::from_toml(&source).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
        assert!(err.to_string().contains("max_connections"));

        let source = format!("{MINIMAL}\n[additional_oss_settings]\nmax_connections_to_oss = 16\n");
        let config = IngestConfig::from_toml(&source).unwrap();
        assert_eq!(config.additional_oss_settings.max_connections, 16);
    }

    #[test]
    fn test_unknown_nested_settings_are_rejected() {
        let source = format!("{MINIMAL}\n[additional_oss_settings]\nmax_conections = 8\n");
        assert!(matches!(
            IngestConfig::from_toml(&source),
            Err(IngestError::Config(_))
        ));

        let source = MINIMAL.replace("queue = \"oss-events\"", "queue = \"oss-events\"\nwait_second = 5");
        assert!(IngestConfig::from_toml(&source).is_err());
    }
}
