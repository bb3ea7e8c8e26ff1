//! Client for the MNS (Message Notification Service) queue REST API

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use sha1::Sha1;
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::NotificationQueue;
use crate::config::{MnsSettings, MAX_WAIT_SECONDS};
use crate::error::{IngestError, Result};
use crate::notification::NotificationMessage;

type HmacSha1 = Hmac<Sha1>;

/// API version sent with every request
pub const MNS_VERSION: &str = "2015-06-06";

const CONTENT_TYPE: &str = "text/xml;charset=utf-8";

/// Error code MNS returns when the queue is empty
const MESSAGE_NOT_EXIST: &str = "MessageNotExist";

/// Slack added on top of the long-poll wait for the HTTP timeout
const REQUEST_TIMEOUT_SLACK_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct MessageXml {
    #[serde(rename = "MessageId")]
    message_id: String,
    #[serde(rename = "ReceiptHandle")]
    receipt_handle: String,
    #[serde(rename = "MessageBody", default)]
    message_body: String,
    #[serde(rename = "DequeueCount", default)]
    dequeue_count: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorXml {
    #[serde(rename = "Code")]
    code: String,
    #[serde(rename = "Message", default)]
    message: String,
}

#[derive(Clone)]
pub struct MnsClient {
    http: Client,
    endpoint: String,
    queue: String,
    access_key_id: String,
    access_key_secret: String,
}

impl MnsClient {
    pub fn new(
        settings: &MnsSettings,
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(MAX_WAIT_SECONDS + REQUEST_TIMEOUT_SLACK_SECS))
            .build()
            .map_err(|e| IngestError::config(format!("failed to build MNS HTTP client: {e}")))?;

        let endpoint = settings.endpoint.trim_end_matches('/');
        let endpoint = if endpoint.contains("://") {
            endpoint.to_string()
        } else {
            format!("https://{endpoint}")
        };

        info!(endpoint = %endpoint, queue = %settings.queue, "MNS client initialized");

        Ok(Self {
            http,
            endpoint,
            queue: settings.queue.clone(),
            access_key_id: access_key_id.into(),
            access_key_secret: access_key_secret.into(),
        })
    }

    fn messages_path(&self) -> String {
        format!("/queues/{}/messages", self.queue)
    }

    fn signature(&self, method: &Method, date: &str, resource: &str) -> Result<String> {
        let canonical = string_to_sign(method.as_str(), CONTENT_TYPE, date, resource);
        let mut mac = HmacSha1::new_from_slice(self.access_key_secret.as_bytes())
            .map_err(|e| IngestError::queue(format!("invalid access key secret: {e}")))?;
        mac.update(canonical.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Send a signed request for `resource` (path plus query string).
    async fn send(&self, method: Method, resource: &str) -> Result<(StatusCode, String)> {
        let date = chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let signature = self.signature(&method, &date, resource)?;

        let response = self
            .http
            .request(method, format!("{}{}", self.endpoint, resource))
            .header("Date", &date)
            .header("Content-Type", CONTENT_TYPE)
            .header("x-mns-version", MNS_VERSION)
            .header(
                "Authorization",
                format!("MNS {}:{}", self.access_key_id, signature),
            )
            .send()
            .await
            .map_err(|e| IngestError::queue(format!("request to {resource} failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| IngestError::queue(format!("failed to read MNS response: {e}")))?;

        Ok((status, body))
    }
}

/// Canonical string MNS signs: verb, content MD5 (unused), content type,
/// date, the `x-mns-*` headers, and the resource.
fn string_to_sign(method: &str, content_type: &str, date: &str, resource: &str) -> String {
    format!("{method}\n\n{content_type}\n{date}\nx-mns-version:{MNS_VERSION}\n{resource}")
}

fn parse_error(status: StatusCode, body: &str) -> ErrorXml {
    quick_xml::de::from_str(body).unwrap_or_else(|_| ErrorXml {
        code: status.to_string(),
        message: body.to_string(),
    })
}

#[async_trait]
impl NotificationQueue for MnsClient {
    #[instrument(skip(self), fields(queue = %self.queue))]
    async fn receive(&self, wait: Option<Duration>) -> Result<Option<NotificationMessage>> {
        let mut resource = self.messages_path();
        if let Some(wait) = wait {
            resource.push_str(&format!("?waitseconds={}", wait.as_secs()));
        }

        let (status, body) = self.send(Method::GET, &resource).await?;

        if status.is_success() {
            let message: MessageXml = quick_xml::de::from_str(&body)
                .map_err(|e| IngestError::queue(format!("malformed MNS message: {e}")))?;
            debug!(message_id = %message.message_id, "Received notification");
            return Ok(Some(NotificationMessage {
                message_id: message.message_id,
                receipt_handle: message.receipt_handle,
                body: message.message_body,
                dequeue_count: message.dequeue_count,
            }));
        }

        let error = parse_error(status, &body);
        if status == StatusCode::NOT_FOUND && error.code == MESSAGE_NOT_EXIST {
            debug!("No message available");
            return Ok(None);
        }

        Err(IngestError::queue(format!(
            "receive failed with {}: {} {}",
            status, error.code, error.message
        )))
    }

    #[instrument(skip(self, message), fields(queue = %self.queue, message_id = %message.message_id))]
    async fn acknowledge(&self, message: &NotificationMessage) -> Result<()> {
        let resource = format!(
            "{}?ReceiptHandle={}",
            self.messages_path(),
            urlencoding::encode(&message.receipt_handle)
        );

        let (status, body) = self.send(Method::DELETE, &resource).await?;

        if status.is_success() {
            debug!("Deleted notification");
            return Ok(());
        }

        let error = parse_error(status, &body);
        Err(IngestError::queue(format!(
            "delete failed with {}: {} {}",
            status, error.code, error.message
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn settings(endpoint: &str) -> MnsSettings {
        MnsSettings {
            endpoint: endpoint.to_string(),
            queue: "oss-events".to_string(),
            wait_seconds: Some(3),
            poll_interval_seconds: 10,
        }
    }

    #[test]
    fn test_string_to_sign() {
        let s = string_to_sign(
            "GET",
            CONTENT_TYPE,
            "Thu, 17 Mar 2012 18:49:58 GMT",
            "/queues/q/messages?waitseconds=3",
        );
        assert_eq!(
            s,
            "GET\n\ntext/xml;charset=utf-8\nThu, 17 Mar 2012 18:49:58 GMT\nx-mns-version:2015-06-06\n/queues/q/messages?waitseconds=3"
        );
    }

    #[test]
    fn test_signature_is_base64_sha1_digest() {
        let client = MnsClient::new(&settings("http://localhost"), "id", "secret").unwrap();
        let a = client.signature(&Method::GET, "date", "/r").unwrap();
        let b = client.signature(&Method::GET, "date", "/r").unwrap();
        let c = client.signature(&Method::DELETE, "date", "/r").unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(STANDARD.decode(&a).unwrap().len(), 20);
    }

    #[test]
    fn test_endpoint_normalization() {
        let client = MnsClient::new(&settings("123.mns.example.com/"), "id", "s").unwrap();
        assert_eq!(client.endpoint, "https://123.mns.example.com");
        assert_eq!(client.messages_path(), "/queues/oss-events/messages");
    }

    #[test]
    fn test_parse_error_fallback() {
        let error = parse_error(StatusCode::BAD_GATEWAY, "<html>oops</html>");
        assert_eq!(error.code, "502 Bad Gateway");
    }

    #[test]
    fn test_parse_message_xml() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <Message xmlns="http://mns.aliyuncs.com/doc/v1/">
              <MessageId>5F2904E1</MessageId>
              <ReceiptHandle>1-ODU4OTkzNDU5My0xNDMy</ReceiptHandle>
              <MessageBodyMD5>C5DD56A39F5F7BB8B3337C6D11B6D8C7</MessageBodyMD5>
              <MessageBody>eyJldmVudHMiOltdfQ==</MessageBody>
              <EnqueueTime>1250700979248</EnqueueTime>
              <NextVisibleTime>1250700799348</NextVisibleTime>
              <FirstDequeueTime>1250700779318</FirstDequeueTime>
              <DequeueCount>2</DequeueCount>
              <Priority>8</Priority>
            </Message>"#;
        let message: MessageXml = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(message.message_id, "5F2904E1");
        assert_eq!(message.receipt_handle, "1-ODU4OTkzNDU5My0xNDMy");
        assert_eq!(message.message_body, "eyJldmVudHMiOltdfQ==");
        assert_eq!(message.dequeue_count, 2);
    }
}
