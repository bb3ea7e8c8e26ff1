//! Tests for the MNS queue client against a mock HTTP server
#![allow(clippy::unwrap_used, clippy::expect_used)]

use ossi_ingest::{
    config::MnsSettings,
    error::IngestError,
    notification::NotificationMessage,
    queue::{MnsClient, NotificationQueue},
};
use std::time::Duration;
use wiremock::{
    matchers::{header, header_exists, method, path, query_param},
    Mock, MockServer, ResponseTemplate,
};

const MESSAGES_PATH: &str = "/queues/oss-events/messages";

fn client(server: &MockServer) -> MnsClient {
    let settings = MnsSettings {
        endpoint: server.uri(),
        queue: "oss-events".to_string(),
        wait_seconds: Some(3),
        poll_interval_seconds: 10,
    };
    MnsClient::new(&settings, "test-id", "test-secret").unwrap()
}

fn message_xml() -> &'static str {
    r#"<?xml version="1.0" encoding="UTF-8"?>
<Message xmlns="http://mns.aliyuncs.com/doc/v1/">
  <MessageId>5F290C926D472878-2-14D9529A8FA-200000001</MessageId>
  <ReceiptHandle>1-ODU4OTkzNDU5My0xNDMyNzI3ODI3LTItOA==</ReceiptHandle>
  <MessageBodyMD5>C5DD56A39F5F7BB8B3337C6D11B6D8C7</MessageBodyMD5>
  <MessageBody>eyJldmVudHMiOltdfQ==</MessageBody>
  <EnqueueTime>1250700979248</EnqueueTime>
  <NextVisibleTime>1250700799348</NextVisibleTime>
  <FirstDequeueTime>1250700779318</FirstDequeueTime>
  <DequeueCount>1</DequeueCount>
  <Priority>8</Priority>
</Message>"#
}

fn error_xml(code: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Error xmlns="http://mns.aliyuncs.com/doc/v1/">
  <Code>{code}</Code>
  <Message>Message not exist.</Message>
  <RequestId>5F290C926D472878</RequestId>
  <HostId>http://mns.example.com</HostId>
</Error>"#
    )
}

#[tokio::test]
async fn test_receive_message() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(MESSAGES_PATH))
        .and(query_param("waitseconds", "3"))
        .and(header("x-mns-version", "2015-06-06"))
        .and(header_exists("authorization"))
        .and(header_exists("date"))
        .respond_with(ResponseTemplate::new(200).set_body_string(message_xml()))
        .expect(1)
        .mount(&server)
        .await;

    let message = client(&server)
        .receive(Some(Duration::from_secs(3)))
        .await
        .unwrap()
        .expect("a message");

    assert_eq!(message.message_id, "5F290C926D472878-2-14D9529A8FA-200000001");
    assert_eq!(message.receipt_handle, "1-ODU4OTkzNDU5My0xNDMyNzI3ODI3LTItOA==");
    assert_eq!(message.body, "eyJldmVudHMiOltdfQ==");
    assert_eq!(message.dequeue_count, 1);
}

#[tokio::test]
async fn test_authorization_header_format() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(MESSAGES_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(message_xml()))
        .mount(&server)
        .await;

    client(&server).receive(None).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].url.query().is_none());

    let auth = requests[0]
        .headers
        .get("authorization")
        .unwrap()
        .to_str()
        .unwrap();
    assert!(auth.starts_with("MNS test-id:"));
}

#[tokio::test]
async fn test_receive_empty_queue() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(MESSAGES_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_string(error_xml("MessageNotExist")))
        .mount(&server)
        .await;

    let message = client(&server)
        .receive(Some(Duration::from_secs(3)))
        .await
        .unwrap();
    assert!(message.is_none());
}

#[tokio::test]
async fn test_receive_missing_queue_is_an_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(MESSAGES_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_string(error_xml("QueueNotExist")))
        .mount(&server)
        .await;

    let result = client(&server).receive(None).await;
    match result {
        Err(IngestError::Queue(message)) => assert!(message.contains("QueueNotExist")),
        other => panic!("expected queue error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_receive_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(MESSAGES_PATH))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let result = client(&server).receive(None).await;
    assert!(matches!(result, Err(IngestError::Queue(_))));
}

#[tokio::test]
async fn test_acknowledge_deletes_by_receipt_handle() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path(MESSAGES_PATH))
        .and(query_param("ReceiptHandle", "1-ODU4OTkzNDU5My0xNDMy+/=="))
        .and(header_exists("authorization"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let message = NotificationMessage {
        message_id: "m-1".to_string(),
        receipt_handle: "1-ODU4OTkzNDU5My0xNDMy+/==".to_string(),
        body: String::new(),
        dequeue_count: 1,
    };

    client(&server).acknowledge(&message).await.unwrap();
}

#[tokio::test]
async fn test_acknowledge_expired_handle() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path(MESSAGES_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_string(error_xml("ReceiptHandleError")))
        .mount(&server)
        .await;

    let message = NotificationMessage {
        message_id: "m-1".to_string(),
        receipt_handle: "stale".to_string(),
        body: String::new(),
        dequeue_count: 3,
    };

    let err = client(&server).acknowledge(&message).await.unwrap_err();
    assert!(err.to_string().contains("ReceiptHandleError"));
}
