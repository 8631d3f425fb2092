use axum::body::Body;
use axum::http::{Request, StatusCode};
use evitsam_agent::{
    handler::{HandlerServices, MessageHandler, DOWNLOAD_FAILED, SEND_IMAGE_PROMPT},
    params::SegmentationParams,
    protocol::{AgentContent, ChatMessage, Envelope, ProtocolMessage, Resource},
    segment::MockSegmentationClient,
    server,
    storage::MockStorageClient,
    transport::{MockSender, SentMessage},
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

const PEER: &str = "agent1qpeer";
const PNG_BYTES: &[u8] = &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x42];

fn build_handler(
    storage: MockStorageClient,
    segmenter: MockSegmentationClient,
    sender: MockSender,
) -> Arc<MessageHandler> {
    Arc::new(MessageHandler::new(HandlerServices {
        storage: Box::new(storage),
        segmenter: Box::new(segmenter),
        sender: Box::new(sender),
    }))
}

fn submit_request(envelope: &Envelope) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/submit")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(envelope).unwrap()))
        .unwrap()
}

fn envelope_for(content: Vec<AgentContent>) -> Envelope {
    let message: ProtocolMessage = ChatMessage::new(content).into();
    Envelope::seal(PEER, "evitsam-segmentation-agent", Uuid::new_v4(), &message).unwrap()
}

fn image_resource(id: Uuid) -> AgentContent {
    AgentContent::Resource {
        resource_id: id,
        resource: Resource {
            uri: format!("agent-storage://test/{}", id),
            metadata: HashMap::new(),
        },
    }
}

/// Messages are handled on a spawned task; wait until `count` have been sent.
async fn wait_for_sent(sender: &MockSender, count: usize) -> Vec<SentMessage> {
    for _ in 0..100 {
        let sent = sender.get_sent();
        if sent.len() >= count {
            return sent;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    sender.get_sent()
}

#[tokio::test]
async fn test_submit_image_returns_segmented_resource() {
    let image_id = Uuid::new_v4();
    let storage =
        MockStorageClient::new().with_asset(&image_id.to_string(), "image/png", PNG_BYTES.to_vec());
    let segmenter = MockSegmentationClient::new().with_image_response(PNG_BYTES.to_vec());
    let sender = MockSender::new();
    let app = server::router(build_handler(
        storage.clone(),
        segmenter.clone(),
        sender.clone(),
    ));

    let response = app
        .oneshot(submit_request(&envelope_for(vec![image_resource(image_id)])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let sent = wait_for_sent(&sender, 3).await;
    assert_eq!(sent.len(), 3);
    assert!(sent[0].is_acknowledgement());
    assert!(sent[1].text().is_some());
    assert!(sent[2].is_resource());
    assert!(sent.iter().all(|s| s.target == PEER));

    assert_eq!(segmenter.get_calls(), vec![SegmentationParams::default()]);
    assert_eq!(storage.get_permissions().len(), 1);
    assert_eq!(storage.get_permissions()[0].1, PEER);
}

#[tokio::test]
async fn test_submit_text_only_asks_for_image() {
    let sender = MockSender::new();
    let app = server::router(build_handler(
        MockStorageClient::new(),
        MockSegmentationClient::new(),
        sender.clone(),
    ));

    let response = app
        .oneshot(submit_request(&envelope_for(vec![AgentContent::Text {
            text: "what is in this picture?".to_string(),
        }])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let sent = wait_for_sent(&sender, 2).await;
    assert_eq!(sender.get_ack_count(), 1);
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].text(), Some(SEND_IMAGE_PROMPT));
}

#[tokio::test]
async fn test_submit_failed_download_reports_once() {
    let missing = Uuid::new_v4();
    let sender = MockSender::new();
    let segmenter = MockSegmentationClient::new();
    let app = server::router(build_handler(
        MockStorageClient::new().with_failing_download(&missing.to_string()),
        segmenter.clone(),
        sender.clone(),
    ));

    app.oneshot(submit_request(&envelope_for(vec![image_resource(missing)])))
        .await
        .unwrap();

    let sent = wait_for_sent(&sender, 2).await;
    // Give a straggling reply a chance to show up before counting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sender.get_sent().len(), 2);
    assert_eq!(sender.get_ack_count(), 1);
    assert_eq!(sent[1].text(), Some(DOWNLOAD_FAILED));
    assert_eq!(segmenter.get_call_count(), 0);
}

#[tokio::test]
async fn test_submit_rejects_undecodable_envelope() {
    let sender = MockSender::new();
    let app = server::router(build_handler(
        MockStorageClient::new(),
        MockSegmentationClient::new(),
        sender.clone(),
    ));

    let mut envelope = envelope_for(vec![]);
    envelope.payload = "not base64 at all!".to_string();

    let response = app.oneshot(submit_request(&envelope)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(sender.get_sent().is_empty());
}

fn raw_submit_request(body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/submit")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_submit_rejects_envelope_missing_session() {
    let sender = MockSender::new();
    let app = server::router(build_handler(
        MockStorageClient::new(),
        MockSegmentationClient::new(),
        sender.clone(),
    ));

    let response = app
        .oneshot(raw_submit_request(
            r#"{"version":1,"sender":"a","target":"b","payload":"e30="}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(sender.get_sent().is_empty());
}

#[tokio::test]
async fn test_submit_rejects_non_json_body() {
    let app = server::router(build_handler(
        MockStorageClient::new(),
        MockSegmentationClient::new(),
        MockSender::new(),
    ));

    let response = app
        .oneshot(raw_submit_request("envelope please"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_submit_rejects_payload_that_is_not_a_protocol_message() {
    let app = server::router(build_handler(
        MockStorageClient::new(),
        MockSegmentationClient::new(),
        MockSender::new(),
    ));

    let session = Uuid::new_v4();
    let body = format!(
        r#"{{"version":1,"sender":"a","target":"b","session":"{}","payload":"e30="}}"#,
        session
    );
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/submit")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = server::router(build_handler(
        MockStorageClient::new(),
        MockSegmentationClient::new(),
        MockSender::new(),
    ));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
