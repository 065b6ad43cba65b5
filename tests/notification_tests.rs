//! Notification Integration Tests
//!
//! Release announcements posted to a chat webhook.

mod common;

use common::{assert_status, TestApp};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use update_butler_service::{DownloadLinks, WebhookSink};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn app_with_webhook(server: &MockServer) -> TestApp {
    let sink = WebhookSink::new(
        format!("{}/hooks/releases", server.uri()),
        Some("UpdateButler".to_string()),
        DownloadLinks::new("https://updates.example.com"),
        Duration::from_secs(5),
    )
    .unwrap();

    TestApp::builder().sink(Arc::new(sink)).spawn().await
}

#[tokio::test]
async fn test_publish_posts_embed_to_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/releases"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let app = app_with_webhook(&server).await;
    let response = app.publish("demo", "stable", "1.0.0", b"P1").await;
    assert_status(&response, StatusCode::CREATED);

    app.drain_notifications().await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["username"], "UpdateButler");
    let embed = &body["embeds"][0];
    assert_eq!(embed["title"], "demo/stable 1.0.0");
    assert_eq!(embed["description"], "Patch notes for 1.0.0");
    assert_eq!(
        embed["url"],
        "https://updates.example.com/v1/projects/demo/channels/stable/releases/1.0.0/download"
    );

    let stats = app.services.dispatcher.stats();
    assert_eq!(stats.delivered, 1);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_transient_webhook_failure_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let app = app_with_webhook(&server).await;
    app.publish("demo", "stable", "1.0.0", b"P1").await;
    app.drain_notifications().await;

    assert_eq!(server.received_requests().await.unwrap().len(), 2);
    assert_eq!(app.services.dispatcher.stats().delivered, 1);
}

#[tokio::test]
async fn test_webhook_outage_never_blocks_publishing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let app = app_with_webhook(&server).await;
    for version in ["1.0.0", "1.1.0"] {
        let response = app.publish("demo", "stable", version, version.as_bytes()).await;
        assert_status(&response, StatusCode::CREATED);
    }

    app.drain_notifications().await;

    let stats = app.services.dispatcher.stats();
    assert_eq!(stats.enqueued, 2);
    assert_eq!(stats.failed, 2);

    // The releases are in place regardless
    let response = app.check("demo", "stable", "1.0.0").await;
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["version"], "1.1.0");
}

#[tokio::test]
async fn test_rejected_webhook_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let app = app_with_webhook(&server).await;
    app.publish("demo", "stable", "1.0.0", b"P1").await;
    app.drain_notifications().await;

    assert_eq!(server.received_requests().await.unwrap().len(), 1);
    assert_eq!(app.services.dispatcher.stats().failed, 1);
}
