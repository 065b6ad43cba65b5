//! Concurrency Integration Tests
//!
//! Racing publishers and readers against one server.

mod common;

use common::{parse_json, publish_body, TestApp, PUBLISH_TOKEN};
use futures::future::join_all;
use reqwest::StatusCode;
use serde_json::Value;
use update_butler_core::Checksum;

#[tokio::test]
async fn test_concurrent_publishes_of_same_version_have_one_winner() {
    let app = TestApp::new().await;
    let url = format!("{}/v1/projects/demo/channels/stable/releases", app.url());

    let requests = (0..8).map(|i| {
        let client = app.client().clone();
        let url = url.clone();
        let payload = format!("payload-{}", i).into_bytes();
        async move {
            let response = client
                .post(url)
                .bearer_auth(PUBLISH_TOKEN)
                .json(&publish_body("1.0.0", &payload))
                .send()
                .await
                .unwrap();
            (response.status(), payload)
        }
    });
    let results = join_all(requests).await;

    let winners: Vec<&Vec<u8>> = results
        .iter()
        .filter(|(status, _)| *status == StatusCode::CREATED)
        .map(|(_, payload)| payload)
        .collect();
    assert_eq!(winners.len(), 1);
    assert!(results
        .iter()
        .all(|(status, _)| *status == StatusCode::CREATED || *status == StatusCode::CONFLICT));

    let response = app.get("/v1/projects/demo/channels/stable/releases/1.0.0").await;
    let body: Value = parse_json(response).await;
    assert_eq!(body["data"]["checksum"], Checksum::compute(winners[0]).as_str());

    let download = app.download("demo", "stable", "1.0.0", None).await;
    assert_eq!(&download.bytes().await.unwrap()[..], &winners[0][..]);
}

#[tokio::test]
async fn test_concurrent_publishes_of_distinct_versions() {
    let app = TestApp::new().await;
    let url = format!("{}/v1/projects/demo/channels/beta/releases", app.url());

    let requests = (0..5).map(|i| {
        let client = app.client().clone();
        let url = url.clone();
        async move {
            client
                .post(url)
                .bearer_auth(PUBLISH_TOKEN)
                .json(&publish_body(&format!("1.{}.0", i), format!("B{}", i).as_bytes()))
                .send()
                .await
                .unwrap()
                .status()
        }
    });
    let statuses = join_all(requests).await;

    // Monotonic publishing means a slower, older version can lose the race
    assert!(statuses.contains(&StatusCode::CREATED));
    assert!(statuses
        .iter()
        .all(|s| *s == StatusCode::CREATED || *s == StatusCode::CONFLICT));

    let created = statuses.iter().filter(|s| **s == StatusCode::CREATED).count();
    let response = app.get("/v1/projects/demo/channels/beta/releases").await;
    let body: Value = parse_json(response).await;
    assert_eq!(body["pagination"]["total"], created as u64);

    let versions: Vec<String> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["version"].as_str().unwrap().to_string())
        .collect();
    let mut sorted = versions.clone();
    sorted.sort_by(|a, b| {
        let parse = |v: &str| -> u64 { v.split('.').nth(1).unwrap().parse().unwrap() };
        parse(b).cmp(&parse(a))
    });
    assert_eq!(versions, sorted);
}

#[tokio::test]
async fn test_checks_stay_consistent_during_publishes() {
    let app = TestApp::new().await;
    app.publish("demo", "stable", "1.0.0", b"base").await;

    let publisher = {
        let client = app.client().clone();
        let url = format!("{}/v1/projects/demo/channels/stable/releases", app.url());
        tokio::spawn(async move {
            for minor in 1..=5 {
                let version = format!("1.{}.0", minor);
                let response = client
                    .post(&url)
                    .bearer_auth(PUBLISH_TOKEN)
                    .json(&publish_body(&version, version.as_bytes()))
                    .send()
                    .await
                    .unwrap();
                assert_eq!(response.status(), StatusCode::CREATED);
            }
        })
    };

    let mut last_seen = 0u64;
    for _ in 0..20 {
        let response = app.check("demo", "stable", "0.1.0").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = parse_json(response).await;
        assert_eq!(body["data"]["available"], true);

        let version = body["data"]["version"].as_str().unwrap();
        let minor: u64 = version.split('.').nth(1).unwrap().parse().unwrap();
        assert!(minor >= last_seen, "latest went backwards: {}", version);
        last_seen = minor;
    }

    publisher.await.unwrap();

    let response = app.check("demo", "stable", "0.1.0").await;
    let body: Value = parse_json(response).await;
    assert_eq!(body["data"]["version"], "1.5.0");
}
