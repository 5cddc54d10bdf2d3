//! Health check integration tests for invoicing-api.

mod common;

use common::spawn_server;
use reqwest::Client;

#[tokio::test]
async fn health_check_works() {
    let address = spawn_server().await;
    let client = Client::new();

    let response = client
        .get(format!("{}/health", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "invoicing-api");
}

#[tokio::test]
async fn readiness_check_works() {
    let address = spawn_server().await;
    let client = Client::new();

    let response = client
        .get(format!("{}/ready", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
}

#[tokio::test]
async fn metrics_endpoint_works() {
    let address = spawn_server().await;
    let client = Client::new();

    // One request so the labelled counters have a sample.
    client
        .get(format!("{}/api/admin/invoicing?action=stats", address))
        .header("X-User-ID", "metrics-user")
        .send()
        .await
        .expect("Failed to execute request");

    let response = client
        .get(format!("{}/metrics", address))
        .send()
        .await
        .expect("Failed to execute request");

    assert!(response.status().is_success());
    assert!(response
        .headers()
        .get("content-type")
        .map(|v| v.to_str().unwrap_or("").contains("text/plain"))
        .unwrap_or(false));

    let body = response.text().await.expect("Failed to read body");
    assert!(body.contains("invoicing_requests_total"));
}
