//! Integration tests for the hub HTTP endpoints
//!
//! These tests verify that:
//! - Threshold updates are validated, persisted and visible in snapshots
//! - A failed threshold write leaves the registry untouched
//! - Concurrent writes to one metric leave the registry and the store agreeing
//! - Inventory lookups hand out stable ids
//! - Violations can be stored, listed and purged
//! - Alerts are streamed over server-sent events

use std::time::Duration;

use axum::http::StatusCode;
use metric_sentinel::MachineType;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};

use crate::helpers::{host_message, spawn_test_hub};

#[tokio::test]
async fn test_health_endpoint_reports_storage() {
    let hub = spawn_test_hub(&[(MachineType::Host, "cpu", 90.0)]).await;
    let client = reqwest::Client::new();

    let response = client.get(hub.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["thresholds"], 1);
    assert!(json["timestamp"].is_string());

    hub.storage.disable_writes(true);
    let response = client.get(hub.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_threshold_update_and_snapshot() {
    let hub = spawn_test_hub(&[]).await;
    let client = reqwest::Client::new();

    let response = client
        .put(hub.url("/metrics/threshold"))
        .json(&json!({"type": "host", "metricName": "cpu", "kind": "over", "value": 80.0, "unit": "%"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = client
        .put(hub.url("/metrics/threshold"))
        .json(&json!({"type": "host", "metricName": "cpu", "kind": "under", "value": 5.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let over: Value = client
        .get(hub.url("/metrics/threshold-check"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(over, json!({"host": {"cpu": 80.0}}));

    let under: Value = client
        .get(hub.url("/metrics/threshold-check?kind=under"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(under, json!({"host": {"cpu": 5.0}}));

    let definitions = hub.state.storage.load_definitions().await.unwrap();
    assert_eq!(definitions.len(), 1);
    assert_eq!(definitions[0].over_threshold, Some(80.0));
    assert_eq!(definitions[0].under_threshold, Some(5.0));
    assert_eq!(definitions[0].unit.as_deref(), Some("%"));
}

#[tokio::test]
async fn test_inverted_threshold_is_rejected() {
    let hub = spawn_test_hub(&[(MachineType::Host, "cpu", 80.0)]).await;
    let client = reqwest::Client::new();

    let response = client
        .put(hub.url("/metrics/threshold"))
        .json(&json!({"type": "host", "metricName": "cpu", "kind": "under", "value": 95.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json: Value = response.json().await.unwrap();
    assert!(json["error"].as_str().unwrap().contains("under threshold"));
    assert_eq!(hub.state.thresholds.bounds(MachineType::Host, "cpu").under, None);
}

#[tokio::test]
async fn test_failed_threshold_write_keeps_previous_value() {
    let hub = spawn_test_hub(&[(MachineType::Host, "cpu", 80.0)]).await;
    hub.storage.disable_writes(true);

    let response = reqwest::Client::new()
        .put(hub.url("/metrics/threshold"))
        .json(&json!({"type": "host", "metricName": "cpu", "kind": "over", "value": 60.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let bounds = hub.state.thresholds.bounds(MachineType::Host, "cpu");
    assert_eq!(bounds.over, Some(80.0));
}

#[tokio::test]
async fn test_concurrent_threshold_writes_match_store() {
    let hub = spawn_test_hub(&[]).await;
    let client = reqwest::Client::new();

    let requests = (0..20).map(|i| {
        let body = if i % 2 == 0 {
            json!({"type": "host", "metricName": "cpu", "kind": "over", "value": 60.0 + i as f64})
        } else {
            json!({"type": "host", "metricName": "cpu", "kind": "under", "value": i as f64})
        };
        client.put(hub.url("/metrics/threshold")).json(&body).send()
    });

    for response in futures::future::join_all(requests).await {
        assert_eq!(response.unwrap().status(), StatusCode::NO_CONTENT);
    }

    let bounds = hub.state.thresholds.bounds(MachineType::Host, "cpu");
    let definitions = hub.state.storage.load_definitions().await.unwrap();
    assert_eq!(definitions.len(), 1);
    assert_eq!(bounds.over, definitions[0].over_threshold);
    assert_eq!(bounds.under, definitions[0].under_threshold);
    assert!(bounds.over.is_some() && bounds.under.is_some());
}

#[tokio::test]
async fn test_failed_write_keeps_the_other_bound() {
    let hub = spawn_test_hub(&[(MachineType::Host, "cpu", 80.0)]).await;
    let client = reqwest::Client::new();

    let response = client
        .put(hub.url("/metrics/threshold"))
        .json(&json!({"type": "host", "metricName": "cpu", "kind": "under", "value": 5.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    hub.storage.disable_writes(true);
    let response = client
        .put(hub.url("/metrics/threshold"))
        .json(&json!({"type": "host", "metricName": "cpu", "kind": "over", "value": 60.0}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let bounds = hub.state.thresholds.bounds(MachineType::Host, "cpu");
    assert_eq!(bounds.over, Some(80.0));
    assert_eq!(bounds.under, Some(5.0));
}

#[tokio::test]
async fn test_inventory_lookup_assigns_stable_ids() {
    let hub = spawn_test_hub(&[]).await;
    let client = reqwest::Client::new();

    let first = client
        .get(hub.url("/inventory/raw-a/container?name=web"))
        .send()
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(first.text().await.unwrap(), "container001");

    let again = client
        .get(hub.url("/inventory/raw-a/container"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(again, "container001");

    let host = client
        .get(hub.url("/inventory/raw-a/host"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(host, "host001");

    let unknown = client
        .get(hub.url("/inventory/raw-a/gpu"))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_violation_store_list_and_purge() {
    let hub = spawn_test_hub(&[(MachineType::Host, "cpu", 90.0)]).await;
    let client = reqwest::Client::new();

    let response = client
        .post(hub.url("/violation-store"))
        .json(&json!({
            "type": "host",
            "machineId": "raw-host",
            "metricName": "cpu",
            "value": 97.5,
            "timestamp": "2026-01-01T00:00:00Z",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let event: Value = response.json().await.unwrap();
    assert_eq!(event["stableId"], "host001");
    assert_eq!(event["displayName"], "raw-host");
    assert_eq!(event["thresholdAtViolation"], 90.0);

    let listed: Vec<Value> = client
        .get(hub.url("/violations?limit=5"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["observedValue"], 97.5);

    let purged: Value = client
        .delete(hub.url("/violations?before=2026-01-02T00:00:00Z"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(purged["removed"], 1);
    assert_eq!(hub.storage.event_count(), 0);
}

#[tokio::test]
async fn test_evaluate_metrics_records_violations() {
    let hub = spawn_test_hub(&[(MachineType::Host, "cpu", 90.0)]).await;
    let client = reqwest::Client::new();

    let response = client
        .post(hub.url("/metrics"))
        .body(host_message("h-1", "box", 99.0, "2026-01-01T00:00:00Z"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["violations"], 1);
    assert_eq!(hub.storage.event_count(), 1);

    let malformed = client
        .post(hub.url("/metrics"))
        .body("definitely not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_alert_stream_delivers_events() {
    let hub = spawn_test_hub(&[(MachineType::Host, "cpu", 90.0)]).await;
    let client = reqwest::Client::new();

    let mut stream = client
        .get(hub.url("/metrics/threshold-alert"))
        .send()
        .await
        .unwrap();
    assert_eq!(stream.status(), StatusCode::OK);
    assert!(
        stream.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );

    // the subscription exists once the response head has been sent
    assert_eq!(hub.state.alerts.len(), 1);

    client
        .post(hub.url("/violation-store"))
        .json(&json!({
            "type": "host",
            "machineId": "raw-host",
            "metricName": "cpu",
            "value": 95.0,
            "timestamp": "2026-01-01T00:00:00Z",
        }))
        .send()
        .await
        .unwrap();

    let mut received = String::new();
    while !received.contains("\n\n") {
        let chunk = tokio::time::timeout(Duration::from_secs(5), stream.chunk())
            .await
            .expect("no event within 5s")
            .unwrap()
            .expect("stream ended");
        received.push_str(&String::from_utf8_lossy(&chunk));
    }

    assert!(received.contains("event: threshold-alert"));
    let data = received
        .lines()
        .find_map(|line| line.strip_prefix("data: "))
        .unwrap();
    let alert: Value = serde_json::from_str(data).unwrap();
    assert_eq!(
        alert,
        json!({
            "stableId": "host001",
            "metricName": "cpu",
            "value": 95.0,
            "timestamp": "2026-01-01T00:00:00Z",
        })
    );
}
