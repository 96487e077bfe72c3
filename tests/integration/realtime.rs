//! Integration tests for the ingestion process's realtime surfaces
//!
//! These tests verify that:
//! - Raw metric messages are fanned out to WebSocket sessions verbatim
//! - Sessions are deregistered when the client disconnects
//! - Disallowed origins are refused before the upgrade
//! - Messages can be published over HTTP and show up in health lag

use std::time::Duration;

use axum::http::StatusCode;
use futures::{SinkExt, StreamExt};
use pretty_assertions::assert_eq;
use serde_json::Value;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message, client::IntoClientRequest},
};

use crate::helpers::{eventually, host_message, spawn_test_hub, spawn_test_ingest};

#[tokio::test]
async fn test_raw_metrics_fan_out_to_websocket_sessions() {
    let hub = spawn_test_hub(&[]).await;
    let ingest = spawn_test_ingest(hub.addr, vec![]).await;

    let (mut first, _) = connect_async(ingest.ws_url()).await.unwrap();
    let (mut second, _) = connect_async(ingest.ws_url()).await.unwrap();

    let sessions = ingest.sessions.clone();
    assert!(eventually(|| sessions.len() == 2).await);

    let body = host_message("h-live", "live", 12.5, "2026-01-01T00:00:00Z");
    ingest.broker.publish("host", None, body.clone()).unwrap();

    let expected = String::from_utf8(body).unwrap();
    for client in [&mut first, &mut second] {
        let message = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("no message within 5s")
            .unwrap()
            .unwrap();
        assert_eq!(message, Message::Text(expected.clone()));
    }
}

#[tokio::test]
async fn test_closed_session_is_deregistered() {
    let hub = spawn_test_hub(&[]).await;
    let ingest = spawn_test_ingest(hub.addr, vec![]).await;

    let (mut client, _) = connect_async(ingest.ws_url()).await.unwrap();
    let sessions = ingest.sessions.clone();
    assert!(eventually(|| sessions.len() == 1).await);

    client.close(None).await.unwrap();

    assert!(eventually(|| sessions.is_empty()).await);
}

#[tokio::test]
async fn test_disallowed_origin_is_refused() {
    let hub = spawn_test_hub(&[]).await;
    let ingest = spawn_test_ingest(hub.addr, vec!["http://dashboard.local".to_string()]).await;

    let mut request = ingest.ws_url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "http://elsewhere.example".parse().unwrap());

    match connect_async(request).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::FORBIDDEN),
        Err(e) => panic!("unexpected error: {e}"),
        Ok(_) => panic!("connection from a disallowed origin was accepted"),
    }
    assert!(ingest.sessions.is_empty());

    let mut request = ingest.ws_url().into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", "http://dashboard.local".parse().unwrap());
    assert!(connect_async(request).await.is_ok());
}

#[tokio::test]
async fn test_publish_endpoint_and_health() {
    let hub = spawn_test_hub(&[]).await;
    let ingest = spawn_test_ingest(hub.addr, vec![]).await;
    let client = reqwest::Client::new();

    let response = client
        .post(ingest.url("/queue/container?key=c-1"))
        .body(r#"{"type":"container","containerId":"c-1","cpuUsagePercent":3.0}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let published: Value = response.json().await.unwrap();
    assert_eq!(published["offset"], 0);

    let unknown = client
        .post(ingest.url("/queue/gpu"))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

    let liveness = ingest.liveness.clone();
    assert!(eventually(|| liveness.tracked() == 1).await);

    let health: Value = client
        .get(ingest.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["tracked_machines"], 1);
    assert!(health["lag"].is_array());
}
