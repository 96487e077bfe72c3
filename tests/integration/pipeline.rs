//! End-to-end tests from a queued message to an alert subscriber
//!
//! These tests verify that:
//! - A sample above its threshold reaches alert subscribers with a stable id
//! - Samples within bounds are consumed without alerts
//! - Malformed messages are skipped and still committed
//! - New machines get sequential stable ids

use std::time::Duration;

use chrono::{DateTime, Utc};
use metric_sentinel::{MachineType, realtime::AlertPayload};
use pretty_assertions::assert_eq;

use crate::helpers::{GROUP, eventually, host_message, spawn_test_hub, spawn_test_ingest};

#[tokio::test]
async fn test_violation_reaches_alert_subscriber() {
    let hub = spawn_test_hub(&[(MachineType::Host, "cpu", 90.0)]).await;
    let ingest = spawn_test_ingest(hub.addr, vec![]).await;
    let mut alerts = hub.state.alerts.subscribe();

    ingest
        .broker
        .publish(
            "host",
            Some("h-abc"),
            host_message("h-abc", "web-1", 95.0, "2026-01-01T00:00:00Z"),
        )
        .unwrap();

    let alert = tokio::time::timeout(Duration::from_secs(5), alerts.recv())
        .await
        .expect("no alert within 5s")
        .expect("alert channel closed");

    let timestamp: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().unwrap();
    assert_eq!(
        alert,
        AlertPayload {
            stable_id: "host001".to_string(),
            metric_name: "cpu".to_string(),
            value: 95.0,
            timestamp,
        }
    );

    let events = hub.state.recorder.recent(10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].stable_id, "host001");
    assert_eq!(events[0].display_name, "web-1");
    assert_eq!(events[0].threshold_at_violation, Some(90.0));
    assert!(
        ingest
            .liveness
            .last_seen(MachineType::Host, "h-abc")
            .is_some()
    );
}

#[tokio::test]
async fn test_samples_within_bounds_raise_nothing() {
    let hub = spawn_test_hub(&[(MachineType::Host, "cpu", 90.0)]).await;
    let ingest = spawn_test_ingest(hub.addr, vec![]).await;
    let mut alerts = hub.state.alerts.subscribe();

    for cpu in [10.0, 50.0, 90.0] {
        ingest
            .broker
            .publish(
                "host",
                Some("h-calm"),
                host_message("h-calm", "calm", cpu, "2026-01-01T00:00:00Z"),
            )
            .unwrap();
    }

    let broker = ingest.broker.clone();
    assert!(eventually(|| broker.lag("host", GROUP).unwrap() == 0).await);

    assert_eq!(alerts.try_recv(), None);
    assert_eq!(hub.storage.event_count(), 0);
    // the machine was still registered
    assert_eq!(hub.storage.machine_count(), 1);
}

#[tokio::test]
async fn test_malformed_messages_are_skipped_and_committed() {
    let hub = spawn_test_hub(&[]).await;
    let ingest = spawn_test_ingest(hub.addr, vec![]).await;

    ingest
        .broker
        .publish("host", None, b"{not json".to_vec())
        .unwrap();
    ingest
        .broker
        .publish("host", None, br#"{"type":"gpu","gpuId":"g-1"}"#.to_vec())
        .unwrap();
    ingest
        .broker
        .publish(
            "host",
            None,
            host_message("h-ok", "ok", 1.0, "2026-01-01T00:00:00Z"),
        )
        .unwrap();

    let broker = ingest.broker.clone();
    assert!(eventually(|| broker.lag("host", GROUP).unwrap() == 0).await);

    let stats = ingest.workers[0].stats().await.unwrap();
    assert_eq!(stats.malformed, 1);
    assert_eq!(stats.invalid, 1);
    assert_eq!(stats.processed, 1);
}

#[tokio::test]
async fn test_new_machines_get_sequential_stable_ids() {
    let hub = spawn_test_hub(&[(MachineType::Host, "cpu", 50.0)]).await;
    let ingest = spawn_test_ingest(hub.addr, vec![]).await;
    let mut alerts = hub.state.alerts.subscribe();

    for host in ["h-first", "h-second"] {
        ingest
            .broker
            .publish(
                "host",
                Some(host),
                host_message(host, host, 75.0, "2026-01-01T00:00:00Z"),
            )
            .unwrap();
        // wait for each so registration order is fixed
        let alert = tokio::time::timeout(Duration::from_secs(5), alerts.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.metric_name, "cpu");
    }

    let first = hub
        .state
        .resolver
        .resolve(MachineType::Host, "h-first", None)
        .await
        .unwrap();
    let second = hub
        .state
        .resolver
        .resolve(MachineType::Host, "h-second", None)
        .await
        .unwrap();

    assert_eq!(first, "host001");
    assert_eq!(second, "host002");
}
