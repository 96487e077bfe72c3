//! Integration tests for SQLite persistence
//!
//! These tests verify that:
//! - Stable ids survive a restart and keep counting from the highest sequence
//! - Threshold definitions reload into a fresh registry
//! - The violation log is kept across restarts

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use metric_sentinel::{
    MachineType,
    identity::{IdentityResolver, StoreDirectory},
    storage::{StorageBackend, sqlite::SqliteBackend},
    thresholds::{BoundKind, ThresholdRegistry},
    violations::{ViolationRecorder, ViolationReport},
    realtime::AlertSubscribers,
};
use pretty_assertions::assert_eq;
use tempfile::tempdir;

fn resolver(storage: &Arc<dyn StorageBackend>) -> Arc<IdentityResolver> {
    Arc::new(IdentityResolver::new(Arc::new(StoreDirectory::new(
        storage.clone(),
    ))))
}

#[tokio::test]
async fn test_stable_ids_survive_restart() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("sentinel.db");

    {
        let storage: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        let resolver = resolver(&storage);

        assert_eq!(
            resolver
                .resolve(MachineType::Host, "raw-1", Some("alpha"))
                .await
                .unwrap(),
            "host001"
        );
        assert_eq!(
            resolver
                .resolve(MachineType::Host, "raw-2", Some("beta"))
                .await
                .unwrap(),
            "host002"
        );
        storage.close().await.unwrap();
    }

    let storage: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
    let resolver = resolver(&storage);

    assert_eq!(
        resolver
            .resolve(MachineType::Host, "raw-1", None)
            .await
            .unwrap(),
        "host001"
    );
    assert_eq!(
        resolver
            .resolve(MachineType::Host, "raw-3", None)
            .await
            .unwrap(),
        "host003"
    );
    assert_eq!(
        resolver
            .resolve(MachineType::Container, "raw-1", None)
            .await
            .unwrap(),
        "container001"
    );

    let machine = storage
        .find_machine(MachineType::Host, "raw-2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(machine.display_name, "beta");
}

#[tokio::test]
async fn test_definitions_and_violations_persist() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("sentinel.db");

    {
        let storage: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&db_path).await.unwrap());
        storage
            .save_bound(MachineType::Container, "memory", BoundKind::Over, 512.0, Some("MB"))
            .await
            .unwrap();
        storage
            .save_bound(MachineType::Container, "memory", BoundKind::Under, 1.0, None)
            .await
            .unwrap();

        let thresholds = Arc::new(ThresholdRegistry::new());
        let recorder = ViolationRecorder::new(
            resolver(&storage),
            storage.clone(),
            Arc::new(AlertSubscribers::new()),
            thresholds,
        );
        recorder
            .record_violation(&ViolationReport {
                machine_type: MachineType::Container,
                machine_id: "c-9".to_string(),
                metric_name: "memory".to_string(),
                value: 700.0,
                timestamp: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
                threshold: Some(512.0),
                display_name: Some("cache".to_string()),
            })
            .await
            .unwrap();
        storage.close().await.unwrap();
    }

    let storage: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::new(&db_path).await.unwrap());

    let thresholds = ThresholdRegistry::new();
    thresholds.load(storage.load_definitions().await.unwrap());
    let bounds = thresholds.bounds(MachineType::Container, "memory");
    assert_eq!(bounds.over, Some(512.0));
    assert_eq!(bounds.under, Some(1.0));

    let events = storage.recent_events(10).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].stable_id, "container001");
    assert_eq!(events[0].display_name, "cache");
    assert_eq!(events[0].observed_value, 700.0);
}
