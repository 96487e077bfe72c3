//! Shared fixtures for the integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use metric_sentinel::{
    MachineType,
    actors::{
        fanout::FanoutHandle,
        intake::{IntakeHandle, IntakeSettings},
    },
    api::{ApiConfig, HubState, IngestState, spawn_hub_server, spawn_ingest_server},
    client::HubClient,
    identity::IdentityResolver,
    intake::{IntakePipeline, LocalEvaluation, RawMetricPublisher},
    liveness::LivenessMonitor,
    queue::MemoryBroker,
    realtime::SessionRegistry,
    storage::{StorageBackend, memory::MemoryBackend},
    thresholds::{BoundKind, ThresholdRegistry, ThresholdReplica},
};
use serde_json::json;

pub const GROUP: &str = "sentinel-test";

/// A hub bound to a random local port
pub struct TestHub {
    pub addr: SocketAddr,
    pub state: HubState,
    pub storage: Arc<MemoryBackend>,
}

impl TestHub {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl TestIngest {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws/metrics", self.addr)
    }
}

/// Start a hub on in-memory storage with the given over thresholds.
pub async fn spawn_test_hub(over: &[(MachineType, &str, f64)]) -> TestHub {
    let storage = Arc::new(MemoryBackend::new());
    let thresholds = Arc::new(ThresholdRegistry::new());
    for (machine_type, metric, value) in over {
        thresholds
            .update(*machine_type, metric, BoundKind::Over, *value)
            .unwrap();
    }

    let state = HubState::with_storage(storage.clone() as Arc<dyn StorageBackend>, thresholds);
    let config = ApiConfig::new("127.0.0.1:0".parse().unwrap(), vec![]);
    let addr = spawn_hub_server(config, state.clone()).await.unwrap();

    TestHub {
        addr,
        state,
        storage,
    }
}

/// An ingestion process wired to a hub, with one intake worker per topic
pub struct TestIngest {
    pub addr: SocketAddr,
    pub broker: Arc<MemoryBroker>,
    pub sessions: Arc<SessionRegistry>,
    pub liveness: Arc<LivenessMonitor>,
    pub raw_metrics: RawMetricPublisher,
    pub replica: Arc<ThresholdReplica>,
    pub workers: Vec<IntakeHandle>,
    pub fanout: FanoutHandle,
}

pub async fn spawn_test_ingest(hub_addr: SocketAddr, allowed_origins: Vec<String>) -> TestIngest {
    let hub = Arc::new(HubClient::new(&format!("http://{hub_addr}"), Duration::from_secs(5)).unwrap());
    let broker = Arc::new(MemoryBroker::with_topics(["host", "container"], 2).unwrap());
    let sessions = Arc::new(SessionRegistry::new());
    let liveness = Arc::new(LivenessMonitor::new());
    let raw_metrics = RawMetricPublisher::new(64);

    let thresholds = Arc::new(ThresholdRegistry::new());
    let replica = Arc::new(ThresholdReplica::new(thresholds.clone(), hub.clone()));
    replica.refresh().await;

    let pipeline = Arc::new(IntakePipeline::new(
        raw_metrics.clone(),
        Arc::new(IdentityResolver::new(hub.clone())),
        liveness.clone(),
        Arc::new(LocalEvaluation::new(thresholds, hub.clone())),
    ));

    let settings = IntakeSettings {
        batch_size: 10,
        poll_wait: Duration::from_millis(50),
    };
    let workers = ["host", "container"]
        .into_iter()
        .map(|topic| {
            IntakeHandle::spawn(
                Box::new(broker.subscribe(topic, GROUP).unwrap()),
                pipeline.clone(),
                settings,
            )
        })
        .collect();
    let fanout = FanoutHandle::spawn(
        sessions.clone(),
        raw_metrics.subscribe(),
        Duration::from_secs(30),
    );

    let state = IngestState {
        sessions: sessions.clone(),
        broker: broker.clone(),
        liveness: liveness.clone(),
        group_id: GROUP.to_string(),
        allowed_origins: Arc::new(allowed_origins.clone()),
    };
    let addr = spawn_ingest_server(
        ApiConfig::new("127.0.0.1:0".parse().unwrap(), allowed_origins),
        state,
    )
    .await
    .unwrap();

    TestIngest {
        addr,
        broker,
        sessions,
        liveness,
        raw_metrics,
        replica,
        workers,
        fanout,
    }
}

/// Host metric message as an agent would publish it
pub fn host_message(host_id: &str, host_name: &str, cpu: f64, timestamp: &str) -> Vec<u8> {
    json!({
        "type": "host",
        "hostId": host_id,
        "hostName": host_name,
        "timestamp": timestamp,
        "cpuUsagePercent": cpu,
        "memoryUsedBytes": 1_000_000u64,
        "memoryTotalBytes": 8_000_000u64,
    })
    .to_string()
    .into_bytes()
}

/// Poll `condition` until it holds or a few seconds pass.
pub async fn eventually<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
