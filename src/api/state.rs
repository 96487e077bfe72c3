//! Shared state handed to the HTTP handlers

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::MachineType;
use crate::identity::{IdentityResolver, StoreDirectory};
use crate::liveness::LivenessMonitor;
use crate::queue::MemoryBroker;
use crate::realtime::{AlertSubscribers, SessionRegistry};
use crate::storage::StorageBackend;
use crate::thresholds::ThresholdRegistry;
use crate::violations::ViolationRecorder;

/// State of the hub server
#[derive(Clone)]
pub struct HubState {
    /// Authoritative threshold registry
    pub thresholds: Arc<ThresholdRegistry>,

    pub storage: Arc<dyn StorageBackend>,

    pub resolver: Arc<IdentityResolver>,

    pub recorder: Arc<ViolationRecorder>,

    /// Subscribers of `GET /metrics/threshold-alert`
    pub alerts: Arc<AlertSubscribers>,

    /// Close alert streams after this long, if set
    pub alert_stream_timeout: Option<Duration>,

    /// Serializes persist-then-apply threshold writes per metric
    threshold_writes: Arc<DashMap<(MachineType, String), Arc<Mutex<()>>>>,
}

impl HubState {
    /// Wire the hub components around `storage` and a loaded registry.
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        thresholds: Arc<ThresholdRegistry>,
        resolver: Arc<IdentityResolver>,
    ) -> Self {
        let alerts = Arc::new(AlertSubscribers::new());
        let recorder = Arc::new(ViolationRecorder::new(
            resolver.clone(),
            storage.clone(),
            alerts.clone(),
            thresholds.clone(),
        ));

        Self {
            thresholds,
            storage,
            resolver,
            recorder,
            alerts,
            alert_stream_timeout: None,
            threshold_writes: Arc::new(DashMap::new()),
        }
    }

    /// Hub state with a store-backed resolver using default cache settings
    pub fn with_storage(storage: Arc<dyn StorageBackend>, thresholds: Arc<ThresholdRegistry>) -> Self {
        let resolver = Arc::new(IdentityResolver::new(Arc::new(StoreDirectory::new(
            storage.clone(),
        ))));
        Self::new(storage, thresholds, resolver)
    }

    /// Wait for exclusive write access to one metric's bounds.
    pub async fn lock_threshold(
        &self,
        machine_type: MachineType,
        metric: &str,
    ) -> OwnedMutexGuard<()> {
        let lock = self
            .threshold_writes
            .entry((machine_type, metric.to_string()))
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    pub fn with_alert_stream_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.alert_stream_timeout = timeout;
        self
    }
}

/// State of an ingestion process's server
#[derive(Clone)]
pub struct IngestState {
    pub sessions: Arc<SessionRegistry>,

    pub broker: Arc<MemoryBroker>,

    pub liveness: Arc<LivenessMonitor>,

    pub group_id: String,

    /// Origins allowed to open websocket sessions (empty = any)
    pub allowed_origins: Arc<Vec<String>>,
}
