//! In-memory storage backend (no persistence)
//!
//! Useful for:
//! - Testing without database dependencies
//! - Running the hub with `backend = "none"`
//!
//! Uniqueness rules match the SQLite schema so the identity resolver behaves
//! the same against both backends.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{AbnormalEvent, MetricDefinition, MonitoredMachine, NewAbnormalEvent};
use crate::MachineType;
use crate::thresholds::BoundKind;

#[derive(Debug, Default)]
struct Inner {
    machines: Vec<MonitoredMachine>,
    definitions: BTreeMap<(MachineType, String), MetricDefinition>,
    events: Vec<AbnormalEvent>,
    next_event_sequence: i64,
}

/// In-memory storage backend
#[derive(Debug, Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,

    /// When set, every write fails with `StorageError::Unavailable`
    writes_disabled: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject all subsequent writes (reads keep working).
    pub fn disable_writes(&self, disabled: bool) {
        self.writes_disabled.store(disabled, Ordering::SeqCst);
    }

    pub fn machine_count(&self) -> usize {
        self.lock().machines.len()
    }

    pub fn event_count(&self) -> usize {
        self.lock().events.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a poisoned lock only means a test panicked mid-write; the data is still usable
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self) -> StorageResult<()> {
        if self.writes_disabled.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "in-memory backend is read-only".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn find_machine(
        &self,
        machine_type: MachineType,
        raw_id: &str,
    ) -> StorageResult<Option<MonitoredMachine>> {
        Ok(self
            .lock()
            .machines
            .iter()
            .find(|m| m.machine_type == machine_type && m.raw_id == raw_id)
            .cloned())
    }

    async fn find_machine_by_stable_id(
        &self,
        stable_id: &str,
    ) -> StorageResult<Option<MonitoredMachine>> {
        Ok(self
            .lock()
            .machines
            .iter()
            .find(|m| m.stable_id == stable_id)
            .cloned())
    }

    async fn max_sequence(&self, machine_type: MachineType) -> StorageResult<Option<u32>> {
        Ok(self
            .lock()
            .machines
            .iter()
            .filter(|m| m.machine_type == machine_type)
            .map(|m| m.sequence)
            .max())
    }

    async fn insert_machine(&self, machine: &MonitoredMachine) -> StorageResult<()> {
        self.check_writable()?;
        let mut inner = self.lock();

        let clash = inner.machines.iter().any(|m| {
            m.machine_type == machine.machine_type
                && (m.raw_id == machine.raw_id || m.sequence == machine.sequence)
        });
        if clash || inner.machines.iter().any(|m| m.stable_id == machine.stable_id) {
            return Err(StorageError::Conflict(format!(
                "machine {} ({}) already registered",
                machine.stable_id, machine.raw_id
            )));
        }

        inner.machines.push(machine.clone());
        debug!("registered {} as {}", machine.raw_id, machine.stable_id);
        Ok(())
    }

    async fn update_display_name(&self, stable_id: &str, display_name: &str) -> StorageResult<()> {
        self.check_writable()?;
        let mut inner = self.lock();
        if let Some(machine) = inner.machines.iter_mut().find(|m| m.stable_id == stable_id) {
            machine.display_name = display_name.to_string();
        }
        Ok(())
    }

    async fn load_definitions(&self) -> StorageResult<Vec<MetricDefinition>> {
        Ok(self.lock().definitions.values().cloned().collect())
    }

    async fn save_bound(
        &self,
        machine_type: MachineType,
        metric_name: &str,
        kind: BoundKind,
        value: f64,
        unit: Option<&str>,
    ) -> StorageResult<()> {
        self.check_writable()?;
        let mut inner = self.lock();
        let definition = inner
            .definitions
            .entry((machine_type, metric_name.to_string()))
            .or_insert_with(|| MetricDefinition {
                machine_type,
                metric_name: metric_name.to_string(),
                unit: None,
                over_threshold: None,
                under_threshold: None,
            });

        match kind {
            BoundKind::Over => definition.over_threshold = Some(value),
            BoundKind::Under => definition.under_threshold = Some(value),
        }
        if let Some(unit) = unit {
            definition.unit = Some(unit.to_string());
        }
        Ok(())
    }

    async fn append_event(&self, event: NewAbnormalEvent) -> StorageResult<AbnormalEvent> {
        self.check_writable()?;
        let mut inner = self.lock();
        inner.next_event_sequence += 1;
        let stored = AbnormalEvent::from_new(inner.next_event_sequence, event);
        inner.events.push(stored.clone());
        Ok(stored)
    }

    async fn recent_events(&self, limit: usize) -> StorageResult<Vec<AbnormalEvent>> {
        Ok(self
            .lock()
            .events
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn purge_events_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.check_writable()?;
        let mut inner = self.lock();
        let count = inner.events.len();
        inner.events.retain(|e| e.occurred_at >= before);
        Ok(count - inner.events.len())
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let inner = self.lock();
        let writable = !self.writes_disabled.load(Ordering::SeqCst);
        Ok(HealthStatus {
            healthy: writable,
            message: if writable {
                "In-memory storage operational"
            } else {
                "In-memory storage is read-only"
            }
            .to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("machines".to_string(), inner.machines.len().to_string()),
                ("events".to_string(), inner.events.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend (no-op)");
        Ok(())
    }
}
