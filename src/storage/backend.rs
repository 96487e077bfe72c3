//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::error::StorageResult;
use super::schema::{AbnormalEvent, MetricDefinition, MonitoredMachine, NewAbnormalEvent};
use crate::MachineType;
use crate::thresholds::BoundKind;

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: std::collections::HashMap<String, String>,
}

/// Trait for persistent storage backends
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync` as they are shared across the
/// resolver, the violation recorder and the HTTP handlers.
///
/// ## Uniqueness
///
/// `insert_machine` must fail with `StorageError::Conflict` when either the
/// `(machine_type, raw_id)` pair or the `(machine_type, sequence)` pair already
/// exists. The identity resolver relies on that to settle registration races.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Machine inventory
    // ========================================================================

    async fn find_machine(
        &self,
        machine_type: MachineType,
        raw_id: &str,
    ) -> StorageResult<Option<MonitoredMachine>>;

    async fn find_machine_by_stable_id(&self, stable_id: &str)
    -> StorageResult<Option<MonitoredMachine>>;

    /// Highest sequence registered for `machine_type`, if any
    async fn max_sequence(&self, machine_type: MachineType) -> StorageResult<Option<u32>>;

    async fn insert_machine(&self, machine: &MonitoredMachine) -> StorageResult<()>;

    async fn update_display_name(&self, stable_id: &str, display_name: &str) -> StorageResult<()>;

    // ========================================================================
    // Metric definitions
    // ========================================================================

    async fn load_definitions(&self) -> StorageResult<Vec<MetricDefinition>>;

    /// Create or update one bound of a definition, leaving the other bound as is.
    async fn save_bound(
        &self,
        machine_type: MachineType,
        metric_name: &str,
        kind: BoundKind,
        value: f64,
        unit: Option<&str>,
    ) -> StorageResult<()>;

    // ========================================================================
    // Violation log
    // ========================================================================

    async fn append_event(&self, event: NewAbnormalEvent) -> StorageResult<AbnormalEvent>;

    /// Most recent events first
    async fn recent_events(&self, limit: usize) -> StorageResult<Vec<AbnormalEvent>>;

    /// Delete events that occurred before `before`, returning how many were removed
    async fn purge_events_before(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    // ========================================================================
    // Maintenance
    // ========================================================================

    async fn health_check(&self) -> StorageResult<HealthStatus>;

    async fn close(&self) -> StorageResult<()>;
}
