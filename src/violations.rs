//! Violation recording and alert broadcast
//!
//! A violation is resolved to its stable id, appended to the event log and only
//! then pushed to the alert subscribers registered at that moment. A failure to
//! persist aborts the call before anything is broadcast.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::MachineType;
use crate::identity::{IdentityError, IdentityResolver};
use crate::realtime::{AlertPayload, AlertSubscribers};
use crate::storage::{AbnormalEvent, NewAbnormalEvent, StorageBackend, StorageError};
use crate::thresholds::ThresholdRegistry;

/// Violation as reported by an ingestion process (`POST /violation-store`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViolationReport {
    #[serde(rename = "type")]
    pub machine_type: MachineType,

    /// Raw machine id as seen on the queue
    pub machine_id: String,

    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,

    /// Bound that was crossed; looked up from the registry when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Where detected violations are sent
#[async_trait]
pub trait ViolationSink: Send + Sync {
    async fn report(&self, report: &ViolationReport) -> anyhow::Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("could not resolve machine: {0}")]
    Identity(#[from] IdentityError),

    #[error("could not persist violation: {0}")]
    Storage(#[from] StorageError),
}

pub struct ViolationRecorder {
    resolver: Arc<IdentityResolver>,
    storage: Arc<dyn StorageBackend>,
    alerts: Arc<AlertSubscribers>,
    thresholds: Arc<ThresholdRegistry>,
}

impl ViolationRecorder {
    pub fn new(
        resolver: Arc<IdentityResolver>,
        storage: Arc<dyn StorageBackend>,
        alerts: Arc<AlertSubscribers>,
        thresholds: Arc<ThresholdRegistry>,
    ) -> Self {
        Self {
            resolver,
            storage,
            alerts,
            thresholds,
        }
    }

    #[instrument(skip_all, fields(machine = %report.machine_id, metric = %report.metric_name))]
    pub async fn record_violation(&self, report: &ViolationReport) -> Result<AbnormalEvent, RecordError> {
        let stable_id = self
            .resolver
            .resolve(
                report.machine_type,
                &report.machine_id,
                report.display_name.as_deref(),
            )
            .await?;

        let threshold = report.threshold.or_else(|| {
            self.thresholds
                .bounds(report.machine_type, &report.metric_name)
                .check(report.value)
                .map(|(_, bound)| bound)
        });

        let display_name = match &report.display_name {
            Some(name) => name.clone(),
            None => self
                .storage
                .find_machine_by_stable_id(&stable_id)
                .await?
                .map(|machine| machine.display_name)
                .unwrap_or_else(|| report.machine_id.clone()),
        };

        let event = self
            .storage
            .append_event(NewAbnormalEvent {
                machine_type: report.machine_type,
                stable_id: stable_id.clone(),
                display_name,
                metric_name: report.metric_name.clone(),
                threshold_at_violation: threshold,
                observed_value: report.value,
                occurred_at: report.timestamp,
            })
            .await?;

        debug!("recorded violation #{} for {stable_id}", event.sequence);

        let delivered = self.alerts.broadcast(&AlertPayload {
            stable_id,
            metric_name: report.metric_name.clone(),
            value: report.value,
            timestamp: report.timestamp,
        });
        trace!("alert delivered to {delivered} subscribers");

        Ok(event)
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<AbnormalEvent>, StorageError> {
        self.storage.recent_events(limit).await
    }

    /// Delete events older than `cutoff`
    pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        let removed = self.storage.purge_events_before(cutoff).await?;
        debug!("purged {removed} violations before {cutoff}");
        Ok(removed)
    }
}

#[async_trait]
impl ViolationSink for ViolationRecorder {
    async fn report(&self, report: &ViolationReport) -> anyhow::Result<()> {
        self.record_violation(report).await?;
        Ok(())
    }
}
