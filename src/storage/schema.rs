//! Persisted models
//!
//! Three tables back the core:
//!
//! - `monitored_machines`: durable raw id → stable id mapping
//! - `metric_definitions`: per-type-per-metric threshold bounds
//! - `abnormal_events`: append-only violation log
//!
//! Timestamps are stored as Unix milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MachineType;

/// Stable identity of a machine reporting metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoredMachine {
    pub stable_id: String,
    pub machine_type: MachineType,
    pub raw_id: String,
    pub display_name: String,

    /// Per-type sequence the stable id was generated from
    pub sequence: u32,
}

/// Format a stable id from its type and sequence (`host001`, `container042`).
pub fn format_stable_id(machine_type: MachineType, sequence: u32) -> String {
    format!("{machine_type}{sequence:03}")
}

/// Threshold configuration of one metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    pub machine_type: MachineType,
    pub metric_name: String,
    pub unit: Option<String>,
    pub over_threshold: Option<f64>,
    pub under_threshold: Option<f64>,
}

/// Violation about to be appended
#[derive(Debug, Clone, PartialEq)]
pub struct NewAbnormalEvent {
    pub machine_type: MachineType,
    pub stable_id: String,
    pub display_name: String,
    pub metric_name: String,
    pub threshold_at_violation: Option<f64>,
    pub observed_value: f64,
    pub occurred_at: DateTime<Utc>,
}

/// Violation as stored, with its assigned sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AbnormalEvent {
    pub sequence: i64,
    pub machine_type: MachineType,
    pub stable_id: String,
    pub display_name: String,
    pub metric_name: String,
    pub threshold_at_violation: Option<f64>,
    pub observed_value: f64,
    pub occurred_at: DateTime<Utc>,
}

impl AbnormalEvent {
    pub fn from_new(sequence: i64, event: NewAbnormalEvent) -> Self {
        Self {
            sequence,
            machine_type: event.machine_type,
            stable_id: event.stable_id,
            display_name: event.display_name,
            metric_name: event.metric_name,
            threshold_at_violation: event.threshold_at_violation,
            observed_value: event.observed_value,
            occurred_at: event.occurred_at,
        }
    }
}
