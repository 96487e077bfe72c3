//! Threshold evaluation of decoded payloads

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::registry::{BoundKind, ThresholdRegistry};
use crate::MachineType;
use crate::payload::MetricPayload;
use crate::violations::ViolationReport;

/// A sample outside its configured bound
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub machine_type: MachineType,
    pub raw_id: String,
    pub display_name: String,
    pub metric_name: String,
    pub kind: BoundKind,
    pub threshold: f64,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl Violation {
    pub fn to_report(&self) -> ViolationReport {
        ViolationReport {
            machine_type: self.machine_type,
            machine_id: self.raw_id.clone(),
            metric_name: self.metric_name.clone(),
            value: self.value,
            timestamp: self.timestamp,
            threshold: Some(self.threshold),
            display_name: Some(self.display_name.clone()),
        }
    }
}

/// Check every machine in `payload` against `registry`.
///
/// Payloads without a timestamp are stamped with `received_at`.
pub fn evaluate(
    registry: &ThresholdRegistry,
    payload: &MetricPayload,
    received_at: DateTime<Utc>,
) -> Vec<Violation> {
    let timestamp = payload.timestamp().unwrap_or(received_at);

    payload
        .sightings()
        .into_iter()
        .flat_map(|sighting| {
            sighting
                .usage
                .samples()
                .into_iter()
                .filter_map(move |(metric, value)| {
                    let (kind, threshold) = registry
                        .bounds(sighting.machine_type, metric)
                        .check(value)?;

                    Some(Violation {
                        machine_type: sighting.machine_type,
                        raw_id: sighting.raw_id.to_string(),
                        display_name: sighting.display_name.to_string(),
                        metric_name: metric.to_string(),
                        kind,
                        threshold,
                        value,
                        timestamp,
                    })
                })
        })
        .collect()
}
