//! Metric payloads as they arrive on the queue
//!
//! Messages are JSON objects tagged by `type`. Decoding happens in two steps so
//! that an unparsable body (`Malformed`) can be told apart from a well-formed
//! document that does not match any known payload shape (`InvalidShape`).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::MachineType;

/// Errors produced while decoding a queue message
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The body is not valid JSON
    #[error("malformed metric message: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The body is JSON but misses required fields or has an unknown `type`
    #[error("metric message has an invalid shape: {0}")]
    InvalidShape(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDelta {
    #[serde(default)]
    pub rx_bytes: Option<u64>,
    #[serde(default)]
    pub tx_bytes: Option<u64>,
}

/// Resource counters shared by host and container payloads
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUsage {
    #[serde(default)]
    pub cpu_usage_percent: Option<f64>,
    #[serde(default)]
    pub memory_used_bytes: Option<u64>,
    #[serde(default)]
    pub memory_total_bytes: Option<u64>,
    #[serde(default)]
    pub disk_read_bytes_delta: Option<u64>,
    #[serde(default)]
    pub disk_write_bytes_delta: Option<u64>,
    #[serde(default)]
    pub network_delta: Option<NetworkDelta>,
}

impl ResourceUsage {
    /// Named samples that thresholds can be configured for.
    pub fn samples(&self) -> Vec<(&'static str, f64)> {
        let network = self.network_delta.clone().unwrap_or_default();

        [
            ("cpu", self.cpu_usage_percent),
            ("memory", self.memory_used_bytes.map(|v| v as f64)),
            ("diskRead", self.disk_read_bytes_delta.map(|v| v as f64)),
            ("diskWrite", self.disk_write_bytes_delta.map(|v| v as f64)),
            ("networkRx", network.rx_bytes.map(|v| v as f64)),
            ("networkTx", network.tx_bytes.map(|v| v as f64)),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.map(|v| (name, v)))
        .collect()
    }
}

/// Container entry nested inside a host payload, keyed by container id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NestedContainer {
    #[serde(default)]
    pub container_name: Option<String>,

    #[serde(flatten)]
    pub usage: ResourceUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostMetrics {
    pub host_id: String,

    #[serde(default)]
    pub host_name: Option<String>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub usage: ResourceUsage,

    #[serde(default)]
    pub containers: BTreeMap<String, NestedContainer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerMetrics {
    pub container_id: String,

    #[serde(default)]
    pub container_name: Option<String>,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub usage: ResourceUsage,
}

/// A decoded metric message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetricPayload {
    Host(HostMetrics),
    Container(ContainerMetrics),
}

/// One machine observed in a payload
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting<'a> {
    pub machine_type: MachineType,
    pub raw_id: &'a str,
    pub display_name: &'a str,
    pub usage: &'a ResourceUsage,
}

impl MetricPayload {
    /// Decode and validate a raw message body.
    pub fn parse(body: &[u8]) -> Result<Self, PayloadError> {
        let value: serde_json::Value = serde_json::from_slice(body).map_err(PayloadError::Malformed)?;

        let payload: MetricPayload = serde_json::from_value(value)
            .map_err(|e| PayloadError::InvalidShape(e.to_string()))?;

        payload.validate()?;
        Ok(payload)
    }

    fn validate(&self) -> Result<(), PayloadError> {
        match self {
            MetricPayload::Host(host) => {
                if host.host_id.trim().is_empty() {
                    return Err(PayloadError::InvalidShape("empty hostId".to_string()));
                }
                if host.containers.keys().any(|id| id.trim().is_empty()) {
                    return Err(PayloadError::InvalidShape(
                        "empty container id in containers".to_string(),
                    ));
                }
            }
            MetricPayload::Container(container) => {
                if container.container_id.trim().is_empty() {
                    return Err(PayloadError::InvalidShape("empty containerId".to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn machine_type(&self) -> MachineType {
        match self {
            MetricPayload::Host(_) => MachineType::Host,
            MetricPayload::Container(_) => MachineType::Container,
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            MetricPayload::Host(host) => host.timestamp,
            MetricPayload::Container(container) => container.timestamp,
        }
    }

    /// Every machine this payload reports on: the top-level machine first, then
    /// nested containers in id order. Missing display names fall back to the raw id.
    pub fn sightings(&self) -> Vec<Sighting<'_>> {
        match self {
            MetricPayload::Host(host) => {
                let mut sightings = Vec::with_capacity(1 + host.containers.len());
                sightings.push(Sighting {
                    machine_type: MachineType::Host,
                    raw_id: &host.host_id,
                    display_name: host.host_name.as_deref().unwrap_or(&host.host_id),
                    usage: &host.usage,
                });

                for (id, container) in &host.containers {
                    sightings.push(Sighting {
                        machine_type: MachineType::Container,
                        raw_id: id,
                        display_name: container.container_name.as_deref().unwrap_or(id),
                        usage: &container.usage,
                    });
                }

                sightings
            }
            MetricPayload::Container(container) => vec![Sighting {
                machine_type: MachineType::Container,
                raw_id: &container.container_id,
                display_name: container
                    .container_name
                    .as_deref()
                    .unwrap_or(&container.container_id),
                usage: &container.usage,
            }],
        }
    }
}
