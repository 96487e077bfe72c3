//! Concurrent threshold registry
//!
//! Bounds are stored in a sharded map keyed by `(machine type, metric name)`.
//! A write only locks the shard holding its key, so readers of unrelated keys
//! are never blocked.

use std::collections::BTreeMap;
use std::fmt;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::MachineType;
use crate::storage::schema::MetricDefinition;

/// Which side of the allowed range a bound protects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundKind {
    Over,
    Under,
}

impl fmt::Display for BoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundKind::Over => f.write_str("over"),
            BoundKind::Under => f.write_str("under"),
        }
    }
}

/// Over/under bounds of a single metric
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Bounds {
    pub over: Option<f64>,
    pub under: Option<f64>,
}

impl Bounds {
    pub fn get(&self, kind: BoundKind) -> Option<f64> {
        match kind {
            BoundKind::Over => self.over,
            BoundKind::Under => self.under,
        }
    }

    fn set(&mut self, kind: BoundKind, value: f64) {
        match kind {
            BoundKind::Over => self.over = Some(value),
            BoundKind::Under => self.under = Some(value),
        }
    }

    /// Which bound `value` violates, if any.
    pub fn check(&self, value: f64) -> Option<(BoundKind, f64)> {
        if let Some(over) = self.over
            && value > over
        {
            return Some((BoundKind::Over, over));
        }

        if let Some(under) = self.under
            && value < under
        {
            return Some((BoundKind::Under, under));
        }

        None
    }
}

/// Wire form of one bound kind: `{machineType: {metricName: value}}`
pub type ThresholdSnapshot = BTreeMap<MachineType, BTreeMap<String, f64>>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ThresholdError {
    #[error("{kind} threshold for {machine_type}/{metric} must be a finite number")]
    NotFinite {
        machine_type: MachineType,
        metric: String,
        kind: BoundKind,
    },

    #[error(
        "under threshold {under} would exceed over threshold {over} for {machine_type}/{metric}"
    )]
    Inverted {
        machine_type: MachineType,
        metric: String,
        over: f64,
        under: f64,
    },
}

#[derive(Debug, Default)]
pub struct ThresholdRegistry {
    bounds: DashMap<(MachineType, String), Bounds>,
}

impl ThresholdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the registry from persisted definitions.
    pub fn load(&self, definitions: impl IntoIterator<Item = MetricDefinition>) {
        let mut loaded = 0;
        for definition in definitions {
            let bounds = Bounds {
                over: definition.over_threshold,
                under: definition.under_threshold,
            };
            self.bounds
                .insert((definition.machine_type, definition.metric_name), bounds);
            loaded += 1;
        }
        debug!("loaded {loaded} metric definitions into threshold registry");
    }

    /// Overwrite one bound, rejecting values that would leave `under > over`.
    pub fn update(
        &self,
        machine_type: MachineType,
        metric: &str,
        kind: BoundKind,
        value: f64,
    ) -> Result<(), ThresholdError> {
        // the entry guard holds the shard lock until the write completes
        match self.bounds.entry((machine_type, metric.to_string())) {
            Entry::Occupied(mut entry) => {
                let updated = with_bound(*entry.get(), machine_type, metric, kind, value)?;
                entry.insert(updated);
            }
            Entry::Vacant(entry) => {
                entry.insert(with_bound(Bounds::default(), machine_type, metric, kind, value)?);
            }
        }
        trace!("{machine_type}/{metric}: {kind} threshold set to {value}");
        Ok(())
    }

    /// Check an update against the current bounds without applying it.
    pub fn validate(
        &self,
        machine_type: MachineType,
        metric: &str,
        kind: BoundKind,
        value: f64,
    ) -> Result<(), ThresholdError> {
        with_bound(self.bounds(machine_type, metric), machine_type, metric, kind, value).map(|_| ())
    }

    /// Overwrite one bound without cross-checking the opposite bound.
    ///
    /// Used by the read-replica, which mirrors an already validated authority.
    pub(crate) fn apply(&self, machine_type: MachineType, metric: &str, kind: BoundKind, value: f64) {
        self.bounds
            .entry((machine_type, metric.to_string()))
            .or_default()
            .set(kind, value);
    }

    pub fn get(&self, machine_type: MachineType, metric: &str, kind: BoundKind) -> Option<f64> {
        self.bounds(machine_type, metric).get(kind)
    }

    pub fn bounds(&self, machine_type: MachineType, metric: &str) -> Bounds {
        self.bounds
            .get(&(machine_type, metric.to_string()))
            .map(|entry| *entry)
            .unwrap_or_default()
    }

    pub fn snapshot(&self, kind: BoundKind) -> ThresholdSnapshot {
        let mut snapshot = ThresholdSnapshot::new();
        for entry in self.bounds.iter() {
            let (machine_type, metric) = entry.key();
            if let Some(value) = entry.value().get(kind) {
                snapshot
                    .entry(*machine_type)
                    .or_default()
                    .insert(metric.clone(), value);
            }
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }
}

fn with_bound(
    current: Bounds,
    machine_type: MachineType,
    metric: &str,
    kind: BoundKind,
    value: f64,
) -> Result<Bounds, ThresholdError> {
    if !value.is_finite() {
        return Err(ThresholdError::NotFinite {
            machine_type,
            metric: metric.to_string(),
            kind,
        });
    }

    let mut candidate = current;
    candidate.set(kind, value);

    if let (Some(over), Some(under)) = (candidate.over, candidate.under)
        && under > over
    {
        return Err(ThresholdError::Inverted {
            machine_type,
            metric: metric.to_string(),
            over,
            under,
        });
    }
    Ok(candidate)
}
