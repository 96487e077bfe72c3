//! Read-replica of the authoritative threshold registry
//!
//! Each ingestion process keeps a local [`ThresholdRegistry`] and pulls the
//! full bound set from the hub on an interval. Incoming values are applied one
//! by one and only when strictly positive, so a transient zero or garbage
//! response never overwrites a good bound. A failed pull leaves every value as
//! it was.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::registry::{BoundKind, ThresholdRegistry, ThresholdSnapshot};

/// Source of authoritative bounds
#[async_trait]
pub trait ThresholdSource: Send + Sync {
    async fn fetch(&self, kind: BoundKind) -> anyhow::Result<ThresholdSnapshot>;
}

#[async_trait]
impl ThresholdSource for ThresholdRegistry {
    async fn fetch(&self, kind: BoundKind) -> anyhow::Result<ThresholdSnapshot> {
        Ok(self.snapshot(kind))
    }
}

/// Result of one refresh round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshOutcome {
    /// Values written into the local registry
    pub applied: usize,

    /// Non-positive values that were ignored
    pub rejected: usize,

    /// Bound kinds whose fetch failed
    pub failed_fetches: usize,
}

pub struct ThresholdReplica {
    registry: Arc<ThresholdRegistry>,
    source: Arc<dyn ThresholdSource>,
}

impl ThresholdReplica {
    pub fn new(registry: Arc<ThresholdRegistry>, source: Arc<dyn ThresholdSource>) -> Self {
        Self { registry, source }
    }

    pub fn registry(&self) -> &Arc<ThresholdRegistry> {
        &self.registry
    }

    #[instrument(skip(self))]
    pub async fn refresh(&self) -> RefreshOutcome {
        let mut outcome = RefreshOutcome::default();

        for kind in [BoundKind::Over, BoundKind::Under] {
            let snapshot = match self.source.fetch(kind).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("failed to fetch {kind} thresholds, keeping current values: {e:#}");
                    outcome.failed_fetches += 1;
                    continue;
                }
            };

            for (machine_type, metrics) in snapshot {
                for (metric, value) in metrics {
                    if value > 0.0 && value.is_finite() {
                        self.registry.apply(machine_type, &metric, kind, value);
                        outcome.applied += 1;
                    } else {
                        warn!(
                            "rejecting {kind} threshold {value} for {machine_type}/{metric}, keeping previous value"
                        );
                        outcome.rejected += 1;
                    }
                }
            }
        }

        debug!(
            "threshold refresh: {} applied, {} rejected, {} failed fetches",
            outcome.applied, outcome.rejected, outcome.failed_fetches
        );

        outcome
    }
}
