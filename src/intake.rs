//! Per-message processing of queue records
//!
//! ```text
//! QueueMessage ─► parse ─┬─► raw metric fan-out (websocket sessions)
//!                        ├─► resolve + touch, host then nested containers
//!                        └─► MetricForwarder (local evaluation or hub)
//! ```
//!
//! Parse failures drop the message. Everything downstream of a successful
//! parse is best effort: failures are logged and counted, never retried.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, error, instrument, trace, warn};

use crate::identity::IdentityResolver;
use crate::liveness::LivenessMonitor;
use crate::payload::{MetricPayload, PayloadError};
use crate::queue::QueueMessage;
use crate::thresholds::{ThresholdRegistry, evaluate};
use crate::violations::ViolationSink;

#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl IntakeError {
    /// Short label used in logs and counters
    pub fn kind(&self) -> &'static str {
        match self {
            IntakeError::Payload(PayloadError::Malformed(_)) => "malformed",
            IntakeError::Payload(PayloadError::InvalidShape(_)) => "invalid-shape",
        }
    }
}

/// Receives every successfully parsed payload for threshold evaluation
#[async_trait]
pub trait MetricForwarder: Send + Sync {
    async fn forward(
        &self,
        payload: &MetricPayload,
        raw: &[u8],
        received_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;
}

/// Evaluates against a threshold registry and reports violations to a sink
pub struct LocalEvaluation {
    thresholds: Arc<ThresholdRegistry>,
    sink: Arc<dyn ViolationSink>,
}

impl LocalEvaluation {
    pub fn new(thresholds: Arc<ThresholdRegistry>, sink: Arc<dyn ViolationSink>) -> Self {
        Self { thresholds, sink }
    }
}

#[async_trait]
impl MetricForwarder for LocalEvaluation {
    async fn forward(
        &self,
        payload: &MetricPayload,
        _raw: &[u8],
        received_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        let violations = evaluate(&self.thresholds, payload, received_at);
        let mut failed = 0;

        for violation in &violations {
            debug!(
                "{} '{}' {} = {} is {} {}",
                violation.machine_type,
                violation.raw_id,
                violation.metric_name,
                violation.value,
                violation.kind,
                violation.threshold
            );
            if let Err(e) = self.sink.report(&violation.to_report()).await {
                error!("failed to report violation of {}: {e:#}", violation.metric_name);
                failed += 1;
            }
        }

        if failed > 0 {
            anyhow::bail!("{failed} of {} violations could not be reported", violations.len());
        }
        Ok(())
    }
}

/// Publishing side of the raw metric fan-out
///
/// Backed by a fixed-capacity broadcast channel: when the delivery worker
/// falls behind, the oldest messages are overwritten.
#[derive(Clone)]
pub struct RawMetricPublisher {
    tx: broadcast::Sender<Arc<str>>,
}

impl RawMetricPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, text: Arc<str>) {
        // no receivers just means no delivery worker is running
        if self.tx.send(text).is_err() {
            trace!("no raw metric receivers");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.tx.subscribe()
    }
}

/// Per-worker counters, logged after every batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeStats {
    pub batches: u64,
    pub processed: u64,
    pub malformed: u64,
    pub invalid: u64,
    pub unresolved: u64,
    pub forward_failed: u64,

    /// Messages whose payload type differs from their topic
    pub topic_mismatch: u64,
}

impl IntakeStats {
    fn record_error(&mut self, err: &IntakeError) {
        match err {
            IntakeError::Payload(PayloadError::Malformed(_)) => self.malformed += 1,
            IntakeError::Payload(PayloadError::InvalidShape(_)) => self.invalid += 1,
        }
    }
}

/// What happened to one successfully parsed message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntakeOutcome {
    pub sightings: usize,
    pub unresolved: usize,
    pub forwarded: bool,

    /// Payload type differs from the topic; handled by payload type
    pub topic_mismatch: bool,
}

pub struct IntakePipeline {
    raw_metrics: RawMetricPublisher,
    resolver: Arc<IdentityResolver>,
    liveness: Arc<LivenessMonitor>,
    forwarder: Arc<dyn MetricForwarder>,
}

impl IntakePipeline {
    pub fn new(
        raw_metrics: RawMetricPublisher,
        resolver: Arc<IdentityResolver>,
        liveness: Arc<LivenessMonitor>,
        forwarder: Arc<dyn MetricForwarder>,
    ) -> Self {
        Self {
            raw_metrics,
            resolver,
            liveness,
            forwarder,
        }
    }

    #[instrument(skip_all, fields(topic = %message.topic, partition = message.partition, offset = message.offset))]
    pub async fn process(&self, message: &QueueMessage) -> Result<IntakeOutcome, IntakeError> {
        let received_at = Utc::now();
        let payload = MetricPayload::parse(&message.payload)?;

        let mut outcome = IntakeOutcome::default();

        if let Some(expected) = crate::MachineType::from_topic(&message.topic)
            && expected != payload.machine_type()
        {
            debug!(
                "{} payload on topic '{}', handling by payload type",
                payload.machine_type(),
                message.topic
            );
            outcome.topic_mismatch = true;
        }

        self.raw_metrics
            .publish(Arc::from(String::from_utf8_lossy(&message.payload)));

        for sighting in payload.sightings() {
            outcome.sightings += 1;
            self.liveness
                .touch(sighting.machine_type, sighting.raw_id, sighting.display_name);

            match self
                .resolver
                .resolve(
                    sighting.machine_type,
                    sighting.raw_id,
                    Some(sighting.display_name),
                )
                .await
            {
                Ok(stable_id) => trace!("{} '{}' is {stable_id}", sighting.machine_type, sighting.raw_id),
                Err(e) => {
                    warn!("could not resolve {} '{}': {e}", sighting.machine_type, sighting.raw_id);
                    outcome.unresolved += 1;
                }
            }
        }

        match self
            .forwarder
            .forward(&payload, &message.payload, received_at)
            .await
        {
            Ok(()) => outcome.forwarded = true,
            Err(e) => error!("failed to forward metrics: {e:#}"),
        }

        Ok(outcome)
    }

    /// Process a batch, skipping failed messages, and fold the results into `stats`.
    pub async fn process_batch(&self, messages: &[QueueMessage], stats: &mut IntakeStats) {
        stats.batches += 1;

        for message in messages {
            match self.process(message).await {
                Ok(outcome) => {
                    stats.processed += 1;
                    stats.unresolved += outcome.unresolved as u64;
                    if !outcome.forwarded {
                        stats.forward_failed += 1;
                    }
                    if outcome.topic_mismatch {
                        stats.topic_mismatch += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        "dropping {} message at {}/{}@{}: {e}",
                        e.kind(),
                        message.topic,
                        message.partition,
                        message.offset
                    );
                    stats.record_error(&e);
                }
            }
        }
    }
}
