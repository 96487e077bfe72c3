//! Metric evaluation and threshold endpoints

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::{
    MachineType,
    api::{error::ApiResult, state::HubState},
    payload::MetricPayload,
    thresholds::{BoundKind, ThresholdSnapshot, evaluate},
};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResponse {
    pub violations: usize,
}

/// POST /metrics
///
/// Evaluate a raw metric message against the authoritative thresholds and
/// record every violation.
pub async fn evaluate_metrics(
    State(state): State<HubState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<EvaluationResponse>)> {
    let payload = MetricPayload::parse(&body)?;
    let violations = evaluate(&state.thresholds, &payload, Utc::now());

    for violation in &violations {
        if let Err(e) = state.recorder.record_violation(&violation.to_report()).await {
            error!("failed to record {} violation: {e}", violation.metric_name);
            return Err(e.into());
        }
    }

    debug!("{} payload: {} violations", payload.machine_type(), violations.len());

    Ok((
        StatusCode::ACCEPTED,
        Json(EvaluationResponse {
            violations: violations.len(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ThresholdQuery {
    /// `over` (default) or `under`
    kind: Option<BoundKind>,
}

/// GET /metrics/threshold-check[?kind=under]
pub async fn threshold_check(
    State(state): State<HubState>,
    Query(query): Query<ThresholdQuery>,
) -> Json<ThresholdSnapshot> {
    Json(state.thresholds.snapshot(query.kind.unwrap_or(BoundKind::Over)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdUpdate {
    #[serde(rename = "type")]
    pub machine_type: MachineType,
    pub metric_name: String,
    pub kind: BoundKind,
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
}

/// PUT /metrics/threshold
///
/// Validated against the current bounds, persisted, then visible to readers.
/// Writes to one metric are serialized so the registry and the store apply
/// them in the same order. A failed write leaves the registry as it was.
pub async fn update_threshold(
    State(state): State<HubState>,
    Json(update): Json<ThresholdUpdate>,
) -> ApiResult<StatusCode> {
    let _guard = state
        .lock_threshold(update.machine_type, &update.metric_name)
        .await;

    state.thresholds.validate(
        update.machine_type,
        &update.metric_name,
        update.kind,
        update.value,
    )?;

    state
        .storage
        .save_bound(
            update.machine_type,
            &update.metric_name,
            update.kind,
            update.value,
            update.unit.as_deref(),
        )
        .await?;

    state.thresholds.update(
        update.machine_type,
        &update.metric_name,
        update.kind,
        update.value,
    )?;

    info!(
        "{}/{}: {} threshold set to {}",
        update.machine_type, update.metric_name, update.kind, update.value
    );
    Ok(StatusCode::NO_CONTENT)
}
