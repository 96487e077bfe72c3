//! Violation log endpoints

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    api::{error::ApiResult, state::HubState},
    storage::AbnormalEvent,
    violations::ViolationReport,
};

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

/// POST /violation-store
pub async fn store_violation(
    State(state): State<HubState>,
    Json(report): Json<ViolationReport>,
) -> ApiResult<(StatusCode, Json<AbnormalEvent>)> {
    let event = state.recorder.record_violation(&report).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

#[derive(Debug, Deserialize)]
pub struct RecentQuery {
    limit: Option<usize>,
}

/// GET /violations?limit=
///
/// Most recent first, at most 1000
pub async fn recent_violations(
    State(state): State<HubState>,
    Query(query): Query<RecentQuery>,
) -> ApiResult<Json<Vec<AbnormalEvent>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    Ok(Json(state.recorder.recent(limit).await?))
}

#[derive(Debug, Deserialize)]
pub struct PurgeQuery {
    before: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub removed: usize,
}

/// DELETE /violations?before=
pub async fn purge_violations(
    State(state): State<HubState>,
    Query(query): Query<PurgeQuery>,
) -> ApiResult<Json<PurgeResponse>> {
    let removed = state.recorder.purge_before(query.before).await?;
    Ok(Json(PurgeResponse { removed }))
}
