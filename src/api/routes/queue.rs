//! Publishing into the in-process broker

use axum::{
    Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::api::{error::ApiResult, state::IngestState};

#[derive(Debug, Deserialize)]
pub struct PublishQuery {
    /// Partitioning key, usually the raw machine id
    key: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Published {
    pub partition: u32,
    pub offset: u64,
}

/// POST /queue/{topic}[?key=]
///
/// The body is stored as is; parsing happens when the message is consumed.
pub async fn publish(
    State(state): State<IngestState>,
    Path(topic): Path<String>,
    Query(query): Query<PublishQuery>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Published>)> {
    let (partition, offset) = state
        .broker
        .publish(&topic, query.key.as_deref(), body.to_vec())?;

    trace!("accepted {} bytes into {topic}/{partition}@{offset}", body.len());
    Ok((StatusCode::ACCEPTED, Json(Published { partition, offset })))
}
