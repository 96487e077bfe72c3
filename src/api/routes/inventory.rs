//! Machine inventory endpoint

use axum::extract::{Path, Query, State};
use serde::Deserialize;

use crate::{
    MachineType,
    api::{ApiError, error::ApiResult, state::HubState},
};

#[derive(Debug, Deserialize)]
pub struct InventoryQuery {
    /// Current display name of the machine
    name: Option<String>,
}

/// GET /inventory/{machineId}/{type}[?name=]
///
/// Returns the stable id for a raw machine id as plain text, registering the
/// machine on first sight.
pub async fn lookup(
    State(state): State<HubState>,
    Path((machine_id, machine_type)): Path<(String, String)>,
    Query(query): Query<InventoryQuery>,
) -> ApiResult<String> {
    let machine_type: MachineType = machine_type.parse().map_err(ApiError::InvalidRequest)?;
    if machine_id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("empty machine id".to_string()));
    }

    let stable_id = state
        .resolver
        .resolve(machine_type, &machine_id, query.name.as_deref())
        .await?;

    Ok(stable_id)
}
