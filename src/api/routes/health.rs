//! Health check endpoints

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::api::state::{HubState, IngestState};

#[derive(Debug, Serialize, Deserialize)]
pub struct HubHealth {
    pub status: String,
    pub timestamp: String,
    pub storage: String,
    pub thresholds: usize,
    pub alert_subscribers: usize,
}

/// GET /health (hub)
pub async fn hub_health(State(state): State<HubState>) -> (StatusCode, Json<HubHealth>) {
    let (status, storage) = match state.storage.health_check().await {
        Ok(health) if health.healthy => (StatusCode::OK, health.message),
        Ok(health) => (StatusCode::SERVICE_UNAVAILABLE, health.message),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    };

    (
        status,
        Json(HubHealth {
            status: if status == StatusCode::OK { "ok" } else { "degraded" }.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            storage,
            thresholds: state.thresholds.len(),
            alert_subscribers: state.alerts.len(),
        }),
    )
}

#[derive(Debug, Serialize, Deserialize)]
pub struct IngestHealth {
    pub status: String,
    pub timestamp: String,
    pub sessions: usize,
    pub tracked_machines: u64,

    /// Uncommitted messages per topic for this process's group
    pub lag: Vec<(String, u64)>,
}

/// GET /health (ingest)
pub async fn ingest_health(State(state): State<IngestState>) -> Json<IngestHealth> {
    let lag = state
        .broker
        .topics()
        .into_iter()
        .filter_map(|topic| {
            let lag = state.broker.lag(&topic, &state.group_id).ok()?;
            Some((topic, lag))
        })
        .collect();

    Json(IngestHealth {
        status: "ok".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        sessions: state.sessions.len(),
        tracked_machines: state.liveness.tracked(),
        lag,
    })
}
