//! HTTP, SSE and WebSocket surfaces
//!
//! ## Hub endpoints
//!
//! - `POST /metrics` - Evaluate a raw metric message
//! - `GET /metrics/threshold-check[?kind=under]` - Threshold snapshot
//! - `PUT /metrics/threshold` - Set one bound
//! - `GET /metrics/threshold-alert` - SSE alert stream
//! - `POST /violation-store` - Record a violation
//! - `GET /violations?limit=` / `DELETE /violations?before=` - Violation log
//! - `GET /inventory/{machineId}/{type}[?name=]` - Stable id lookup
//! - `GET /health`
//!
//! ## Ingest endpoints
//!
//! - `WS /ws/metrics` - Raw metric stream
//! - `POST /queue/{topic}[?key=]` - Publish into the in-process broker
//! - `GET /health`

#[cfg(feature = "api")]
pub mod error;
#[cfg(feature = "api")]
pub mod routes;
#[cfg(feature = "api")]
pub mod sse;
#[cfg(feature = "api")]
pub mod state;
#[cfg(feature = "api")]
pub mod websocket;

#[cfg(feature = "api")]
pub use error::{ApiError, ApiResult};
#[cfg(feature = "api")]
pub use state::{HubState, IngestState};

#[cfg(feature = "api")]
use axum::{
    Router,
    routing::{get, post, put},
};
use std::net::SocketAddr;
#[cfg(feature = "api")]
use tracing::{info, warn};

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,

    /// Origins allowed by CORS (empty = any)
    pub allowed_origins: Vec<String>,
}

impl ApiConfig {
    pub fn new(bind_addr: SocketAddr, allowed_origins: Vec<String>) -> Self {
        Self {
            bind_addr,
            allowed_origins,
        }
    }
}

#[cfg(feature = "api")]
fn cors_layer(allowed_origins: &[String]) -> tower_http::cors::CorsLayer {
    use axum::http::HeaderValue;
    use tower_http::cors::{AllowOrigin, Any, CorsLayer};

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("ignoring invalid allowed origin '{origin}'");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        cors.allow_origin(AllowOrigin::list(origins))
    }
}

#[cfg(feature = "api")]
pub fn hub_router(config: &ApiConfig, state: HubState) -> Router {
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/health", get(routes::health::hub_health))
        .route("/metrics", post(routes::metrics::evaluate_metrics))
        .route(
            "/metrics/threshold-check",
            get(routes::metrics::threshold_check),
        )
        .route("/metrics/threshold", put(routes::metrics::update_threshold))
        .route("/metrics/threshold-alert", get(sse::alert_stream))
        .route(
            "/violation-store",
            post(routes::violations::store_violation),
        )
        .route(
            "/violations",
            get(routes::violations::recent_violations).delete(routes::violations::purge_violations),
        )
        .route(
            "/inventory/:machine_id/:machine_type",
            get(routes::inventory::lookup),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.allowed_origins))
}

#[cfg(feature = "api")]
pub fn ingest_router(config: &ApiConfig, state: IngestState) -> Router {
    use tower_http::trace::TraceLayer;

    Router::new()
        .route("/health", get(routes::health::ingest_health))
        .route("/ws/metrics", get(websocket::websocket_handler))
        .route("/queue/:topic", post(routes::queue::publish))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&config.allowed_origins))
}

#[cfg(feature = "api")]
async fn serve(name: &'static str, bind_addr: SocketAddr, app: Router) -> anyhow::Result<SocketAddr> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("{name} server listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("{name} server error: {e}");
        }
    });

    Ok(addr)
}

/// Spawn the hub server in a background task, returning its local address.
#[cfg(feature = "api")]
pub async fn spawn_hub_server(config: ApiConfig, state: HubState) -> anyhow::Result<SocketAddr> {
    let app = hub_router(&config, state);
    serve("hub", config.bind_addr, app).await
}

/// Spawn an ingestion process's server in a background task.
#[cfg(feature = "api")]
pub async fn spawn_ingest_server(config: ApiConfig, state: IngestState) -> anyhow::Result<SocketAddr> {
    let app = ingest_router(&config, state);
    serve("ingest", config.bind_addr, app).await
}
