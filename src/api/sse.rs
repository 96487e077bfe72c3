//! Server-sent alert stream

use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{Stream, StreamExt};
use tracing::{debug, warn};

use crate::api::state::HubState;

/// SSE event name of threshold alerts
pub const ALERT_EVENT: &str = "threshold-alert";

/// GET /metrics/threshold-alert
///
/// Streams every alert broadcast while the connection is open. The
/// subscription is dropped, and so deregistered, when the client goes away or
/// the configured stream timeout elapses.
pub async fn alert_stream(
    State(state): State<HubState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.alerts.subscribe();
    debug!("alert stream {} opened", subscription.id());

    let timeout = state.alert_stream_timeout;
    let deadline = async move {
        match timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending::<()>().await,
        }
    };

    let stream = subscription
        .into_stream()
        .filter_map(|alert| async move {
            match Event::default().event(ALERT_EVENT).json_data(&alert) {
                Ok(event) => Some(Ok(event)),
                Err(e) => {
                    warn!("could not encode alert for {}: {e}", alert.stable_id);
                    None
                }
            }
        })
        .take_until(deadline);

    Sse::new(stream).keep_alive(KeepAlive::default())
}
