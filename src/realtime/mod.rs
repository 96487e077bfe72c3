//! Real-time push to connected clients
//!
//! Two registries live here:
//!
//! - [`SessionRegistry`]: persistent websocket sessions receiving every raw
//!   metric message. Delivery is retried a few times per session before the
//!   session is closed and dropped.
//! - [`AlertSubscribers`]: streamed-event subscriptions receiving threshold
//!   alerts. A subscription deregisters itself when dropped.

pub mod alerts;
pub mod sessions;

use async_trait::async_trait;

pub use alerts::{AlertPayload, AlertSubscribers, AlertSubscription};
pub use sessions::{DEFAULT_SEND_TIMEOUT, DeliveryReport, MAX_DELIVERY_ATTEMPTS, SessionRegistry};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),
}

/// Outbound half of a live push connection
#[async_trait]
pub trait SessionTransport: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    fn is_open(&self) -> bool;

    async fn close(&self);
}
