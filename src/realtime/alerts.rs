use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace};
use uuid::Uuid;

/// Alerts buffered per subscriber before it is considered stuck
const SUBSCRIBER_BUFFER: usize = 64;

/// Message pushed to alert subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub stable_id: String,
    pub metric_name: String,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
pub struct AlertSubscribers {
    subscribers: DashMap<Uuid, mpsc::Sender<AlertPayload>>,
}

impl AlertSubscribers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(self: &Arc<Self>) -> AlertSubscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = Uuid::new_v4();
        self.subscribers.insert(id, tx);
        debug!("alert subscriber {id} registered ({} total)", self.subscribers.len());

        AlertSubscription {
            id,
            rx,
            owner: self.clone(),
        }
    }

    pub fn unsubscribe(&self, id: &Uuid) {
        if self.subscribers.remove(id).is_some() {
            debug!("alert subscriber {id} deregistered");
        }
    }

    /// Push `alert` to every current subscriber, returning how many accepted it.
    ///
    /// A subscriber whose channel is closed or full is deregistered.
    pub fn broadcast(&self, alert: &AlertPayload) -> usize {
        let mut delivered = 0;

        self.subscribers.retain(|id, tx| match tx.try_send(alert.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Closed(_)) => {
                trace!("alert subscriber {id} went away");
                false
            }
            Err(TrySendError::Full(_)) => {
                debug!("alert subscriber {id} is not keeping up, dropping it");
                false
            }
        });

        delivered
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}

/// Receiving end of one alert subscription
pub struct AlertSubscription {
    id: Uuid,
    rx: mpsc::Receiver<AlertPayload>,
    owner: Arc<AlertSubscribers>,
}

impl AlertSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub async fn recv(&mut self) -> Option<AlertPayload> {
        self.rx.recv().await
    }

    /// Non-blocking receive, used by tests and drains.
    pub fn try_recv(&mut self) -> Option<AlertPayload> {
        self.rx.try_recv().ok()
    }

    pub fn into_stream(self) -> impl Stream<Item = AlertPayload> + Send + 'static {
        futures::stream::unfold(self, |mut subscription| async move {
            let alert = subscription.recv().await?;
            Some((alert, subscription))
        })
    }
}

impl Drop for AlertSubscription {
    fn drop(&mut self) {
        self.owner.unsubscribe(&self.id);
    }
}
