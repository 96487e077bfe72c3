//! ReplicaActor - Keeps the local threshold replica in sync with the hub

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, warn};

use crate::thresholds::{RefreshOutcome, ThresholdReplica};

use super::messages::ReplicaCommand;

pub struct ReplicaActor {
    replica: Arc<ThresholdReplica>,
    refresh_interval: Duration,
    command_rx: mpsc::Receiver<ReplicaCommand>,
}

impl ReplicaActor {
    pub fn new(
        replica: Arc<ThresholdReplica>,
        refresh_interval: Duration,
        command_rx: mpsc::Receiver<ReplicaCommand>,
    ) -> Self {
        Self {
            replica,
            refresh_interval,
            command_rx,
        }
    }

    /// Refreshes right away, then on every tick.
    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting threshold refresh actor");

        let mut ticker = interval(self.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let outcome = self.replica.refresh().await;
                    debug!("threshold refresh: {outcome:?}");
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        break;
                    };

                    match cmd {
                        ReplicaCommand::RefreshNow { respond_to } => {
                            let _ = respond_to.send(self.replica.refresh().await);
                        }

                        ReplicaCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        debug!("threshold refresh actor stopped");
    }
}

#[derive(Clone)]
pub struct ReplicaHandle {
    sender: mpsc::Sender<ReplicaCommand>,
}

impl ReplicaHandle {
    pub fn spawn(replica: Arc<ThresholdReplica>, refresh_interval: Duration) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = ReplicaActor::new(replica, refresh_interval, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn refresh_now(&self) -> Result<RefreshOutcome> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(ReplicaCommand::RefreshNow { respond_to: tx })
            .await
            .context("failed to send RefreshNow command")?;

        rx.await.context("failed to receive refresh outcome")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(ReplicaCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
