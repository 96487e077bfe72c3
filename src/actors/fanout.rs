//! FanoutActor - Delivers raw metric messages to websocket sessions
//!
//! The single delivery worker reads from the raw metric broadcast channel. The
//! channel has a fixed capacity; when delivery falls behind, the oldest
//! messages are overwritten and the skipped count is logged. A slower ticker
//! removes sessions whose transport has closed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, trace, warn};

use crate::realtime::SessionRegistry;

use super::messages::FanoutCommand;

pub struct FanoutActor {
    sessions: Arc<SessionRegistry>,
    raw_rx: broadcast::Receiver<Arc<str>>,
    sweep_interval: Duration,
    command_rx: mpsc::Receiver<FanoutCommand>,
}

impl FanoutActor {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        raw_rx: broadcast::Receiver<Arc<str>>,
        sweep_interval: Duration,
        command_rx: mpsc::Receiver<FanoutCommand>,
    ) -> Self {
        Self {
            sessions,
            raw_rx,
            sweep_interval,
            command_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting fan-out actor");

        let mut ticker = interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                result = self.raw_rx.recv() => {
                    match result {
                        Ok(text) => {
                            if self.sessions.is_empty() {
                                continue;
                            }
                            let report = self.sessions.deliver(&text).await;
                            trace!("raw metric delivered: {report:?}");
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("fan-out lagged, dropped {skipped} oldest raw metrics");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("raw metric channel closed, shutting down");
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.sessions.sweep_closed();
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        break;
                    };

                    match cmd {
                        FanoutCommand::SweepNow { respond_to } => {
                            let _ = respond_to.send(self.sessions.sweep_closed());
                        }

                        FanoutCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        debug!("fan-out actor stopped");
    }
}

#[derive(Clone)]
pub struct FanoutHandle {
    sender: mpsc::Sender<FanoutCommand>,
}

impl FanoutHandle {
    pub fn spawn(
        sessions: Arc<SessionRegistry>,
        raw_rx: broadcast::Receiver<Arc<str>>,
        sweep_interval: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = FanoutActor::new(sessions, raw_rx, sweep_interval, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn sweep_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(FanoutCommand::SweepNow { respond_to: tx })
            .await
            .context("failed to send SweepNow command")?;

        rx.await.context("failed to receive sweep result")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(FanoutCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
