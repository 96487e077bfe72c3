//! LivenessActor - Periodic silence sweep
//!
//! Every tick the actor sweeps the [`LivenessMonitor`] and reports each silent
//! machine as a `timeout` violation. Report failures are logged and the notice
//! fires again on the next sweep if the machine stays silent.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, instrument, warn};

use crate::liveness::LivenessMonitor;
use crate::violations::ViolationSink;

use super::messages::LivenessCommand;

pub struct LivenessActor {
    monitor: Arc<LivenessMonitor>,
    sink: Arc<dyn ViolationSink>,
    sweep_interval: Duration,
    command_rx: mpsc::Receiver<LivenessCommand>,
}

impl LivenessActor {
    pub fn new(
        monitor: Arc<LivenessMonitor>,
        sink: Arc<dyn ViolationSink>,
        sweep_interval: Duration,
        command_rx: mpsc::Receiver<LivenessCommand>,
    ) -> Self {
        Self {
            monitor,
            sink,
            sweep_interval,
            command_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting liveness actor");

        let mut ticker = interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately and nothing can be silent yet
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }

                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        break;
                    };

                    match cmd {
                        LivenessCommand::SweepNow { respond_to } => {
                            let reported = self.sweep().await;
                            let _ = respond_to.send(reported);
                        }

                        LivenessCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }
            }
        }

        debug!("liveness actor stopped");
    }

    /// Report every silent machine, returning how many reports succeeded.
    async fn sweep(&self) -> usize {
        let notices = self.monitor.sweep(Utc::now());
        let threshold = self.monitor.silence_threshold();
        let mut reported = 0;

        for notice in notices {
            warn!(
                "{} '{}' ({}) silent since {}",
                notice.machine_type, notice.raw_id, notice.display_name, notice.last_seen_at
            );

            match self.sink.report(&notice.to_report(threshold)).await {
                Ok(()) => reported += 1,
                Err(e) => error!("failed to report timeout of '{}': {e:#}", notice.raw_id),
            }
        }

        reported
    }
}

#[derive(Clone)]
pub struct LivenessHandle {
    sender: mpsc::Sender<LivenessCommand>,
}

impl LivenessHandle {
    pub fn spawn(
        monitor: Arc<LivenessMonitor>,
        sink: Arc<dyn ViolationSink>,
        sweep_interval: Duration,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);

        let actor = LivenessActor::new(monitor, sink, sweep_interval, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn sweep_now(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(LivenessCommand::SweepNow { respond_to: tx })
            .await
            .context("failed to send SweepNow command")?;

        rx.await.context("failed to receive sweep result")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(LivenessCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
