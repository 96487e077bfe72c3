//! IntakeActor - Consumes one topic on behalf of a consumer group
//!
//! ## Message Flow
//!
//! ```text
//! poll_batch(batch_size) → IntakePipeline::process_batch → commit(whole batch)
//!     ↑
//!     └─── Commands (GetStats, Shutdown)
//! ```
//!
//! The whole batch is committed once processed, failed messages included, so
//! nothing is redelivered to this group. A pending poll is dropped when a
//! command arrives, which is safe because polling only advances positions
//! once messages have been taken.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, instrument, warn};

use crate::intake::{IntakePipeline, IntakeStats};
use crate::queue::BatchConsumer;

use super::messages::IntakeCommand;

#[derive(Debug, Clone, Copy)]
pub struct IntakeSettings {
    pub batch_size: usize,
    pub poll_wait: Duration,
}

impl Default for IntakeSettings {
    fn default() -> Self {
        Self {
            batch_size: 100,
            poll_wait: Duration::from_millis(500),
        }
    }
}

pub struct IntakeActor {
    consumer: Box<dyn BatchConsumer>,
    pipeline: Arc<IntakePipeline>,
    settings: IntakeSettings,
    command_rx: mpsc::Receiver<IntakeCommand>,
    stats: IntakeStats,
}

impl IntakeActor {
    pub fn new(
        consumer: Box<dyn BatchConsumer>,
        pipeline: Arc<IntakePipeline>,
        settings: IntakeSettings,
        command_rx: mpsc::Receiver<IntakeCommand>,
    ) -> Self {
        Self {
            consumer,
            pipeline,
            settings,
            command_rx,
            stats: IntakeStats::default(),
        }
    }

    #[instrument(skip(self), fields(topic = %self.consumer.topic()))]
    pub async fn run(mut self) {
        debug!("starting intake actor");

        loop {
            tokio::select! {
                cmd = self.command_rx.recv() => {
                    let Some(cmd) = cmd else {
                        warn!("command channel closed, shutting down");
                        break;
                    };

                    match cmd {
                        IntakeCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats);
                        }

                        IntakeCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                result = self.consumer.poll_batch(self.settings.batch_size, self.settings.poll_wait) => {
                    match result {
                        Ok(batch) if batch.is_empty() => {}
                        Ok(batch) => {
                            self.pipeline.process_batch(&batch, &mut self.stats).await;

                            if let Err(e) = self.consumer.commit(&batch).await {
                                error!("failed to commit {} messages: {e}", batch.len());
                            }

                            debug!("batch of {} done, totals: {:?}", batch.len(), self.stats);
                        }
                        Err(e) => {
                            warn!("poll failed: {e}");
                            tokio::time::sleep(self.settings.poll_wait).await;
                        }
                    }
                }
            }
        }

        debug!("intake actor stopped");
    }
}

#[derive(Clone)]
pub struct IntakeHandle {
    sender: mpsc::Sender<IntakeCommand>,
    pub topic: String,
}

impl IntakeHandle {
    pub fn spawn(
        consumer: Box<dyn BatchConsumer>,
        pipeline: Arc<IntakePipeline>,
        settings: IntakeSettings,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let topic = consumer.topic().to_string();

        let actor = IntakeActor::new(consumer, pipeline, settings, cmd_rx);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            topic,
        }
    }

    pub async fn stats(&self) -> Result<IntakeStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(IntakeCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive stats")
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(IntakeCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}
