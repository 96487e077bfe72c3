//! Partitioned message queue consumed by the ingestion workers
//!
//! Workers only see the [`BatchConsumer`] trait: poll a bounded batch, then
//! commit it. [`memory::MemoryBroker`] is the in-process implementation with
//! consumer groups, per-partition committed offsets and rebalancing when a
//! member joins or leaves.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;

pub use memory::{MemoryBroker, MemoryConsumer};

/// One record read from a topic partition
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    #[error("topic '{0}' already exists")]
    TopicExists(String),

    #[error("topic '{topic}' needs at least one partition")]
    NoPartitions { topic: String },
}

#[async_trait]
pub trait BatchConsumer: Send {
    fn topic(&self) -> &str;

    /// Up to `max` messages from the assigned partitions, waiting at most
    /// `wait` when none are available. An empty batch is not an error.
    async fn poll_batch(&mut self, max: usize, wait: Duration) -> Result<Vec<QueueMessage>, QueueError>;

    /// Mark `messages` as consumed for this consumer's group.
    async fn commit(&mut self, messages: &[QueueMessage]) -> Result<(), QueueError>;
}
