//! In-process partitioned broker
//!
//! Each topic holds an append-only log per partition. Consumers join a group
//! on subscribe; the group's partitions are spread round-robin over its members
//! and reassigned (new generation) whenever a member joins or leaves. Offsets
//! are committed per `(group, partition)` and a partition's new owner resumes
//! from the last committed offset, so uncommitted messages are redelivered.
//! Once every group has committed past a message it is dropped from the log;
//! offsets keep counting from the partition's base.

use std::collections::{HashMap, VecDeque};
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Notify;
use tracing::{debug, info, trace};
use uuid::Uuid;

use super::{BatchConsumer, QueueError, QueueMessage};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct GroupState {
    generation: u64,
    members: Vec<Uuid>,

    /// Next offset to read, per partition
    committed: HashMap<u32, u64>,
}

/// Retained tail of one partition
#[derive(Default)]
struct PartitionLog {
    /// Offset of the first retained message
    base: u64,
    messages: VecDeque<QueueMessage>,
}

impl PartitionLog {
    fn end(&self) -> u64 {
        self.base + self.messages.len() as u64
    }

    fn get(&self, offset: u64) -> Option<&QueueMessage> {
        let index = offset.checked_sub(self.base)?;
        self.messages.get(usize::try_from(index).ok()?)
    }

    /// Drop messages below `offset`, returning how many were removed.
    fn trim_to(&mut self, offset: u64) -> usize {
        let count = offset.saturating_sub(self.base).min(self.messages.len() as u64) as usize;
        self.messages.drain(..count);
        self.base += count as u64;
        count
    }
}

struct Topic {
    name: String,
    partitions: u32,
    log: Mutex<Vec<PartitionLog>>,
    next_partition: AtomicU32,
    notify: Notify,
    groups: Mutex<HashMap<String, GroupState>>,
}

impl Topic {
    fn partition_for(&self, key: Option<&str>) -> u32 {
        match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                (hasher.finish() % self.partitions as u64) as u32
            }
            None => self.next_partition.fetch_add(1, Ordering::Relaxed) % self.partitions,
        }
    }

    /// Lowest committed offset of `partition` over every group on the topic
    fn retention_floor(groups: &HashMap<String, GroupState>, partition: u32) -> u64 {
        groups
            .values()
            .map(|g| g.committed.get(&partition).copied().unwrap_or(0))
            .min()
            .unwrap_or(0)
    }
}

#[derive(Default)]
pub struct MemoryBroker {
    topics: DashMap<String, Arc<Topic>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_topics<I, S>(topics: I, partitions: u32) -> Result<Self, QueueError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let broker = Self::new();
        for topic in topics {
            broker.create_topic(topic, partitions)?;
        }
        Ok(broker)
    }

    pub fn create_topic(&self, name: impl Into<String>, partitions: u32) -> Result<(), QueueError> {
        let name = name.into();
        if partitions == 0 {
            return Err(QueueError::NoPartitions { topic: name });
        }

        match self.topics.entry(name.clone()) {
            Entry::Occupied(_) => Err(QueueError::TopicExists(name)),
            Entry::Vacant(entry) => {
                debug!("created topic '{name}' with {partitions} partitions");
                entry.insert(Arc::new(Topic {
                    name,
                    partitions,
                    log: Mutex::new((0..partitions).map(|_| PartitionLog::default()).collect()),
                    next_partition: AtomicU32::new(0),
                    notify: Notify::new(),
                    groups: Mutex::new(HashMap::new()),
                }));
                Ok(())
            }
        }
    }

    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    fn topic(&self, name: &str) -> Result<Arc<Topic>, QueueError> {
        self.topics
            .get(name)
            .map(|t| t.value().clone())
            .ok_or_else(|| QueueError::UnknownTopic(name.to_string()))
    }

    /// Append a message, returning its `(partition, offset)`.
    ///
    /// Keyed messages always land on the same partition; unkeyed ones rotate.
    pub fn publish(
        &self,
        topic: &str,
        key: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<(u32, u64), QueueError> {
        let topic = self.topic(topic)?;
        let partition = topic.partition_for(key);

        let offset = {
            let mut log = lock(&topic.log);
            let partition_log = &mut log[partition as usize];
            let offset = partition_log.end();
            partition_log.messages.push_back(QueueMessage {
                topic: topic.name.clone(),
                partition,
                offset,
                key: key.map(str::to_string),
                payload,
            });
            offset
        };

        trace!("published to {}/{partition} at offset {offset}", topic.name);
        topic.notify.notify_waiters();
        Ok((partition, offset))
    }

    /// Join `group` on `topic`. Partitions are (re)assigned on the next poll.
    pub fn subscribe(&self, topic: &str, group: &str) -> Result<MemoryConsumer, QueueError> {
        let topic = self.topic(topic)?;
        let member_id = Uuid::new_v4();

        {
            let mut groups = lock(&topic.groups);
            let state = groups.entry(group.to_string()).or_default();
            state.members.push(member_id);
            state.generation += 1;
            debug!(
                "{member_id} joined group '{group}' on '{}' (generation {}, {} members)",
                topic.name,
                state.generation,
                state.members.len()
            );
        }

        Ok(MemoryConsumer {
            topic,
            group: group.to_string(),
            member_id,
            generation: 0,
            assigned: vec![],
            positions: HashMap::new(),
            cursor: 0,
        })
    }

    pub fn committed_offset(&self, topic: &str, group: &str, partition: u32) -> Option<u64> {
        let topic = self.topic(topic).ok()?;
        let groups = lock(&topic.groups);
        groups.get(group)?.committed.get(&partition).copied()
    }

    /// Messages not yet committed by `group` across all partitions
    pub fn lag(&self, topic: &str, group: &str) -> Result<u64, QueueError> {
        let topic = self.topic(topic)?;
        let log = lock(&topic.log);
        let groups = lock(&topic.groups);
        let committed = groups.get(group).map(|g| &g.committed);

        Ok(log
            .iter()
            .enumerate()
            .map(|(partition, partition_log)| {
                let done = committed
                    .and_then(|c| c.get(&(partition as u32)).copied())
                    .unwrap_or(0)
                    .max(partition_log.base);
                partition_log.end().saturating_sub(done)
            })
            .sum())
    }

    /// Messages still held in memory across all partitions of `topic`
    pub fn retained(&self, topic: &str) -> Result<usize, QueueError> {
        let topic = self.topic(topic)?;
        let log = lock(&topic.log);
        Ok(log.iter().map(|p| p.messages.len()).sum())
    }
}

/// Group member reading from a [`MemoryBroker`] topic
pub struct MemoryConsumer {
    topic: Arc<Topic>,
    group: String,
    member_id: Uuid,
    generation: u64,
    assigned: Vec<u32>,
    positions: HashMap<u32, u64>,
    cursor: usize,
}

impl MemoryConsumer {
    pub fn member_id(&self) -> Uuid {
        self.member_id
    }

    pub fn assigned(&self) -> &[u32] {
        &self.assigned
    }

    fn sync_assignment(&mut self) {
        let groups = lock(&self.topic.groups);
        let Some(group) = groups.get(&self.group) else {
            return;
        };
        if group.generation == self.generation {
            return;
        }

        let assigned: Vec<u32> = match group.members.iter().position(|m| *m == self.member_id) {
            Some(index) => (0..self.topic.partitions)
                .filter(|p| *p as usize % group.members.len() == index)
                .collect(),
            None => vec![],
        };

        let revoked: Vec<u32> = self
            .assigned
            .iter()
            .filter(|p| !assigned.contains(p))
            .copied()
            .collect();
        let added: Vec<u32> = assigned
            .iter()
            .filter(|p| !self.assigned.contains(p))
            .copied()
            .collect();

        if !revoked.is_empty() {
            info!("{}/{}: partitions revoked: {revoked:?}", self.topic.name, self.group);
        }
        if !added.is_empty() {
            info!("{}/{}: partitions assigned: {added:?}", self.topic.name, self.group);
        }

        // resume from the group's committed offsets
        self.positions = assigned
            .iter()
            .map(|p| (*p, group.committed.get(p).copied().unwrap_or(0)))
            .collect();
        self.assigned = assigned;
        self.generation = group.generation;
    }

    fn fetch(&mut self, max: usize) -> Vec<QueueMessage> {
        let mut batch = vec![];
        if self.assigned.is_empty() {
            return batch;
        }

        let log = lock(&self.topic.log);
        let count = self.assigned.len();

        for i in 0..count {
            if batch.len() >= max {
                break;
            }
            let partition = self.assigned[(self.cursor + i) % count];
            let partition_log = &log[partition as usize];
            let position = self.positions.entry(partition).or_insert(0);
            // anything below the base was committed by every group already
            *position = (*position).max(partition_log.base);

            while batch.len() < max {
                let Some(message) = partition_log.get(*position) else {
                    break;
                };
                batch.push(message.clone());
                *position += 1;
            }
        }

        self.cursor = (self.cursor + 1) % count;
        batch
    }
}

#[async_trait]
impl BatchConsumer for MemoryConsumer {
    fn topic(&self) -> &str {
        &self.topic.name
    }

    async fn poll_batch(&mut self, max: usize, wait: Duration) -> Result<Vec<QueueMessage>, QueueError> {
        let topic = self.topic.clone();
        // registered before the first fetch so a publish in between is not missed
        let notified = topic.notify.notified();

        self.sync_assignment();
        let batch = self.fetch(max);
        if !batch.is_empty() || max == 0 {
            return Ok(batch);
        }

        let _ = tokio::time::timeout(wait, notified).await;

        self.sync_assignment();
        Ok(self.fetch(max))
    }

    async fn commit(&mut self, messages: &[QueueMessage]) -> Result<(), QueueError> {
        let floors: Vec<(u32, u64)> = {
            let mut groups = lock(&self.topic.groups);
            let group = groups.entry(self.group.clone()).or_default();

            if group.generation != self.generation {
                // partitions moved since the batch was polled; the new owner redelivers
                debug!(
                    "{}/{}: dropping commit from stale generation {}",
                    self.topic.name, self.group, self.generation
                );
                return Ok(());
            }

            let mut touched = vec![];
            for message in messages {
                if !self.assigned.contains(&message.partition) {
                    continue;
                }
                let next = message.offset + 1;
                let committed = group.committed.entry(message.partition).or_insert(0);
                if next > *committed {
                    *committed = next;
                }
                if !touched.contains(&message.partition) {
                    touched.push(message.partition);
                }
            }

            touched
                .into_iter()
                .map(|p| (p, Topic::retention_floor(&groups, p)))
                .collect()
        };

        // groups lock released first; `lag` takes the log lock before the groups lock
        let mut log = lock(&self.topic.log);
        for (partition, floor) in floors {
            let trimmed = log[partition as usize].trim_to(floor);
            if trimmed > 0 {
                trace!("{}/{partition}: trimmed {trimmed} committed messages", self.topic.name);
            }
        }

        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        let mut groups = lock(&self.topic.groups);
        if let Some(group) = groups.get_mut(&self.group) {
            group.members.retain(|m| *m != self.member_id);
            group.generation += 1;
            debug!(
                "{} left group '{}' on '{}' ({} members remain)",
                self.member_id,
                self.group,
                self.topic.name,
                group.members.len()
            );
        }
    }
}
