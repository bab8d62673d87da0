//! Last committed offset per consumer group, topic and partition.
//!
//! The [`OffsetTable`] has exactly one owner (the ingestion loop) and is the
//! only way to mutate the data. Other tasks hold an [`OffsetSnapshots`] handle,
//! which can only take deep copies. Every mutation and every copy runs under the
//! same lock, so a snapshot never observes a half-applied update.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// `partition -> offset`
pub type PartitionOffsets = BTreeMap<i32, i64>;

/// `topic -> partition -> offset`
pub type TopicOffsets = BTreeMap<String, PartitionOffsets>;

/// `group -> topic -> partition -> committed offset`
pub type ConsumerOffsets = BTreeMap<String, TopicOffsets>;

/// `topic -> partition -> end offset`, fetched fresh every report cycle.
pub type TopicEndOffsets = BTreeMap<String, PartitionOffsets>;

/// A single mutation of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableUpdate {
    /// Upsert the committed offset, last write wins.
    Commit {
        group: String,
        topic: String,
        partition: i32,
        offset: i64,
    },
    /// Remove the topic from every group, then drop groups left without topics.
    DeleteTopic { topic: String },
}

/// What an applied [`TableUpdate`] changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Committed { previous: Option<i64> },
    TopicRemoved { groups: usize },
}

type Shared = Arc<Mutex<ConsumerOffsets>>;

fn lock(data: &Shared) -> MutexGuard<'_, ConsumerOffsets> {
    // Updates are applied atomically, so the data is consistent even if a
    // holder panicked.
    data.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Writer side of the offset table. Deliberately not `Clone`.
#[derive(Debug, Default)]
pub struct OffsetTable {
    data: Shared,
}

impl OffsetTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one mutation atomically.
    pub fn apply(&self, update: TableUpdate) -> Applied {
        let mut data = lock(&self.data);
        match update {
            TableUpdate::Commit {
                group,
                topic,
                partition,
                offset,
            } => {
                let previous = data
                    .entry(group)
                    .or_default()
                    .entry(topic)
                    .or_default()
                    .insert(partition, offset);
                Applied::Committed { previous }
            }
            TableUpdate::DeleteTopic { topic } => {
                let mut groups = 0;
                data.retain(|_, topics| {
                    if topics.remove(&topic).is_some() {
                        groups += 1;
                    }
                    !topics.is_empty()
                });
                Applied::TopicRemoved { groups }
            }
        }
    }

    /// Deep copy of the current contents.
    pub fn snapshot(&self) -> ConsumerOffsets {
        lock(&self.data).clone()
    }

    /// A read-only handle for other tasks.
    pub fn reader(&self) -> OffsetSnapshots {
        OffsetSnapshots {
            data: Arc::clone(&self.data),
        }
    }
}

/// Read-only handle on an [`OffsetTable`].
#[derive(Debug, Clone)]
pub struct OffsetSnapshots {
    data: Shared,
}

impl OffsetSnapshots {
    /// Deep copy of the table; later updates do not affect it.
    pub fn snapshot(&self) -> ConsumerOffsets {
        lock(&self.data).clone()
    }
}
