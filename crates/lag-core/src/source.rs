//! Interfaces of the external broker client.
//!
//! The ingestion loop and the reporter each own their own client session;
//! neither trait requires `Sync` and no handle is ever shared between tasks.

use std::collections::BTreeSet;

use crate::error::BrokerError;
use crate::table::TopicEndOffsets;

/// A raw `__consumer_offsets` record. `value == None` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
}

/// Tail of the broker's offset-commit log.
#[async_trait::async_trait]
pub trait RecordStream: Send {
    /// Wait for the next record.
    ///
    /// `Ok(None)` ends the current batch; the caller re-enters immediately.
    /// Must be cancel-safe: shutdown drops a pending call.
    async fn next_record(&mut self) -> Result<Option<RawRecord>, BrokerError>;

    /// Force a metadata refresh before the next read.
    fn mark_stale(&mut self);

    /// Drop the current session and open a new one at the log tail.
    async fn reconnect(&mut self) -> Result<(), BrokerError>;

    /// Release the session. No calls follow.
    async fn close(&mut self);
}

/// Topic layout and end offsets.
#[async_trait::async_trait]
pub trait MetadataClient: Send {
    async fn list_topics(&mut self) -> Result<BTreeSet<String>, BrokerError>;

    /// End (high-water) offset of every partition of `topics`.
    async fn end_offsets(
        &mut self,
        topics: &BTreeSet<String>,
    ) -> Result<TopicEndOffsets, BrokerError>;

    /// Force a metadata refresh on the next request.
    fn mark_stale(&mut self);

    /// Drop the current session and open a new one.
    async fn reconnect(&mut self) -> Result<(), BrokerError>;
}
