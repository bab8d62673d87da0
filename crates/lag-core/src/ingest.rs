//! Ingestion loop: tails `__consumer_offsets` and maintains the offset table.

use std::time::Duration;

use anyhow::Context;
use offset_log::{
    decode_group_metadata, decode_key, decode_value, CommitKey, DecodeError, KeyRecord,
    CONSUMER_OFFSETS_TOPIC,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::BrokerError;
use crate::metrics::{
    MetricsRegistry, INGEST_COMMITS, INGEST_DECODE_ERRORS, INGEST_ERRORS, INGEST_GROUP_METADATA,
    INGEST_GROUP_METADATA_ERRORS, INGEST_MESSAGES, INGEST_RECOVERIES, INGEST_TOMBSTONES,
    INGEST_UNRECOGNIZED,
};
use crate::source::{RawRecord, RecordStream};
use crate::supervisor::{Recovery, SupervisorEvent, SupervisorState};
use crate::table::{Applied, OffsetSnapshots, OffsetTable, TableUpdate};

/// Default pause after a failed ingestion pass.
pub const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_secs(15);

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Pause after a failure before recovering and retrying.
    pub error_backoff: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }
}

/// Effect of a single record on the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Committed,
    TopicDeleted { groups: usize },
    GroupMetadata,
    Skipped,
}

/// Owns the offset table and the record stream feeding it.
pub struct OffsetIngestor<S> {
    stream: S,
    table: OffsetTable,
    metrics: MetricsRegistry,
    options: IngestOptions,
}

impl<S: RecordStream> OffsetIngestor<S> {
    /// Create the ingestor with an empty table.
    pub fn new(stream: S, metrics: MetricsRegistry, options: IngestOptions) -> Self {
        Self {
            stream,
            table: OffsetTable::new(),
            metrics,
            options,
        }
    }

    /// Read-only handle on the table for the reporter.
    pub fn offsets(&self) -> OffsetSnapshots {
        self.table.reader()
    }

    /// Decode one record and apply it to the table.
    ///
    /// Only commit keys change the table. A tombstone removes the whole topic
    /// from every group, whichever partition it was written for.
    pub fn process_record(&self, record: RawRecord) -> Result<RecordOutcome, DecodeError> {
        match decode_key(&record.key)? {
            KeyRecord::Commit(CommitKey {
                group,
                topic,
                partition,
            }) => match decode_value(record.value.as_deref())? {
                Some(value) => {
                    self.metrics.increment(INGEST_COMMITS);
                    self.table.apply(TableUpdate::Commit {
                        group,
                        topic,
                        partition,
                        offset: value.offset,
                    });
                    Ok(RecordOutcome::Committed)
                }
                None => {
                    self.metrics.increment(INGEST_TOMBSTONES);
                    debug!("Tombstone for {group}/{topic}/{partition}, removing topic {topic}");
                    let groups = match self.table.apply(TableUpdate::DeleteTopic { topic }) {
                        Applied::TopicRemoved { groups } => groups,
                        Applied::Committed { .. } => 0,
                    };
                    Ok(RecordOutcome::TopicDeleted { groups })
                }
            },
            KeyRecord::GroupMetadata(key) => {
                self.metrics.increment(INGEST_GROUP_METADATA);
                match decode_group_metadata(record.value.as_deref()) {
                    Ok(Some(metadata)) => debug!(
                        group = %key.group,
                        generation = metadata.generation,
                        members = metadata.members.len(),
                        "Group metadata"
                    ),
                    Ok(None) => debug!(group = %key.group, "Group metadata tombstone"),
                    Err(e) => {
                        self.metrics.increment(INGEST_GROUP_METADATA_ERRORS);
                        debug!(group = %key.group, "Ignoring undecodable group metadata: {e}");
                    }
                }
                Ok(RecordOutcome::GroupMetadata)
            }
            KeyRecord::Unrecognized { schema } => {
                self.metrics.increment(INGEST_UNRECOGNIZED);
                debug!("Skipping record with unknown key schema {schema}");
                Ok(RecordOutcome::Skipped)
            }
        }
    }

    /// Read and apply records until the stream ends its batch or fails.
    async fn consume(&mut self) -> Result<(), BrokerError> {
        while let Some(record) = self.stream.next_record().await? {
            self.metrics.increment(INGEST_MESSAGES);
            if let Err(e) = self.process_record(record) {
                self.metrics.increment(INGEST_DECODE_ERRORS);
                if e.is_unknown_schema() {
                    warn!("Skipping record in unknown format: {e}");
                } else {
                    warn!("Skipping malformed record: {e}");
                }
            }
        }
        Ok(())
    }

    async fn recover(&mut self, recovery: Recovery) -> Result<(), BrokerError> {
        match recovery {
            Recovery::None => Ok(()),
            Recovery::MarkStale => {
                info!("Marking {CONSUMER_OFFSETS_TOPIC} metadata as stale");
                self.stream.mark_stale();
                Ok(())
            }
            Recovery::Reconnect => {
                info!("Reconnecting to {CONSUMER_OFFSETS_TOPIC}");
                self.stream.reconnect().await
            }
        }
    }

    /// Run until `shutdown` fires, then close the stream.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!("Starting consumer offset ingestion from {CONSUMER_OFFSETS_TOPIC}");
        let mut state = SupervisorState::Running;

        loop {
            state = match state {
                SupervisorState::Running => {
                    let result = tokio::select! {
                        _ = shutdown.recv() => break,
                        result = self.consume() => result,
                    };
                    match result {
                        Ok(()) => {
                            debug!("Offset log batch completed");
                            state.next(SupervisorEvent::StreamEnded)
                        }
                        Err(e) => {
                            error!("Error in consumer offset ingestion: {e}");
                            self.metrics.increment(INGEST_ERRORS);
                            state.next(SupervisorEvent::Failed(&e))
                        }
                    }
                }
                SupervisorState::BackingOff(_) => {
                    info!(
                        "Retrying consumer offset ingestion in {:?}",
                        self.options.error_backoff
                    );
                    tokio::select! {
                        _ = shutdown.recv() => break,
                        _ = sleep(self.options.error_backoff) => {
                            state.next(SupervisorEvent::BackoffElapsed)
                        }
                    }
                }
                SupervisorState::Recovering(recovery) => {
                    let result = tokio::select! {
                        _ = shutdown.recv() => break,
                        result = self.recover(recovery) => result,
                    };
                    match result {
                        Ok(()) => {
                            self.metrics.increment(INGEST_RECOVERIES);
                            state.next(SupervisorEvent::Recovered)
                        }
                        Err(e) => {
                            error!("Failed to recover offset log stream: {e}");
                            self.metrics.increment(INGEST_ERRORS);
                            state.next(SupervisorEvent::RecoveryFailed(&e))
                        }
                    }
                }
            };
        }

        info!("Stopping consumer offset ingestion");
        self.stream.close().await;
    }
}

impl<S: RecordStream + 'static> OffsetIngestor<S> {
    /// Run the loop on its own task.
    pub fn spawn(self) -> IngestionHandle {
        let (shutdown, rx) = broadcast::channel(1);
        let offsets = self.offsets();
        let task = tokio::spawn(self.run(rx));
        IngestionHandle {
            offsets,
            shutdown,
            task: Some(task),
        }
    }
}

/// Handle on a spawned ingestion loop.
pub struct IngestionHandle {
    offsets: OffsetSnapshots,
    shutdown: broadcast::Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl IngestionHandle {
    pub fn offsets(&self) -> OffsetSnapshots {
        self.offsets.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Resolves once the loop exits without being asked to.
    ///
    /// Cancel safe. Returns immediately if the loop was already joined.
    pub async fn finished(&mut self) -> anyhow::Result<()> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let joined = task.await;
        self.task = None;
        joined.context("Consumer offset ingestion task failed")
    }

    /// Interrupt the pending read, close the stream and wait for the task.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        // Fails only if the loop already exited.
        let _ = self.shutdown.send(());
        if let Some(task) = self.task.take() {
            task.await
                .context("Consumer offset ingestion task failed")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{channel_stream, RecordInjector};
    use offset_log::testing::{encode_group_metadata_key, encode_offset_value, OffsetCommitFields};

    fn start() -> (IngestionHandle, RecordInjector, MetricsRegistry) {
        let (stream, injector) = channel_stream();
        let metrics = MetricsRegistry::new();
        let handle = OffsetIngestor::new(stream, metrics.clone(), IngestOptions::default()).spawn();
        (handle, injector, metrics)
    }

    #[tokio::test]
    async fn saves_last_offset() {
        let (handle, injector, _) = start();
        injector.wait_until_subscribed().await;

        injector.inject_commit("group1", "topic1", 0, 97);
        injector.inject_commit("group1", "topic1", 0, 99);
        injector.wait_until_processed().await;

        assert_eq!(handle.offsets().snapshot()["group1"]["topic1"][&0], 99);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn finished_stays_pending_while_running() {
        let (mut handle, injector, _) = start();
        injector.wait_until_subscribed().await;

        let waited = tokio::time::timeout(Duration::from_secs(60), handle.finished()).await;
        assert!(waited.is_err());
        assert!(!handle.is_finished());

        handle.shutdown().await.unwrap();
        assert!(injector.is_closed());
    }

    #[tokio::test]
    async fn removes_topic_for_tombstone() {
        let (handle, injector, metrics) = start();
        injector.wait_until_subscribed().await;

        injector.inject_commit("group1", "topic1", 0, 97);
        injector.inject_tombstone("group1", "topic1", 0);
        injector.wait_until_processed().await;

        assert!(handle.offsets().snapshot().get("group1").is_none());
        assert_eq!(metrics.counter(INGEST_TOMBSTONES), 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn handles_tombstone_for_unregistered_topic() {
        let (handle, injector, _) = start();
        injector.wait_until_subscribed().await;

        injector.inject_tombstone("group1", "topic1", 0);
        injector.wait_until_processed().await;

        assert!(handle.offsets().snapshot().is_empty());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_value_schema_is_counted_and_skipped() {
        let (handle, injector, metrics) = start();
        injector.wait_until_subscribed().await;

        let (key, _) = offset_log::testing::commit_record("g", "t", 0, 1);
        let future_value = encode_offset_value(
            4,
            &OffsetCommitFields {
                offset: 1_000_000,
                ..Default::default()
            },
        );
        injector.inject(key, Some(future_value));
        injector.inject_commit("g", "t", 1, 5);
        injector.wait_until_processed().await;

        let snapshot = handle.offsets().snapshot();
        assert_eq!(snapshot["g"]["t"].get(&0), None);
        assert_eq!(snapshot["g"]["t"][&1], 5);
        assert_eq!(metrics.counter(INGEST_DECODE_ERRORS), 1);
        assert_eq!(metrics.counter(INGEST_MESSAGES), 2);
        assert_eq!(metrics.counter(INGEST_ERRORS), 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn group_metadata_and_unknown_keys_leave_table_alone() {
        let (handle, injector, metrics) = start();
        injector.wait_until_subscribed().await;

        injector.inject(encode_group_metadata_key("g"), None);
        injector.inject(vec![0x00, 0x07, 0x01], Some(vec![0x00]));
        injector.wait_until_processed().await;

        assert!(handle.offsets().snapshot().is_empty());
        assert_eq!(metrics.counter(INGEST_GROUP_METADATA), 1);
        assert_eq!(metrics.counter(INGEST_UNRECOGNIZED), 1);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn connection_error_backs_off_then_reconnects() {
        let (handle, injector, metrics) = start();
        injector.wait_until_subscribed().await;

        let started = tokio::time::Instant::now();
        injector.inject_error(BrokerError::Connection("broker down".into()));
        injector.inject_commit("g", "t", 0, 42);
        injector.wait_until_processed().await;

        assert!(started.elapsed() >= DEFAULT_ERROR_BACKOFF);
        assert_eq!(injector.reconnects(), 1);
        assert_eq!(injector.stale_marks(), 0);
        assert_eq!(metrics.counter(INGEST_ERRORS), 1);
        assert_eq!(metrics.counter(INGEST_RECOVERIES), 1);
        assert_eq!(handle.offsets().snapshot()["g"]["t"][&0], 42);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn topic_not_found_marks_metadata_stale() {
        let (handle, injector, _) = start();
        injector.wait_until_subscribed().await;

        injector.inject_error(BrokerError::TopicNotFound(CONSUMER_OFFSETS_TOPIC.into()));
        injector.inject_commit("g", "t", 0, 1);
        injector.wait_until_processed().await;

        assert_eq!(injector.stale_marks(), 1);
        assert_eq!(injector.reconnects(), 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn end_of_batch_re_enters_without_backoff() {
        let (handle, injector, metrics) = start();
        injector.wait_until_subscribed().await;

        injector.end_batch();
        injector.inject_commit("g", "t", 0, 3);
        injector.wait_until_processed().await;

        assert_eq!(handle.offsets().snapshot()["g"]["t"][&0], 3);
        assert_eq!(metrics.counter(INGEST_ERRORS), 0);
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_interrupts_read_and_closes_stream() {
        let (handle, injector, _) = start();
        injector.wait_until_subscribed().await;
        assert!(!injector.is_closed());

        handle.shutdown().await.unwrap();
        assert!(injector.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_backoff() {
        let (handle, injector, _) = start();
        injector.wait_until_subscribed().await;
        injector.inject_error(BrokerError::Client("boom".into()));
        tokio::time::sleep(Duration::from_secs(1)).await;

        handle.shutdown().await.unwrap();
        assert!(injector.is_closed());
        assert_eq!(injector.reconnects(), 0);
    }

    #[test]
    fn process_record_reports_outcome() {
        let (stream, _injector) = channel_stream();
        let ingestor = OffsetIngestor::new(stream, MetricsRegistry::new(), IngestOptions::default());
        let (key, value) = offset_log::testing::commit_record("g", "t", 0, 10);

        assert_eq!(
            ingestor.process_record(RawRecord {
                key: key.clone(),
                value: Some(value)
            }),
            Ok(RecordOutcome::Committed)
        );
        assert_eq!(
            ingestor.process_record(RawRecord { key, value: None }),
            Ok(RecordOutcome::TopicDeleted { groups: 1 })
        );
        assert!(ingestor.process_record(RawRecord {
            key: vec![0x00],
            value: None
        })
        .is_err());
    }
}
