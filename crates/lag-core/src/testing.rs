//! In-memory broker and transport doubles for tests.
//!
//! - [`channel_stream`] - a [`RecordStream`] fed by a [`RecordInjector`]
//! - [`StaticMetadataClient`] - a [`MetadataClient`] serving fixed end offsets
//! - [`RecordingSink`] - a [`MetricSink`] that keeps every published sample

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use offset_log::testing::{commit_record, encode_commit_key};
use tokio::sync::mpsc;

use crate::error::{BrokerError, SinkError};
use crate::sink::{MetricSample, MetricSink};
use crate::source::{MetadataClient, RawRecord, RecordStream};
use crate::table::TopicEndOffsets;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

enum Injected {
    Record(RawRecord),
    Error(BrokerError),
    EndOfBatch,
}

#[derive(Debug, Default)]
struct StreamProbe {
    subscribed: AtomicBool,
    polls: AtomicUsize,
    injected: AtomicUsize,
    stale_marks: AtomicUsize,
    reconnects: AtomicUsize,
    closed: AtomicBool,
}

/// Create a connected stream/injector pair.
pub fn channel_stream() -> (ChannelRecordStream, RecordInjector) {
    let (tx, rx) = mpsc::unbounded_channel();
    let probe = Arc::new(StreamProbe::default());
    (
        ChannelRecordStream {
            rx,
            probe: Arc::clone(&probe),
        },
        RecordInjector { tx, probe },
    )
}

/// Record stream backed by an unbounded channel.
pub struct ChannelRecordStream {
    rx: mpsc::UnboundedReceiver<Injected>,
    probe: Arc<StreamProbe>,
}

#[async_trait::async_trait]
impl RecordStream for ChannelRecordStream {
    async fn next_record(&mut self) -> Result<Option<RawRecord>, BrokerError> {
        self.probe.subscribed.store(true, Ordering::SeqCst);
        self.probe.polls.fetch_add(1, Ordering::SeqCst);
        match self.rx.recv().await {
            Some(Injected::Record(record)) => Ok(Some(record)),
            Some(Injected::Error(err)) => Err(err),
            Some(Injected::EndOfBatch) => Ok(None),
            None => std::future::pending().await,
        }
    }

    fn mark_stale(&mut self) {
        self.probe.stale_marks.fetch_add(1, Ordering::SeqCst);
    }

    async fn reconnect(&mut self) -> Result<(), BrokerError> {
        self.probe.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
        self.rx.close();
    }
}

/// Test-side handle of a [`ChannelRecordStream`].
#[derive(Clone)]
pub struct RecordInjector {
    tx: mpsc::UnboundedSender<Injected>,
    probe: Arc<StreamProbe>,
}

impl RecordInjector {
    fn send(&self, item: Injected) {
        self.probe.injected.fetch_add(1, Ordering::SeqCst);
        // The receiver is gone only after close(); late injections are dropped.
        let _ = self.tx.send(item);
    }

    pub fn inject(&self, key: Vec<u8>, value: Option<Vec<u8>>) {
        self.send(Injected::Record(RawRecord { key, value }));
    }

    pub fn inject_commit(&self, group: &str, topic: &str, partition: i32, offset: i64) {
        let (key, value) = commit_record(group, topic, partition, offset);
        self.inject(key, Some(value));
    }

    pub fn inject_tombstone(&self, group: &str, topic: &str, partition: i32) {
        self.inject(encode_commit_key(0, group, topic, partition), None);
    }

    pub fn inject_error(&self, err: BrokerError) {
        self.send(Injected::Error(err));
    }

    pub fn end_batch(&self) {
        self.send(Injected::EndOfBatch);
    }

    /// Wait until the stream has been read from at least once.
    pub async fn wait_until_subscribed(&self) {
        while !self.probe.subscribed.load(Ordering::SeqCst) {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait until everything injected so far has been handled, i.e. the
    /// consumer came back for more after the last item.
    pub async fn wait_until_processed(&self) {
        loop {
            let injected = self.probe.injected.load(Ordering::SeqCst);
            if self.probe.polls.load(Ordering::SeqCst) > injected {
                return;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    pub fn stale_marks(&self) -> usize {
        self.probe.stale_marks.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.probe.reconnects.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.probe.closed.load(Ordering::SeqCst)
    }
}

/// Metadata client serving a fixed end-offset map.
///
/// Queued errors are returned, one per request, before any data.
#[derive(Clone, Default)]
pub struct StaticMetadataClient {
    end_offsets: Arc<Mutex<TopicEndOffsets>>,
    errors: Arc<Mutex<VecDeque<BrokerError>>>,
    stale_marks: Arc<AtomicUsize>,
    reconnects: Arc<AtomicUsize>,
}

impl StaticMetadataClient {
    pub fn new(end_offsets: TopicEndOffsets) -> Self {
        Self {
            end_offsets: Arc::new(Mutex::new(end_offsets)),
            ..Default::default()
        }
    }

    pub fn set_end_offsets(&self, end_offsets: TopicEndOffsets) {
        *self.end_offsets.lock().unwrap_or_else(PoisonError::into_inner) = end_offsets;
    }

    pub fn fail_next(&self, err: BrokerError) {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner).push_back(err);
    }

    pub fn stale_marks(&self) -> usize {
        self.stale_marks.load(Ordering::SeqCst)
    }

    pub fn reconnects(&self) -> usize {
        self.reconnects.load(Ordering::SeqCst)
    }

    fn take_error(&self) -> Result<(), BrokerError> {
        match self.errors.lock().unwrap_or_else(PoisonError::into_inner).pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl MetadataClient for StaticMetadataClient {
    async fn list_topics(&mut self) -> Result<BTreeSet<String>, BrokerError> {
        self.take_error()?;
        Ok(self.end_offsets.lock().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect())
    }

    async fn end_offsets(
        &mut self,
        topics: &BTreeSet<String>,
    ) -> Result<TopicEndOffsets, BrokerError> {
        self.take_error()?;
        let end_offsets = self.end_offsets.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(end_offsets
            .iter()
            .filter(|(topic, _)| topics.contains(*topic))
            .map(|(topic, partitions)| (topic.clone(), partitions.clone()))
            .collect())
    }

    fn mark_stale(&mut self) {
        self.stale_marks.fetch_add(1, Ordering::SeqCst);
    }

    async fn reconnect(&mut self) -> Result<(), BrokerError> {
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Sink that records samples; clones share the recording.
#[derive(Clone, Default)]
pub struct RecordingSink {
    samples: Arc<Mutex<Vec<MetricSample>>>,
    flushes: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<MetricSample> {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Latest value per dot-joined name.
    pub fn results(&self) -> BTreeMap<String, i64> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| (s.name(), s.value))
            .collect()
    }

    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.samples.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Make every subsequent publish fail with a broken pipe.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl MetricSink for RecordingSink {
    async fn publish(&mut self, sample: &MetricSample) -> Result<(), SinkError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "recording sink set to fail",
            )));
        }
        self.samples.lock().unwrap_or_else(PoisonError::into_inner).push(sample.clone());
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
