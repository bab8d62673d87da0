//! Periodic lag reporting.
//!
//! Every cycle joins a snapshot of the offset table against freshly fetched
//! end offsets and publishes up to five independent sample families:
//!
//! | family           | path                                                   |
//! |------------------|--------------------------------------------------------|
//! | end offsets      | `topic.<t>.partition.<p>.end_offset`                   |
//! | consumer offsets | `group.<g>.topic.<t>.partition.<p>.consumer_offset`    |
//! | partition lag    | `group.<g>.topic.<t>.partition.<p>.lag`                |
//! | topic lag        | `group.<g>.topic.<t>.total.lag`                        |
//! | internal metrics | `monitor.<path>`                                       |
//!
//! The two datasets are sampled at different instants, so the lag families
//! skip whatever the end-offset map does not cover instead of failing.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::error::ReportError;
use crate::metrics::{
    MetricPath, MetricsRegistry, REPORT_CYCLES, REPORT_DURATION, REPORT_ERRORS, REPORT_SAMPLES,
};
use crate::sink::{MetricSample, MetricSink};
use crate::source::MetadataClient;
use crate::supervisor::Recovery;
use crate::table::{ConsumerOffsets, OffsetSnapshots, TopicEndOffsets};

/// Root segment of the monitor's own metrics.
pub const INTERNAL_METRICS_ROOT: &str = "monitor";

pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_WARMUP: Duration = Duration::from_secs(5);

/// Which consumer lag families to publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LagReport {
    None,
    Partition,
    Total,
    #[default]
    Both,
}

impl LagReport {
    pub fn partition(self) -> bool {
        matches!(self, LagReport::Partition | LagReport::Both)
    }

    pub fn total(self) -> bool {
        matches!(self, LagReport::Total | LagReport::Both)
    }

    pub fn any(self) -> bool {
        self != LagReport::None
    }
}

impl FromStr for LagReport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(LagReport::None),
            "partition" => Ok(LagReport::Partition),
            "total" => Ok(LagReport::Total),
            "both" => Ok(LagReport::Both),
            other => Err(format!(
                "Invalid consumer lag report '{other}'. Expected one of: none, partition, total, both"
            )),
        }
    }
}

impl fmt::Display for LagReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LagReport::None => "none",
            LagReport::Partition => "partition",
            LagReport::Total => "total",
            LagReport::Both => "both",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ReportOptions {
    pub end_offsets: bool,
    pub consumer_offsets: bool,
    pub consumer_lag: LagReport,
    pub internal_metrics: bool,
    /// Pause between the end of one cycle and the start of the next.
    pub interval: Duration,
    /// Delay before the first cycle, giving ingestion time to catch up.
    /// Only applies when consumer data is reported.
    pub warmup: Duration,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            end_offsets: false,
            consumer_offsets: false,
            consumer_lag: LagReport::Both,
            internal_metrics: false,
            interval: DEFAULT_REPORT_INTERVAL,
            warmup: DEFAULT_WARMUP,
        }
    }
}

impl ReportOptions {
    fn needs_consumer_offsets(&self) -> bool {
        self.consumer_offsets || self.consumer_lag.any()
    }

    fn needs_end_offsets(&self) -> bool {
        self.end_offsets || self.consumer_lag.any()
    }
}

/// Every committed partition as `(group, topic, partition, offset)`.
fn committed_partitions(
    offsets: &ConsumerOffsets,
) -> impl Iterator<Item = (&str, &str, i32, i64)> + '_ {
    offsets.iter().flat_map(|(group, topics)| {
        topics.iter().flat_map(move |(topic, partitions)| {
            partitions
                .iter()
                .map(move |(partition, offset)| (group.as_str(), topic.as_str(), *partition, *offset))
        })
    })
}

pub fn end_offset_samples(
    timestamp: DateTime<Utc>,
    end_offsets: &TopicEndOffsets,
) -> Vec<MetricSample> {
    end_offsets
        .iter()
        .flat_map(|(topic, partitions)| {
            partitions.iter().map(move |(partition, end_offset)| {
                MetricSample::new(
                    timestamp,
                    [
                        "topic",
                        topic.as_str(),
                        "partition",
                        &partition.to_string(),
                        "end_offset",
                    ],
                    *end_offset,
                )
            })
        })
        .collect()
}

pub fn consumer_offset_samples(
    timestamp: DateTime<Utc>,
    offsets: &ConsumerOffsets,
) -> Vec<MetricSample> {
    committed_partitions(offsets)
        .map(|(group, topic, partition, offset)| {
            MetricSample::new(
                timestamp,
                [
                    "group",
                    group,
                    "topic",
                    topic,
                    "partition",
                    &partition.to_string(),
                    "consumer_offset",
                ],
                offset,
            )
        })
        .collect()
}

/// `end_offset - offset` for every committed partition the end-offset map
/// knows about.
pub fn partition_lag_samples(
    timestamp: DateTime<Utc>,
    offsets: &ConsumerOffsets,
    end_offsets: &TopicEndOffsets,
) -> Vec<MetricSample> {
    committed_partitions(offsets)
        .filter_map(|(group, topic, partition, offset)| {
            let end_offset = end_offsets.get(topic)?.get(&partition)?;
            let Some(lag) = end_offset.checked_sub(offset) else {
                warn!(
                    "Skipping lag of {group}/{topic}/{partition}: end offset {end_offset} \
                     minus committed offset {offset} overflows"
                );
                return None;
            };
            Some(MetricSample::new(
                timestamp,
                [
                    "group",
                    group,
                    "topic",
                    topic,
                    "partition",
                    &partition.to_string(),
                    "lag",
                ],
                lag,
            ))
        })
        .collect()
}

/// Summed end offsets minus summed committed offsets, per group and topic.
///
/// The consumer side sums every partition it holds even when the end-offset
/// map covers only some of them.
pub fn topic_lag_samples(
    timestamp: DateTime<Utc>,
    offsets: &ConsumerOffsets,
    end_offsets: &TopicEndOffsets,
) -> Vec<MetricSample> {
    let mut samples = Vec::new();
    for (group, topics) in offsets {
        for (topic, partitions) in topics {
            let end_total = match end_offsets.get(topic) {
                Some(ends) if !ends.is_empty() => checked_sum(ends.values()),
                _ => continue,
            };
            let consumer_total = checked_sum(partitions.values());
            let lag = end_total
                .zip(consumer_total)
                .and_then(|(end_total, consumer_total)| end_total.checked_sub(consumer_total));
            let Some(lag) = lag else {
                warn!("Skipping total lag of {group}/{topic}: offset sums overflow");
                continue;
            };
            samples.push(MetricSample::new(
                timestamp,
                ["group", group.as_str(), "topic", topic.as_str(), "total", "lag"],
                lag,
            ));
        }
    }
    samples
}

fn checked_sum<'a>(offsets: impl IntoIterator<Item = &'a i64>) -> Option<i64> {
    offsets
        .into_iter()
        .try_fold(0i64, |total, offset| total.checked_add(*offset))
}

pub fn internal_metric_samples(
    timestamp: DateTime<Utc>,
    readings: &BTreeMap<MetricPath, i64>,
) -> Vec<MetricSample> {
    readings
        .iter()
        .map(|(path, value)| {
            let path = std::iter::once(INTERNAL_METRICS_ROOT).chain(path.iter().map(String::as_str));
            MetricSample::new(timestamp, path, *value)
        })
        .collect()
}

/// Periodically publishes offsets and lag.
///
/// Owns its own metadata session; the offset table is only ever read through
/// snapshots.
pub struct LagReporter<C, K> {
    client: C,
    sink: K,
    offsets: OffsetSnapshots,
    metrics: MetricsRegistry,
    options: ReportOptions,
}

impl<C: MetadataClient, K: MetricSink> LagReporter<C, K> {
    pub fn new(
        client: C,
        sink: K,
        offsets: OffsetSnapshots,
        metrics: MetricsRegistry,
        options: ReportOptions,
    ) -> Self {
        Self {
            client,
            sink,
            offsets,
            metrics,
            options,
        }
    }

    /// Topics to fetch end offsets for: every topic when end offsets are
    /// published, otherwise only the ones consumers committed to.
    async fn end_offsets(
        &mut self,
        consumer_offsets: &ConsumerOffsets,
    ) -> Result<TopicEndOffsets, ReportError> {
        let topics: BTreeSet<String> = if self.options.end_offsets {
            self.client.list_topics().await?
        } else {
            consumer_offsets
                .values()
                .flat_map(|topics| topics.keys().cloned())
                .collect()
        };
        if topics.is_empty() {
            return Ok(TopicEndOffsets::new());
        }
        Ok(self.client.end_offsets(&topics).await?)
    }

    fn build_samples(
        &self,
        timestamp: DateTime<Utc>,
        consumer_offsets: &ConsumerOffsets,
        end_offsets: &TopicEndOffsets,
    ) -> Vec<MetricSample> {
        let options = &self.options;
        let mut samples = Vec::new();
        if options.end_offsets {
            samples.extend(end_offset_samples(timestamp, end_offsets));
        }
        if options.consumer_offsets {
            samples.extend(consumer_offset_samples(timestamp, consumer_offsets));
        }
        if options.consumer_lag.partition() {
            samples.extend(partition_lag_samples(timestamp, consumer_offsets, end_offsets));
        }
        if options.consumer_lag.total() {
            samples.extend(topic_lag_samples(timestamp, consumer_offsets, end_offsets));
        }
        if options.internal_metrics {
            samples.extend(internal_metric_samples(timestamp, &self.metrics.collect()));
        }
        samples
    }

    /// Run one cycle and return the number of published samples.
    pub async fn report(&mut self) -> Result<usize, ReportError> {
        let _timer = self.metrics.start_timer(REPORT_DURATION);
        let timestamp = Utc::now();

        let consumer_offsets = if self.options.needs_consumer_offsets() {
            self.offsets.snapshot()
        } else {
            ConsumerOffsets::new()
        };
        let end_offsets = if self.options.needs_end_offsets() {
            self.end_offsets(&consumer_offsets).await?
        } else {
            TopicEndOffsets::new()
        };

        let samples = self.build_samples(timestamp, &consumer_offsets, &end_offsets);
        for sample in &samples {
            debug!("{} = {}", sample.name(), sample.value);
            self.sink.publish(sample).await?;
            self.metrics.increment(REPORT_SAMPLES);
        }
        self.sink.flush().await?;
        self.metrics.increment(REPORT_CYCLES);
        Ok(samples.len())
    }

    async fn recover(&mut self, recovery: Recovery) {
        match recovery {
            Recovery::None => {}
            Recovery::MarkStale => {
                info!("Marking topic metadata as stale");
                self.client.mark_stale();
            }
            Recovery::Reconnect => {
                info!("Reconnecting metadata client");
                if let Err(e) = self.client.reconnect().await {
                    warn!("Failed to reconnect metadata client: {e}");
                }
            }
        }
    }

    /// Report every `interval` until `shutdown` fires.
    ///
    /// A failed cycle is logged and counted; the next one runs on schedule.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if self.options.needs_consumer_offsets() && !self.options.warmup.is_zero() {
            info!(
                "Waiting {:?} for consumer offsets to load before reporting",
                self.options.warmup
            );
            tokio::select! {
                _ = shutdown.recv() => return,
                _ = sleep(self.options.warmup) => {}
            }
        }

        info!("Starting lag reporter, interval {:?}", self.options.interval);
        loop {
            let result = tokio::select! {
                _ = shutdown.recv() => break,
                result = self.report() => result,
            };
            match result {
                Ok(count) => debug!("Published {count} samples"),
                Err(e) => {
                    error!("Error in reporter cycle: {e}");
                    self.metrics.increment(REPORT_ERRORS);
                    if let ReportError::Broker(err) = &e {
                        let recovery = Recovery::for_error(err);
                        self.recover(recovery).await;
                    }
                }
            }

            tokio::select! {
                _ = shutdown.recv() => break,
                _ = sleep(self.options.interval) => {}
            }
        }
        info!("Lag reporter stopped");
    }
}
