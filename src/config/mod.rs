//! Command-line configuration.

mod duration;

use std::time::Duration;

use clap::Parser;
use lag_core::{IngestOptions, LagReport, ReportOptions};
use lag_monitor_kafka_source::KafkaConfig;

pub use duration::parse_duration;

#[derive(Debug, Clone, Parser)]
#[command(name = "kafka-lag-monitor")]
#[command(about = "Publishes Kafka consumer group offsets and lag to Graphite")]
#[command(long_about = None)]
pub struct Config {
    /// Kafka brokers (comma-separated or multiple --brokers)
    #[arg(long, value_delimiter = ',', required = true, env = "KAFKA_BROKERS")]
    pub brokers: Vec<String>,

    /// Client identifier reported to the brokers
    #[arg(long, default_value = "kafka-lag-monitor", env = "KAFKA_CLIENT_ID")]
    pub client_id: String,

    /// Time between report cycles (e.g. "30s", "1m")
    #[arg(long, default_value = "30s", value_parser = parse_duration)]
    pub interval: Duration,

    /// Graphite server as host[:port], port defaults to 2003
    #[arg(long, env = "GRAPHITE_SERVER")]
    pub graphite: Option<String>,

    /// Prefix prepended to every metric name
    #[arg(long, env = "METRIC_PREFIX")]
    pub metric_prefix: Option<String>,

    /// Report the end offset of every topic partition
    #[arg(long)]
    pub report_end_offsets: bool,

    /// Report the committed offset of every consumer group partition
    #[arg(long)]
    pub report_consumer_offsets: bool,

    /// Consumer lag to report: none, partition, total or both
    #[arg(long, default_value = "both")]
    pub report_consumer_lag: LagReport,

    /// Report the monitor's own counters and timers under "monitor."
    #[arg(long)]
    pub report_internal_metrics: bool,

    /// Pause after an ingestion failure before retrying
    #[arg(long, default_value = "15s", value_parser = parse_duration)]
    pub error_backoff: Duration,

    /// Delay before the first report while consumer offsets load
    #[arg(long, default_value = "5s", value_parser = parse_duration)]
    pub warmup: Duration,

    /// Timeout of broker metadata and watermark requests
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    pub request_timeout: Duration,

    /// Also report topics whose names start with "__"
    #[arg(long)]
    pub include_internal_topics: bool,

    /// Print samples to stdout instead of sending them to Graphite
    #[arg(long)]
    pub dry_run: bool,
}

impl Config {
    pub fn kafka_config(&self) -> KafkaConfig {
        KafkaConfig {
            brokers: self.brokers.clone(),
            client_id: self.client_id.clone(),
            request_timeout: self.request_timeout,
            include_internal_topics: self.include_internal_topics,
            ..Default::default()
        }
    }

    pub fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            error_backoff: self.error_backoff,
        }
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            end_offsets: self.report_end_offsets,
            consumer_offsets: self.report_consumer_offsets,
            consumer_lag: self.report_consumer_lag,
            internal_metrics: self.report_internal_metrics,
            interval: self.interval,
            warmup: self.warmup,
        }
    }

    /// Whether any sample family is enabled.
    pub fn reports_anything(&self) -> bool {
        self.report_end_offsets
            || self.report_consumer_offsets
            || self.report_consumer_lag != LagReport::None
            || self.report_internal_metrics
    }
}
