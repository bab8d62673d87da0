//! Consumer offset tracking and lag computation for kafka-lag-monitor
//!
//! # Architecture
//!
//! Two independent tasks share nothing but an offset table and a metrics
//! registry:
//! - The ingestion loop (`OffsetIngestor`) tails `__consumer_offsets` through a
//!   `RecordStream`, decodes each record and applies it to the `OffsetTable`
//! - The reporter (`LagReporter`) periodically snapshots the table, fetches end
//!   offsets through its own `MetadataClient` session and publishes samples to a
//!   `MetricSink`
//!
//! Both loops recover from broker failures via the `supervisor` state machine
//! and stop on a broadcast shutdown signal.
//!
//! The broker client and the metric transport are traits; `testing` provides
//! in-memory implementations of both.

mod error;
pub mod ingest;
pub mod metrics;
pub mod report;
pub mod sink;
pub mod source;
pub mod supervisor;
pub mod table;
pub mod testing;

// Re-export error types
pub use error::{BrokerError, ReportError, SinkError};

// Re-export the ingestion loop
pub use ingest::{IngestOptions, IngestionHandle, OffsetIngestor, RecordOutcome};

// Re-export the reporter
pub use report::{LagReport, LagReporter, ReportOptions};

// Re-export shared state
pub use metrics::{MetricsRegistry, TimerStats};
pub use table::{ConsumerOffsets, OffsetSnapshots, OffsetTable, TableUpdate, TopicEndOffsets};

// Re-export collaborator interfaces
pub use sink::{MetricSample, MetricSink};
pub use source::{MetadataClient, RawRecord, RecordStream};
