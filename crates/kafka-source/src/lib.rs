//! Kafka broker adapters for kafka-lag-monitor.
//!
//! This crate provides the two broker sessions the monitor runs:
//! - [`OffsetsLogStream`] - tails `__consumer_offsets` for the ingestion loop
//! - [`EndOffsetsClient`] - lists topics and fetches high watermarks for the reporter
//!
//! Each owns its own rdkafka client. Errors are classified into
//! [`lag_core::BrokerError`] by librdkafka error code, which decides whether the
//! loop marks metadata stale, reconnects, or just retries.

pub mod config;
pub mod end_offsets;
pub mod error;
pub mod offsets_stream;

pub use config::KafkaConfig;
pub use end_offsets::EndOffsetsClient;
pub use error::{Error, Result};
pub use offsets_stream::OffsetsLogStream;
