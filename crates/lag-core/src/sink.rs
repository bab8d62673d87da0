//! Metric samples and the transport they are handed to.

use chrono::{DateTime, Utc};

use crate::error::SinkError;

/// Path delimiter of the line-oriented transports.
pub const PATH_DELIMITER: char = '.';

/// Substitute for [`PATH_DELIMITER`] inside a single segment.
pub const DELIMITER_SUBSTITUTE: &str = "_";

/// One reading, ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricSample {
    pub path: Vec<String>,
    pub value: i64,
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    /// Build a sample, substituting the path delimiter inside each segment
    /// so that topic names such as `orders.v2` stay a single path node.
    pub fn new<I, S>(timestamp: DateTime<Utc>, path: I, value: i64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        let path = path
            .into_iter()
            .map(|segment| segment.to_string().replace(PATH_DELIMITER, DELIMITER_SUBSTITUTE))
            .collect();
        Self {
            path,
            value,
            timestamp,
        }
    }

    /// Segments joined by the delimiter.
    pub fn name(&self) -> String {
        self.path.join(&PATH_DELIMITER.to_string())
    }

    /// Timestamp in whole seconds since the epoch.
    pub fn epoch_seconds(&self) -> i64 {
        self.timestamp.timestamp()
    }
}

/// Receives samples produced by the reporter and owns their wire encoding.
#[async_trait::async_trait]
pub trait MetricSink: Send {
    async fn publish(&mut self, sample: &MetricSample) -> Result<(), SinkError>;

    /// Push out anything buffered; called once at the end of every report cycle.
    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}
