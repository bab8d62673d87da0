use thiserror::Error;

/// Failures reported by the external broker client.
///
/// The variant decides how a loop recovers, see [`crate::supervisor::Recovery`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(String),

    /// The broker no longer knows the topic; the partition may have been reassigned.
    #[error("Topic not found (might have been reassigned): {0}")]
    TopicNotFound(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Broker client error: {0}")]
    Client(String),
}

/// Failures of the metric transport.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid metric destination: {0}")]
    InvalidDestination(String),
}

/// Failure of one report cycle.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("Failed to publish metrics: {0}")]
    Sink(#[from] SinkError),
}
