use lag_core::BrokerError;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kafka error: {0}")]
    Kafka(#[from] KafkaError),

    #[error("Topic not found: {0}")]
    TopicNotFound(String),

    #[error("Broker request task failed: {0}")]
    Task(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::Task(err.to_string())
    }
}

/// Recovery class of a librdkafka error code.
fn classify(code: RDKafkaErrorCode, message: String) -> BrokerError {
    use RDKafkaErrorCode as C;

    match code {
        C::UnknownTopicOrPartition
        | C::UnknownTopic
        | C::UnknownPartition
        | C::LeaderNotAvailable
        | C::NotLeaderForPartition => BrokerError::TopicNotFound(message),
        C::BrokerTransportFailure
        | C::AllBrokersDown
        | C::Resolve
        | C::NetworkException
        | C::BrokerNotAvailable => BrokerError::Connection(message),
        C::OperationTimedOut | C::RequestTimedOut => BrokerError::Timeout(message),
        _ => BrokerError::Client(message),
    }
}

impl From<Error> for BrokerError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match &err {
            Error::Kafka(e) => match e.rdkafka_error_code() {
                Some(code) => classify(code, message),
                None => BrokerError::Client(message),
            },
            Error::TopicNotFound(_) => BrokerError::TopicNotFound(message),
            Error::Task(_) | Error::InvalidConfig(_) => BrokerError::Client(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_error(code: RDKafkaErrorCode) -> BrokerError {
        Error::Kafka(KafkaError::MetadataFetch(code)).into()
    }

    #[test]
    fn classifies_metadata_errors() {
        assert!(matches!(
            broker_error(RDKafkaErrorCode::UnknownTopicOrPartition),
            BrokerError::TopicNotFound(_)
        ));
        assert!(matches!(
            broker_error(RDKafkaErrorCode::NotLeaderForPartition),
            BrokerError::TopicNotFound(_)
        ));
        assert!(matches!(
            broker_error(RDKafkaErrorCode::AllBrokersDown),
            BrokerError::Connection(_)
        ));
        assert!(matches!(
            broker_error(RDKafkaErrorCode::BrokerTransportFailure),
            BrokerError::Connection(_)
        ));
        assert!(matches!(
            broker_error(RDKafkaErrorCode::OperationTimedOut),
            BrokerError::Timeout(_)
        ));
        assert!(matches!(
            broker_error(RDKafkaErrorCode::InvalidMessage),
            BrokerError::Client(_)
        ));
    }

    #[test]
    fn errors_without_code_are_client_errors() {
        let err: BrokerError = Error::Kafka(KafkaError::ClientCreation("bad".into())).into();
        assert!(matches!(err, BrokerError::Client(_)));
    }

    #[test]
    fn missing_topic_keeps_its_name() {
        let err: BrokerError = Error::TopicNotFound("__consumer_offsets".into()).into();
        assert_eq!(
            err,
            BrokerError::TopicNotFound("Topic not found: __consumer_offsets".into())
        );
    }
}
