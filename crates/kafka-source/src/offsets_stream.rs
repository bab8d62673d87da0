//! Tail of `__consumer_offsets` over an rdkafka [`StreamConsumer`].
//!
//! The consumer never joins a group: it assigns itself every partition of
//! the topic at the log end, so the monitor sees commits made after it
//! started and leaves no trace in the broker's group list.

use std::sync::Arc;

use lag_core::{BrokerError, RawRecord, RecordStream};
use offset_log::CONSUMER_OFFSETS_TOPIC;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use crate::config::KafkaConfig;
use crate::error::{Error, Result};

const SESSION: &str = "offsets";

pub struct OffsetsLogStream {
    config: KafkaConfig,
    consumer: Arc<StreamConsumer>,
    assigned: bool,
}

fn create_consumer(config: &KafkaConfig) -> Result<StreamConsumer> {
    Ok(config.client_config(SESSION)?.create()?)
}

impl OffsetsLogStream {
    /// Create the consumer. No connection is made until the first read.
    pub fn new(config: KafkaConfig) -> Result<Self> {
        let consumer = create_consumer(&config)?;
        Ok(Self {
            config,
            consumer: Arc::new(consumer),
            assigned: false,
        })
    }

    async fn partitions(&self) -> Result<Vec<i32>> {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.config.request_timeout;
        tokio::task::spawn_blocking(move || -> Result<Vec<i32>> {
            let metadata = consumer.fetch_metadata(Some(CONSUMER_OFFSETS_TOPIC), timeout)?;
            Ok(metadata
                .topics()
                .iter()
                .filter(|topic| topic.name() == CONSUMER_OFFSETS_TOPIC && topic.error().is_none())
                .flat_map(|topic| topic.partitions().iter().map(|p| p.id()))
                .collect())
        })
        .await?
    }

    async fn assign(&mut self) -> Result<()> {
        let partitions = self.partitions().await?;
        if partitions.is_empty() {
            return Err(Error::TopicNotFound(CONSUMER_OFFSETS_TOPIC.to_string()));
        }

        let mut assignment = TopicPartitionList::new();
        for partition in &partitions {
            assignment.add_partition_offset(CONSUMER_OFFSETS_TOPIC, *partition, Offset::End)?;
        }
        self.consumer.assign(&assignment)?;
        self.assigned = true;

        info!(
            "Assigned {} partitions of {CONSUMER_OFFSETS_TOPIC} at the log end",
            partitions.len()
        );
        Ok(())
    }

    async fn receive(&mut self) -> Result<RawRecord> {
        if !self.assigned {
            self.assign().await?;
        }
        loop {
            let message = self.consumer.recv().await?;
            match message.key() {
                Some(key) => {
                    return Ok(RawRecord {
                        key: key.to_vec(),
                        value: message.payload().map(<[u8]>::to_vec),
                    })
                }
                None => debug!(
                    "Skipping keyless message at {}/{}",
                    message.partition(),
                    message.offset()
                ),
            }
        }
    }
}

#[async_trait::async_trait]
impl RecordStream for OffsetsLogStream {
    async fn next_record(&mut self) -> std::result::Result<Option<RawRecord>, BrokerError> {
        Ok(Some(self.receive().await?))
    }

    fn mark_stale(&mut self) {
        self.assigned = false;
    }

    async fn reconnect(&mut self) -> std::result::Result<(), BrokerError> {
        if let Err(e) = self.consumer.unassign() {
            warn!("Failed to release {CONSUMER_OFFSETS_TOPIC} assignment: {e}");
        }
        self.consumer = Arc::new(create_consumer(&self.config)?);
        self.assigned = false;
        Ok(())
    }

    async fn close(&mut self) {
        if self.assigned {
            if let Err(e) = self.consumer.unassign() {
                warn!("Failed to release {CONSUMER_OFFSETS_TOPIC} assignment: {e}");
            }
            self.assigned = false;
        }
        info!("Closed {CONSUMER_OFFSETS_TOPIC} consumer");
    }
}
