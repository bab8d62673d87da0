//! Topic listing and high-watermark lookups over an rdkafka [`BaseConsumer`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use lag_core::{BrokerError, MetadataClient, TopicEndOffsets};
use rdkafka::consumer::{BaseConsumer, Consumer};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::{is_internal_topic, KafkaConfig};
use crate::error::Result;

const SESSION: &str = "metadata";

/// Age after which the cached topic layout is refreshed even without errors.
pub const LAYOUT_MAX_AGE: Duration = Duration::from_secs(60);

/// `topic -> partition ids`
type TopicLayout = BTreeMap<String, Vec<i32>>;

struct CachedLayout {
    topics: TopicLayout,
    fetched: Instant,
}

pub struct EndOffsetsClient {
    config: KafkaConfig,
    consumer: Arc<BaseConsumer>,
    layout: Option<CachedLayout>,
}

fn create_consumer(config: &KafkaConfig) -> Result<BaseConsumer> {
    Ok(config.client_config(SESSION)?.create()?)
}

impl EndOffsetsClient {
    pub fn new(config: KafkaConfig) -> Result<Self> {
        let consumer = create_consumer(&config)?;
        Ok(Self {
            config,
            consumer: Arc::new(consumer),
            layout: None,
        })
    }

    async fn fetch_layout(&self) -> Result<TopicLayout> {
        let consumer = Arc::clone(&self.consumer);
        let timeout = self.config.request_timeout;
        let include_internal = self.config.include_internal_topics;
        tokio::task::spawn_blocking(move || -> Result<TopicLayout> {
            let metadata = consumer.fetch_metadata(None, timeout)?;
            let mut layout = TopicLayout::new();
            for topic in metadata.topics() {
                if let Some(err) = topic.error() {
                    debug!("Skipping topic {} with metadata error {err:?}", topic.name());
                    continue;
                }
                if !include_internal && is_internal_topic(topic.name()) {
                    continue;
                }
                let partitions = topic.partitions().iter().map(|p| p.id()).collect();
                layout.insert(topic.name().to_string(), partitions);
            }
            Ok(layout)
        })
        .await?
    }

    async fn layout(&mut self) -> Result<&TopicLayout> {
        let cached = match self.layout.take() {
            Some(cached) if cached.fetched.elapsed() < LAYOUT_MAX_AGE => cached,
            _ => {
                let topics = self.fetch_layout().await?;
                debug!("Refreshed metadata for {} topics", topics.len());
                CachedLayout {
                    topics,
                    fetched: Instant::now(),
                }
            }
        };
        Ok(&self.layout.insert(cached).topics)
    }

    async fn fetch_end_offsets(&mut self, topics: &BTreeSet<String>) -> Result<TopicEndOffsets> {
        let requests: Vec<(String, Vec<i32>)> = {
            let layout = self.layout().await?;
            topics
                .iter()
                .filter_map(|topic| {
                    layout
                        .get(topic)
                        .map(|partitions| (topic.clone(), partitions.clone()))
                })
                .collect()
        };

        let consumer = Arc::clone(&self.consumer);
        let timeout = self.config.request_timeout;
        tokio::task::spawn_blocking(move || -> Result<TopicEndOffsets> {
            let mut end_offsets = TopicEndOffsets::new();
            for (topic, partitions) in requests {
                let entry = end_offsets.entry(topic.clone()).or_default();
                for partition in partitions {
                    let (_low, high) = consumer.fetch_watermarks(&topic, partition, timeout)?;
                    entry.insert(partition, high);
                }
            }
            Ok(end_offsets)
        })
        .await?
    }
}

#[async_trait::async_trait]
impl MetadataClient for EndOffsetsClient {
    async fn list_topics(&mut self) -> std::result::Result<BTreeSet<String>, BrokerError> {
        Ok(self.layout().await?.keys().cloned().collect())
    }

    async fn end_offsets(
        &mut self,
        topics: &BTreeSet<String>,
    ) -> std::result::Result<TopicEndOffsets, BrokerError> {
        Ok(self.fetch_end_offsets(topics).await?)
    }

    fn mark_stale(&mut self) {
        self.layout = None;
    }

    async fn reconnect(&mut self) -> std::result::Result<(), BrokerError> {
        info!("Recreating metadata client");
        self.consumer = Arc::new(create_consumer(&self.config)?);
        self.layout = None;
        Ok(())
    }
}
