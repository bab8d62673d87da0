use std::time::Duration;

use rdkafka::config::ClientConfig;

use crate::error::{Error, Result};

/// Prefix of broker-internal topic names.
pub const INTERNAL_TOPIC_PREFIX: &str = "__";

/// Connection settings shared by both broker sessions.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Seed brokers, each `host:port`.
    pub brokers: Vec<String>,
    /// Client identifier reported to the brokers.
    pub client_id: String,
    /// Timeout of metadata and watermark requests.
    pub request_timeout: Duration,
    /// List topics whose names start with `__`.
    pub include_internal_topics: bool,
    /// Upper bound on how long a fetch waits for new commits.
    pub fetch_wait_max: Duration,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: vec!["localhost:9092".to_string()],
            client_id: "kafka-lag-monitor".to_string(),
            request_timeout: Duration::from_secs(10),
            include_internal_topics: false,
            fetch_wait_max: Duration::from_millis(100),
        }
    }
}

impl KafkaConfig {
    /// Base rdkafka settings; `session` tells the two sessions apart in
    /// broker logs.
    pub fn client_config(&self, session: &str) -> Result<ClientConfig> {
        if self.brokers.iter().all(|b| b.trim().is_empty()) {
            return Err(Error::InvalidConfig("no brokers configured".to_string()));
        }
        let brokers = self
            .brokers
            .iter()
            .map(|b| b.trim())
            .filter(|b| !b.is_empty())
            .collect::<Vec<_>>()
            .join(",");

        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", brokers)
            .set("client.id", format!("{}-{session}", self.client_id))
            .set("group.id", format!("{}-{session}", self.client_id))
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .set(
                "socket.timeout.ms",
                self.request_timeout.as_millis().to_string(),
            )
            .set("fetch.wait.max.ms", self.fetch_wait_max.as_millis().to_string());
        Ok(config)
    }
}

pub fn is_internal_topic(name: &str) -> bool {
    name.starts_with(INTERNAL_TOPIC_PREFIX)
}
