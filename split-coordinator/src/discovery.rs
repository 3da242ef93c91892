use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::metrics_consts::{DISCOVERED_QUEUES, DISCOVERY_SCANS, DISCOVERY_TOPIC_FAILURES};
use crate::types::Queue;

/// Connection to the broker cluster's routing metadata.
///
/// The wire protocol lives behind this trait; the coordinator only needs the
/// queue list per topic and a way to release the connection.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Current queues of `topic` across all brokers.
    async fn fetch_queues(&self, topic: &str) -> Result<BTreeSet<Queue>>;

    async fn close(&self) -> Result<()>;
}

/// Fetches the live queue set for the configured topics.
pub struct DiscoveryScanner {
    client: Arc<dyn BrokerClient>,
    topics: Vec<String>,
}

impl DiscoveryScanner {
    pub fn new(client: Arc<dyn BrokerClient>, topics: Vec<String>) -> Self {
        Self { client, topics }
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Union of the queues of every configured topic.
    ///
    /// Never fails as a whole: a topic whose lookup fails is logged and
    /// contributes nothing to this scan, and is retried on the next one.
    pub async fn discover(&self) -> BTreeSet<Queue> {
        let mut latest = BTreeSet::new();
        for topic in &self.topics {
            match self.client.fetch_queues(topic).await {
                Ok(queues) => latest.extend(queues),
                Err(e) => {
                    metrics::counter!(DISCOVERY_TOPIC_FAILURES).increment(1);
                    tracing::error!(topic = %topic, error = %e, "topic route lookup failed, skipping topic this scan");
                }
            }
        }

        metrics::counter!(DISCOVERY_SCANS).increment(1);
        metrics::gauge!(DISCOVERED_QUEUES).set(latest.len() as f64);
        latest
    }

    pub async fn close(&self) -> Result<()> {
        self.client.close().await
    }
}
