use std::sync::Arc;
use std::time::Duration;

use envconfig::Envconfig;

use crate::coordinator::CoordinatorConfig;
use crate::error::Result;
use crate::strategy::{self, AllocationStrategy};
use crate::types::Boundedness;

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // ── Broker ──────────────────────────────────────────────────────
    #[envconfig(default = "split-coordinator")]
    pub consumer_group: String,

    /// `;`-separated list of topics to consume.
    #[envconfig(default = "")]
    pub topics: String,

    // ── Coordination ────────────────────────────────────────────────
    /// 0 disables periodic discovery: queues are discovered once.
    #[envconfig(default = "30000")]
    pub partition_discovery_interval_ms: u64,

    #[envconfig(default = "1")]
    pub parallelism: u32,

    #[envconfig(default = "false")]
    pub bounded: bool,

    /// `hash` or `average`.
    #[envconfig(default = "hash")]
    pub allocate_strategy: String,
}

impl Config {
    pub fn init_with_defaults() -> std::result::Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn topic_list(&self) -> Vec<String> {
        self.topics
            .split(';')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// `None` when discovery runs only once.
    pub fn discovery_interval(&self) -> Option<Duration> {
        (self.partition_discovery_interval_ms > 0)
            .then(|| Duration::from_millis(self.partition_discovery_interval_ms))
    }

    pub fn boundedness(&self) -> Boundedness {
        if self.bounded {
            Boundedness::Bounded
        } else {
            Boundedness::ContinuousUnbounded
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            consumer_group: self.consumer_group.clone(),
            parallelism: self.parallelism,
            discovery_interval: self.discovery_interval(),
            boundedness: self.boundedness(),
        }
    }

    /// The strategy named by `allocate_strategy`. Unknown names are an
    /// allocation error.
    pub fn allocation_strategy(&self) -> Result<Arc<dyn AllocationStrategy>> {
        strategy::from_name(&self.allocate_strategy)
    }
}
