#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use split_coordinator::checkpoint::CheckpointState;
use split_coordinator::coordinator::{Coordinator, CoordinatorConfig, CoordinatorHandle};
use split_coordinator::discovery::{BrokerClient, DiscoveryScanner};
use split_coordinator::error::{Error, Result};
use split_coordinator::materializer::SplitMaterializer;
use split_coordinator::offsets::{CommittedFallback, OffsetPolicy, OffsetsRetriever, PolicyResolver};
use split_coordinator::strategy::AllocationStrategy;
use split_coordinator::types::{Boundedness, Queue, SplitTag, WorkerCommand, WorkerId};

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
pub const POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const DISCOVERY_INTERVAL: Duration = Duration::from_millis(50);
pub const BROKER: &str = "broker-a";
pub const GROUP: &str = "test-group";

pub fn queue(topic: &str, id: u32) -> Queue {
    Queue::new(topic, BROKER, id)
}

pub async fn wait_for_condition<F, Fut>(timeout: Duration, interval: Duration, f: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = std::time::Instant::now();
    while start.elapsed() < timeout {
        if f().await {
            return;
        }
        tokio::time::sleep(interval).await;
    }
    panic!("condition not met within {timeout:?}");
}

// ── Mock broker ─────────────────────────────────────────────────

/// In-memory broker: topic routes can be changed while the coordinator runs.
/// Every queue starts at offset `queue_id * 10`; nothing is committed.
///
/// Route lookups can be held at a gate to simulate a slow broker; each
/// permit added to the gate lets one lookup through.
#[derive(Default)]
pub struct MockBroker {
    routes: Mutex<BTreeMap<String, BTreeSet<u32>>>,
    failing_topics: Mutex<BTreeSet<String>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    fetches: AtomicUsize,
    active_fetches: AtomicUsize,
    max_active_fetches: AtomicUsize,
    pub close_calls: Mutex<u32>,
}

impl MockBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_topic(&self, topic: &str, ids: &[u32]) {
        self.routes
            .lock()
            .await
            .insert(topic.to_string(), ids.iter().copied().collect());
    }

    pub async fn fail_topic(&self, topic: &str, failing: bool) {
        let mut failing_topics = self.failing_topics.lock().await;
        if failing {
            failing_topics.insert(topic.to_string());
        } else {
            failing_topics.remove(topic);
        }
    }

    /// Block every route lookup from now on until a permit is added to the
    /// returned gate.
    pub async fn hold_fetches(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.gate.lock().await = Some(Arc::clone(&gate));
        gate
    }

    /// Route lookups started so far, including ones still waiting.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Highest number of route lookups seen in progress at once.
    pub fn max_concurrent_fetches(&self) -> usize {
        self.max_active_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    async fn fetch_queues(&self, topic: &str) -> Result<BTreeSet<Queue>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let active = self.active_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_fetches.fetch_max(active, Ordering::SeqCst);

        let gate = self.gate.lock().await.clone();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.active_fetches.fetch_sub(1, Ordering::SeqCst);

        if self.failing_topics.lock().await.contains(topic) {
            return Err(Error::Discovery {
                topic: topic.to_string(),
                reason: "route lookup timed out".to_string(),
            });
        }
        Ok(self
            .routes
            .lock()
            .await
            .get(topic)
            .map(|ids| ids.iter().map(|id| queue(topic, *id)).collect())
            .unwrap_or_default())
    }

    async fn close(&self) -> Result<()> {
        *self.close_calls.lock().await += 1;
        Ok(())
    }
}

#[async_trait]
impl OffsetsRetriever for MockBroker {
    async fn min_offset(&self, queue: &Queue) -> Result<i64> {
        Ok(i64::from(queue.queue_id) * 10)
    }

    async fn max_offset(&self, queue: &Queue) -> Result<i64> {
        Ok(i64::from(queue.queue_id) * 10 + 1000)
    }

    async fn committed_offset(&self, _group: &str, _queue: &Queue) -> Result<Option<i64>> {
        Ok(None)
    }

    async fn offset_for_timestamp(&self, queue: &Queue, _timestamp_ms: i64) -> Result<i64> {
        self.min_offset(queue).await
    }
}

/// Strategy that always fails.
pub struct BrokenStrategy;

impl AllocationStrategy for BrokenStrategy {
    fn name(&self) -> &'static str {
        "broken"
    }

    fn allocate(
        &self,
        _queues: &BTreeSet<Queue>,
        _parallelism: u32,
    ) -> Result<BTreeMap<WorkerId, BTreeSet<Queue>>> {
        Err(Error::allocation("strategy exploded"))
    }
}

// ── Component builders ──────────────────────────────────────────

pub fn periodic_config(parallelism: u32) -> CoordinatorConfig {
    CoordinatorConfig {
        consumer_group: GROUP.to_string(),
        parallelism,
        discovery_interval: Some(DISCOVERY_INTERVAL),
        boundedness: Boundedness::ContinuousUnbounded,
    }
}

pub fn one_shot_bounded_config(parallelism: u32) -> CoordinatorConfig {
    CoordinatorConfig {
        consumer_group: GROUP.to_string(),
        parallelism,
        discovery_interval: None,
        boundedness: Boundedness::Bounded,
    }
}

fn parts(broker: &Arc<MockBroker>, topics: &[&str]) -> (DiscoveryScanner, SplitMaterializer) {
    let client: Arc<dyn BrokerClient> = broker.clone();
    let retriever: Arc<dyn OffsetsRetriever> = broker.clone();
    let starting = PolicyResolver::new(
        OffsetPolicy::Committed {
            fallback: CommittedFallback::Earliest,
        },
        Arc::clone(&retriever),
        GROUP,
    );
    let stopping = PolicyResolver::new(OffsetPolicy::Unbounded, retriever, GROUP);
    (
        DiscoveryScanner::new(client, topics.iter().map(|t| t.to_string()).collect()),
        SplitMaterializer::new(Arc::new(starting), Arc::new(stopping)),
    )
}

pub fn build_coordinator(
    broker: &Arc<MockBroker>,
    topics: &[&str],
    config: CoordinatorConfig,
    strategy: Arc<dyn AllocationStrategy>,
) -> Coordinator {
    let (scanner, materializer) = parts(broker, topics);
    Coordinator::new(config, scanner, materializer, strategy)
}

pub fn start_coordinator(
    broker: &Arc<MockBroker>,
    topics: &[&str],
    config: CoordinatorConfig,
    strategy: Arc<dyn AllocationStrategy>,
    cancel: CancellationToken,
) -> (CoordinatorHandle, JoinHandle<Result<()>>) {
    build_coordinator(broker, topics, config, strategy).spawn(cancel.child_token())
}

pub fn restore_coordinator(
    broker: &Arc<MockBroker>,
    topics: &[&str],
    config: CoordinatorConfig,
    strategy: Arc<dyn AllocationStrategy>,
    state: CheckpointState,
    cancel: CancellationToken,
) -> (CoordinatorHandle, JoinHandle<Result<()>>) {
    let (scanner, materializer) = parts(broker, topics);
    Coordinator::restore(config, scanner, materializer, strategy, state)
        .expect("restore should succeed")
        .spawn(cancel.child_token())
}

// ── Mock worker ─────────────────────────────────────────────────

/// Records every command a worker receives. Cancelling `token` drops the
/// receiving side, as a crashed worker would.
pub struct WorkerHandles {
    pub worker: WorkerId,
    pub commands: Arc<Mutex<Vec<WorkerCommand>>>,
    pub token: CancellationToken,
}

impl WorkerHandles {
    /// Queues the worker holds after replaying every command in order.
    pub async fn owned(&self) -> BTreeSet<Queue> {
        let mut owned = BTreeSet::new();
        for command in self.commands.lock().await.iter() {
            if let WorkerCommand::AssignSplits(splits) = command {
                for split in splits {
                    match split.tag {
                        SplitTag::Assign => owned.insert(split.queue.clone()),
                        SplitTag::Revoke => owned.remove(&split.queue),
                    };
                }
            }
        }
        owned
    }

    pub async fn command_count(&self) -> usize {
        self.commands.lock().await.len()
    }

    pub async fn no_more_splits_count(&self) -> usize {
        self.commands
            .lock()
            .await
            .iter()
            .filter(|c| matches!(c, WorkerCommand::NoMoreSplits))
            .count()
    }

    /// Every (queue, tag) received, flattened in arrival order.
    pub async fn received(&self) -> Vec<(Queue, SplitTag)> {
        self.commands
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                WorkerCommand::AssignSplits(splits) => Some(splits.clone()),
                WorkerCommand::NoMoreSplits => None,
            })
            .flatten()
            .map(|s| (s.queue, s.tag))
            .collect()
    }
}

pub fn start_worker(
    handle: &CoordinatorHandle,
    worker: WorkerId,
    cancel: CancellationToken,
) -> WorkerHandles {
    let (tx, mut rx) = mpsc::unbounded_channel();
    handle
        .add_worker(worker, tx)
        .expect("coordinator should be running");

    let commands = Arc::new(Mutex::new(Vec::new()));
    let token = cancel.child_token();
    {
        let commands = Arc::clone(&commands);
        let token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    command = rx.recv() => match command {
                        Some(command) => commands.lock().await.push(command),
                        None => return,
                    },
                }
            }
        });
    }

    WorkerHandles {
        worker,
        commands,
        token,
    }
}

/// Wait until the coordinator's owned set equals `expected`.
pub async fn wait_for_owned(handle: &CoordinatorHandle, expected: BTreeSet<Queue>) {
    let handle = handle.clone();
    wait_for_condition(WAIT_TIMEOUT, POLL_INTERVAL, || {
        let handle = handle.clone();
        let expected = expected.clone();
        async move {
            handle
                .snapshot_state(0)
                .await
                .map(|state| state.owned_queues == expected)
                .unwrap_or(false)
        }
    })
    .await;
}
