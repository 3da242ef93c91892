use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::checkpoint::CheckpointState;
use crate::discovery::DiscoveryScanner;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::materializer::SplitMaterializer;
use crate::reconciler::{Assignment, AssignmentReconciler};
use crate::strategy::AllocationStrategy;
use crate::topology;
use crate::types::{
    Boundedness, Queue, QueueChange, Split, SplitChange, WorkerCommand, WorkerId,
    UNRESOLVED_OFFSET,
};

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub consumer_group: String,
    /// Number of workers; ids run `0..parallelism`.
    pub parallelism: u32,
    /// `None` runs discovery once at startup and never again.
    pub discovery_interval: Option<Duration>,
    pub boundedness: Boundedness,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            consumer_group: "split-coordinator".to_string(),
            parallelism: 1,
            discovery_interval: Some(Duration::from_secs(30)),
            boundedness: Boundedness::ContinuousUnbounded,
        }
    }
}

impl CoordinatorConfig {
    fn one_shot(&self) -> bool {
        self.discovery_interval.is_none()
    }

    fn signals_no_more_splits(&self) -> bool {
        self.one_shot() && self.boundedness == Boundedness::Bounded
    }
}

enum CoordinatorEvent {
    WorkerJoined {
        worker: WorkerId,
        commands: mpsc::UnboundedSender<WorkerCommand>,
    },
    WorkerLeft {
        worker: WorkerId,
    },
    SplitsReturned {
        worker: WorkerId,
        splits: Vec<Split>,
    },
    Snapshot {
        checkpoint_id: u64,
        reply: oneshot::Sender<CheckpointState>,
    },
    Close,
}

/// Output of the off-loop half of a discovery cycle.
enum CycleStep {
    Discovered(BTreeSet<Queue>),
    Materialized(SplitChange),
}

/// Cloneable entry point into a running coordinator.
///
/// Every call fails with [`Error::CoordinatorStopped`] once the loop has
/// exited.
#[derive(Clone)]
pub struct CoordinatorHandle {
    events: mpsc::UnboundedSender<CoordinatorEvent>,
}

impl CoordinatorHandle {
    /// Register `worker`; its pending splits are pushed to `commands`.
    pub fn add_worker(
        &self,
        worker: WorkerId,
        commands: mpsc::UnboundedSender<WorkerCommand>,
    ) -> Result<()> {
        self.send(CoordinatorEvent::WorkerJoined { worker, commands })
    }

    pub fn remove_worker(&self, worker: WorkerId) -> Result<()> {
        self.send(CoordinatorEvent::WorkerLeft { worker })
    }

    /// Hand back splits `worker` lost, e.g. after a failure.
    pub fn splits_returned(&self, worker: WorkerId, splits: Vec<Split>) -> Result<()> {
        self.send(CoordinatorEvent::SplitsReturned { worker, splits })
    }

    pub async fn snapshot_state(&self, checkpoint_id: u64) -> Result<CheckpointState> {
        let (reply, rx) = oneshot::channel();
        self.send(CoordinatorEvent::Snapshot {
            checkpoint_id,
            reply,
        })?;
        rx.await.map_err(|_| Error::CoordinatorStopped)
    }

    /// Ask the loop to stop. Await the join handle for the final result.
    pub fn close(&self) -> Result<()> {
        self.send(CoordinatorEvent::Close)
    }

    fn send(&self, event: CoordinatorEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| Error::CoordinatorStopped)
    }
}

/// Owns all assignment state. Either driven directly through its methods, or
/// moved onto its own task with [`Coordinator::spawn`].
pub struct Coordinator {
    config: CoordinatorConfig,
    scanner: Arc<DiscoveryScanner>,
    materializer: Arc<SplitMaterializer>,
    strategy: Arc<dyn AllocationStrategy>,
    reconciler: AssignmentReconciler,
    dispatcher: Dispatcher,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        scanner: DiscoveryScanner,
        materializer: SplitMaterializer,
        strategy: Arc<dyn AllocationStrategy>,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.signals_no_more_splits());
        Self {
            config,
            scanner: Arc::new(scanner),
            materializer: Arc::new(materializer),
            strategy,
            reconciler: AssignmentReconciler::new(),
            dispatcher,
        }
    }

    /// Rebuild from a checkpoint.
    ///
    /// Recorded owners become the baseline as they are. Queues without a
    /// recorded owner are held: they count as owned, and the first
    /// reconciliation that places them takes its target worker as the owner
    /// without sending anything. Queues recorded on a worker outside
    /// `0..parallelism` are dropped and rediscovered as new.
    pub fn restore(
        config: CoordinatorConfig,
        scanner: DiscoveryScanner,
        materializer: SplitMaterializer,
        strategy: Arc<dyn AllocationStrategy>,
        state: CheckpointState,
    ) -> Result<Self> {
        if config.parallelism == 0 {
            return Err(Error::allocation("parallelism must be at least 1"));
        }

        let (owned, orphaned): (BTreeMap<Queue, WorkerId>, BTreeMap<Queue, WorkerId>) = state
            .owner_map()
            .into_iter()
            .partition(|(_, worker)| *worker < config.parallelism);
        for (queue, worker) in &orphaned {
            tracing::warn!(
                queue = %queue,
                worker,
                parallelism = config.parallelism,
                "checkpointed owner out of range, queue will be reassigned"
            );
        }
        let held: BTreeSet<Queue> = state
            .owned_queues
            .iter()
            .filter(|q| !owned.contains_key(*q) && !orphaned.contains_key(*q))
            .cloned()
            .collect();

        let mut baseline = Assignment::new();
        for (queue, worker) in &owned {
            baseline.entry(*worker).or_default().insert(queue.clone());
        }
        let known = owned
            .keys()
            .chain(&held)
            .map(|q| (q.clone(), Split::assign(q.clone(), UNRESOLVED_OFFSET, None)))
            .collect();

        tracing::info!(
            owned = owned.len(),
            held = held.len(),
            dropped = orphaned.len(),
            workers = baseline.len(),
            "restored coordinator from checkpoint"
        );

        let dispatcher = Dispatcher::restore(owned, held.clone(), config.signals_no_more_splits());
        Ok(Self {
            config,
            scanner: Arc::new(scanner),
            materializer: Arc::new(materializer),
            strategy,
            reconciler: AssignmentReconciler::restore(baseline, held, known),
            dispatcher,
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn reconciler(&self) -> &AssignmentReconciler {
        &self.reconciler
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Register a worker and deliver whatever is pending for it.
    pub fn add_worker(
        &mut self,
        worker: WorkerId,
        commands: mpsc::UnboundedSender<WorkerCommand>,
    ) -> Result<()> {
        self.dispatcher.register(worker, commands);
        if !self.dispatcher.registry().is_registered(worker) {
            tracing::warn!(worker, "worker channel already closed, nothing delivered");
            return Ok(());
        }
        self.dispatcher
            .flush(&mut self.reconciler, &BTreeSet::from([worker]))?;
        Ok(())
    }

    /// Forget a worker's channel. Its pending splits stay buffered for the
    /// next registration under the same id.
    pub fn remove_worker(&mut self, worker: WorkerId) {
        if self.dispatcher.unregister(worker) {
            tracing::info!(worker, "worker unregistered");
        }
    }

    /// Reassign splits `worker` lost. The returned queues are detached from
    /// `worker` first, then reconciled as newly added queues.
    pub async fn splits_returned(&mut self, worker: WorkerId, splits: Vec<Split>) -> Result<()> {
        if splits.is_empty() {
            return Ok(());
        }
        tracing::info!(worker, splits = splits.len(), "splits returned by worker");

        self.reconciler.release(worker, &splits);
        let change = self.reconciler.returned_change(&splits);
        let target = self.allocate(&change).await?;
        let delta = self.reconciler.apply(&change, target)?;
        self.dispatcher.settle_restored(&delta);

        let workers: BTreeSet<WorkerId> = delta
            .workers()
            .filter(|w| self.dispatcher.registry().is_registered(*w))
            .collect();
        self.dispatcher.flush(&mut self.reconciler, &workers)?;
        Ok(())
    }

    /// Queues delivered to workers right now, with their owners. Pending
    /// splits are excluded.
    pub fn snapshot_state(&self, checkpoint_id: u64) -> CheckpointState {
        let owned = self.dispatcher.owned_queues();
        let unplaced: BTreeSet<Queue> = owned
            .iter()
            .filter(|q| self.dispatcher.owner_of(q).is_none())
            .cloned()
            .collect();
        let state = CheckpointState::with_owners(self.dispatcher.owners(), &unplaced);
        tracing::info!(
            checkpoint_id,
            owned = state.owned_queues.len(),
            unplaced = unplaced.len(),
            "snapshotting coordinator state"
        );
        state
    }

    /// Run one full discovery cycle inline.
    pub async fn run_discovery_cycle(&mut self) -> Result<()> {
        let latest = self.scanner.discover().await;
        if let Some(change) = self.diff(&latest) {
            let splits = self
                .materializer
                .materialize(&change, self.reconciler.known_splits())
                .await;
            self.reconcile(splits).await?;
        }
        self.complete_cycle()
    }

    /// Release the broker connection. Failures are logged, never returned.
    pub async fn close(&self) {
        tracing::info!("closing coordinator");
        if let Err(e) = self.scanner.close().await {
            tracing::warn!(error = %e, "failed to close broker client");
        }
    }

    /// Move the coordinator onto its own task.
    pub fn spawn(self, cancel: CancellationToken) -> (CoordinatorHandle, JoinHandle<Result<()>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle { events: tx };
        let join = tokio::spawn(self.run(rx, cancel));
        (handle, join)
    }

    async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<CoordinatorEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        tracing::info!(
            group = %self.config.consumer_group,
            topics = ?self.scanner.topics(),
            parallelism = self.config.parallelism,
            strategy = self.strategy.name(),
            "starting split coordinator"
        );

        let mut ticker = self.config.discovery_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval
        });
        let mut cycles: JoinSet<CycleStep> = JoinSet::new();
        let mut in_flight = false;
        let mut rescan = false;

        if ticker.is_none() {
            self.start_cycle(&mut cycles);
            in_flight = true;
        }

        let result = loop {
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),

                _ = next_tick(&mut ticker) => {
                    if in_flight {
                        rescan = true;
                    } else {
                        self.start_cycle(&mut cycles);
                        in_flight = true;
                    }
                }

                Some(joined) = cycles.join_next() => {
                    let step = match joined {
                        Ok(step) => step,
                        Err(e) => break Err(Error::invalid_state(format!("discovery task panicked: {e}"))),
                    };
                    let finished = match step {
                        CycleStep::Discovered(latest) => match self.diff(&latest) {
                            Some(change) => {
                                self.start_materialize(&mut cycles, change);
                                false
                            }
                            None => true,
                        },
                        CycleStep::Materialized(splits) => {
                            if let Err(e) = self.reconcile(splits).await {
                                break Err(e);
                            }
                            true
                        }
                    };
                    if finished {
                        if let Err(e) = self.complete_cycle() {
                            break Err(e);
                        }
                        in_flight = false;
                        if rescan {
                            rescan = false;
                            self.start_cycle(&mut cycles);
                            in_flight = true;
                        }
                    }
                }

                event = events.recv() => {
                    let Some(event) = event else {
                        tracing::info!("all coordinator handles dropped");
                        break Ok(());
                    };
                    match self.handle_event(event).await {
                        Ok(true) => {}
                        Ok(false) => break Ok(()),
                        Err(e) => break Err(e),
                    }
                }
            }
        };

        cycles.shutdown().await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "split coordinator failed");
        }
        self.close().await;
        result
    }

    /// Returns false when the loop should stop.
    async fn handle_event(&mut self, event: CoordinatorEvent) -> Result<bool> {
        match event {
            CoordinatorEvent::WorkerJoined { worker, commands } => {
                self.add_worker(worker, commands)?;
            }
            CoordinatorEvent::WorkerLeft { worker } => self.remove_worker(worker),
            CoordinatorEvent::SplitsReturned { worker, splits } => {
                self.splits_returned(worker, splits).await?;
            }
            CoordinatorEvent::Snapshot {
                checkpoint_id,
                reply,
            } => {
                drop(reply.send(self.snapshot_state(checkpoint_id)));
            }
            CoordinatorEvent::Close => return Ok(false),
        }
        Ok(true)
    }

    fn start_cycle(&self, cycles: &mut JoinSet<CycleStep>) {
        let scanner = Arc::clone(&self.scanner);
        cycles.spawn(async move { CycleStep::Discovered(scanner.discover().await) });
    }

    fn start_materialize(&self, cycles: &mut JoinSet<CycleStep>, change: QueueChange) {
        let materializer = Arc::clone(&self.materializer);
        let known = self.reconciler.known_splits().clone();
        cycles.spawn(async move {
            CycleStep::Materialized(materializer.materialize(&change, &known).await)
        });
    }

    /// `None` when the latest topology matches what workers already own.
    fn diff(&self, latest: &BTreeSet<Queue>) -> Option<QueueChange> {
        let change = topology::diff(latest, &self.dispatcher.owned_queues());
        (!change.is_empty()).then_some(change)
    }

    async fn reconcile(&mut self, change: SplitChange) -> Result<()> {
        let target = self.allocate(&change).await?;
        let delta = self.reconciler.apply(&change, target)?;
        self.dispatcher.settle_restored(&delta);
        Ok(())
    }

    /// Run the strategy off the async workers.
    async fn allocate(&self, change: &SplitChange) -> Result<Assignment> {
        let queues: BTreeSet<Queue> = change.latest.keys().cloned().collect();
        let strategy = Arc::clone(&self.strategy);
        let parallelism = self.config.parallelism;
        tokio::task::spawn_blocking(move || strategy.allocate(&queues, parallelism))
            .await
            .map_err(|e| Error::allocation(format!("allocation task panicked: {e}")))?
    }

    fn complete_cycle(&mut self) -> Result<()> {
        if self.config.one_shot() && !self.dispatcher.discovery_complete() {
            tracing::info!("one-shot discovery complete");
            self.dispatcher.mark_discovery_complete();
        }
        let workers = self.dispatcher.registry().registered_workers();
        self.dispatcher.flush(&mut self.reconciler, &workers)?;
        Ok(())
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
