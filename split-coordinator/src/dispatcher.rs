use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::mpsc;

use crate::error::{Error, Result};
use crate::metrics_consts::{ASSIGNS_BEFORE_REVOKE, OWNED_QUEUES, SPLITS_ASSIGNED, SPLITS_REVOKED};
use crate::reconciler::{is_tombstone, AssignmentDelta, AssignmentReconciler};
use crate::types::{Queue, Split, WorkerCommand, WorkerId};
use crate::worker_registry::WorkerRegistry;

/// Splits handed to workers by one flush, revokes first per worker.
pub type SplitsAssignment = BTreeMap<WorkerId, Vec<Split>>;

/// Delivers pending splits to registered workers and keeps the owned set.
///
/// The owned set records which worker each delivered queue went to. A revoke
/// only clears a queue when it comes from that worker, so a late revoke for
/// the previous owner cannot erase a newer delivery.
///
/// Queues restored without a recorded owner stay in `held` until a
/// reconciliation places them.
#[derive(Debug)]
pub struct Dispatcher {
    registry: WorkerRegistry,
    owned: BTreeMap<Queue, WorkerId>,
    held: BTreeSet<Queue>,
    /// Bounded job with one-shot discovery: workers get a no-more-splits
    /// signal once discovery has completed.
    signal_no_more_splits: bool,
    discovery_complete: bool,
    /// Workers signalled since their current registration.
    signalled: BTreeSet<WorkerId>,
}

impl Dispatcher {
    pub fn new(signal_no_more_splits: bool) -> Self {
        Self::restore(BTreeMap::new(), BTreeSet::new(), signal_no_more_splits)
    }

    pub fn restore(
        owned: BTreeMap<Queue, WorkerId>,
        held: BTreeSet<Queue>,
        signal_no_more_splits: bool,
    ) -> Self {
        metrics::gauge!(OWNED_QUEUES).set((owned.len() + held.len()) as f64);
        Self {
            registry: WorkerRegistry::new(),
            owned,
            held,
            signal_no_more_splits,
            discovery_complete: false,
            signalled: BTreeSet::new(),
        }
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// Register a worker. A re-registration is a new worker instance, so it
    /// becomes eligible for the no-more-splits signal again.
    pub fn register(&mut self, worker: WorkerId, commands: mpsc::UnboundedSender<WorkerCommand>) {
        if self.registry.register(worker, commands) {
            tracing::info!(worker, "worker re-registered, replacing previous channel");
        } else {
            tracing::info!(worker, "worker registered");
        }
        self.signalled.remove(&worker);
    }

    pub fn unregister(&mut self, worker: WorkerId) -> bool {
        self.signalled.remove(&worker);
        self.registry.unregister(worker)
    }

    /// Every queue some worker holds, including held ones.
    pub fn owned_queues(&self) -> BTreeSet<Queue> {
        self.owned.keys().chain(&self.held).cloned().collect()
    }

    /// Queue -> worker for queues whose owner is known.
    pub fn owners(&self) -> &BTreeMap<Queue, WorkerId> {
        &self.owned
    }

    pub fn owner_of(&self, queue: &Queue) -> Option<WorkerId> {
        self.owned.get(queue).copied()
    }

    /// Record the owners a reconciliation gave to held queues, and drop the
    /// held queues it found gone.
    pub fn settle_restored(&mut self, delta: &AssignmentDelta) {
        for (queue, worker) in delta.adopted() {
            if self.held.remove(queue) {
                self.owned.insert(queue.clone(), *worker);
            }
        }
        for queue in delta.forgotten() {
            self.held.remove(queue);
        }
        metrics::gauge!(OWNED_QUEUES).set((self.owned.len() + self.held.len()) as f64);
    }

    pub fn mark_discovery_complete(&mut self) {
        self.discovery_complete = true;
    }

    pub fn discovery_complete(&self) -> bool {
        self.discovery_complete
    }

    /// Whether workers should be told no more splits are coming right now.
    pub fn should_signal(&self) -> bool {
        self.signal_no_more_splits && self.discovery_complete
    }

    /// Drain the pending buffers of `workers` and deliver them.
    ///
    /// Every worker must be registered; otherwise nothing is drained or sent.
    /// Ownership is updated for the whole batch, revokes before assigns.
    pub fn flush(
        &mut self,
        reconciler: &mut AssignmentReconciler,
        workers: &BTreeSet<WorkerId>,
    ) -> Result<SplitsAssignment> {
        if let Some(missing) = workers.iter().find(|w| !self.registry.is_registered(**w)) {
            return Err(Error::WorkerNotRegistered(*missing));
        }

        let mut batch = SplitsAssignment::new();
        for worker in workers {
            let splits = reconciler.take_pending(*worker);
            if !splits.is_empty() {
                batch.insert(*worker, splits);
            }
        }

        if !batch.is_empty() {
            self.apply_ownership(&batch);
            self.deliver(&batch);
        }

        if self.should_signal() {
            self.signal_no_more_splits(workers);
        }

        Ok(batch)
    }

    fn apply_ownership(&mut self, batch: &SplitsAssignment) {
        let mut assigned = 0u64;
        let mut revoked = 0u64;

        for (worker, splits) in batch {
            for split in splits.iter().filter(|s| is_tombstone(s)) {
                revoked += 1;
                if self.owned.get(&split.queue) == Some(worker) {
                    self.owned.remove(&split.queue);
                }
            }
        }

        for (worker, splits) in batch {
            for split in splits.iter().filter(|s| s.is_valid()) {
                assigned += 1;
                self.held.remove(&split.queue);
                if let Some(previous) = self.owned.insert(split.queue.clone(), *worker) {
                    if previous != *worker {
                        metrics::counter!(ASSIGNS_BEFORE_REVOKE).increment(1);
                        tracing::warn!(
                            queue = %split.queue,
                            previous,
                            worker,
                            "queue delivered before its revoke reached the previous owner"
                        );
                    }
                }
            }
        }

        metrics::counter!(SPLITS_ASSIGNED).increment(assigned);
        metrics::counter!(SPLITS_REVOKED).increment(revoked);
        metrics::gauge!(OWNED_QUEUES).set((self.owned.len() + self.held.len()) as f64);
    }

    fn deliver(&self, batch: &SplitsAssignment) {
        for (worker, splits) in batch {
            let Some(sender) = self.registry.sender(*worker) else {
                continue;
            };
            tracing::info!(
                worker,
                splits = ?splits.iter().map(|s| (s.queue.to_string(), s.tag.as_byte())).collect::<Vec<_>>(),
                "assigning splits to worker"
            );
            if sender
                .send(WorkerCommand::AssignSplits(splits.clone()))
                .is_err()
            {
                // the runtime hands these back through splits_returned
                tracing::warn!(worker, "worker channel closed during delivery");
            }
        }
    }

    /// Send the no-more-splits signal to each of `workers` at most once per
    /// registration.
    pub fn signal_no_more_splits(&mut self, workers: &BTreeSet<WorkerId>) {
        for worker in workers {
            if !self.signalled.insert(*worker) {
                continue;
            }
            if let Some(sender) = self.registry.sender(*worker) {
                tracing::info!(worker, "no more splits for worker");
                if sender.send(WorkerCommand::NoMoreSplits).is_err() {
                    tracing::warn!(worker, "worker channel closed before no-more-splits signal");
                }
            }
        }
    }
}
