//! Reconciliation of the target assignment against the current one.
//!
//! The reconciler owns four pieces of coordinator state:
//!
//! - `current`: worker -> queues, the baseline every delta is computed from
//! - `pending`: worker -> splits, deltas not yet delivered to that worker
//! - `known`: the materialized splits of the latest topology
//! - `held`: queues restored from a checkpoint whose owner is not recorded
//!
//! For every worker the following holds between cycles:
//!
//! ```text
//! current[w] = delivered[w] + assigns in pending[w] - revokes in pending[w]
//! ```
//!
//! Folding a delta into `pending` keeps that true even when a worker misses
//! several cycles: a revoke arriving for an assign the worker never received
//! cancels it instead of queueing a tombstone for a queue it never held.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};
use crate::metrics_consts::{OWNERSHIP_TRANSFERS, PENDING_SPLITS, RECONCILIATIONS};
use crate::strategy::AllocationStrategy;
use crate::types::{Queue, Split, SplitChange, SplitTag, WorkerId, UNRESOLVED_OFFSET};

/// Worker -> owned queues.
pub type Assignment = BTreeMap<WorkerId, BTreeSet<Queue>>;

/// Per-worker splits produced by one reconciliation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentDelta {
    changes: BTreeMap<WorkerId, BTreeMap<Queue, Split>>,
    /// Held queues that got an owner this cycle. Nothing is sent for them.
    adopted: BTreeMap<Queue, WorkerId>,
    /// Held queues that left the topology before getting an owner.
    forgotten: BTreeSet<Queue>,
}

impl AssignmentDelta {
    fn push(&mut self, worker: WorkerId, split: Split) {
        self.changes
            .entry(worker)
            .or_default()
            .insert(split.queue.clone(), split);
    }

    fn contains(&self, worker: WorkerId, queue: &Queue) -> bool {
        self.changes
            .get(&worker)
            .is_some_and(|splits| splits.contains_key(queue))
    }

    /// The split for `queue` in `worker`'s part of the delta, if any.
    pub fn get(&self, worker: WorkerId, queue: &Queue) -> Option<&Split> {
        self.changes.get(&worker)?.get(queue)
    }

    pub fn workers(&self) -> impl Iterator<Item = WorkerId> + '_ {
        self.changes.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (WorkerId, &Split)> {
        self.changes
            .iter()
            .flat_map(|(worker, splits)| splits.values().map(move |split| (*worker, split)))
    }

    pub fn adopted(&self) -> &BTreeMap<Queue, WorkerId> {
        &self.adopted
    }

    pub fn forgotten(&self) -> &BTreeSet<Queue> {
        &self.forgotten
    }

    /// Number of splits to send.
    pub fn len(&self) -> usize {
        self.changes.values().map(BTreeMap::len).sum()
    }

    /// True when no split has to be sent.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct AssignmentReconciler {
    current: Assignment,
    pending: BTreeMap<WorkerId, BTreeMap<Queue, Split>>,
    known: BTreeMap<Queue, Split>,
    held: BTreeSet<Queue>,
}

impl AssignmentReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a restored baseline. Nothing is pending: the workers are
    /// assumed to still hold what `current` says, plus `held` under owners
    /// that are unknown.
    ///
    /// A held queue takes the owner the next target gives it, without any
    /// split being sent, and only then joins `current`.
    pub fn restore(
        current: Assignment,
        held: BTreeSet<Queue>,
        known: BTreeMap<Queue, Split>,
    ) -> Self {
        Self {
            current,
            pending: BTreeMap::new(),
            known,
            held,
        }
    }

    pub fn current(&self) -> &Assignment {
        &self.current
    }

    pub fn known_splits(&self) -> &BTreeMap<Queue, Split> {
        &self.known
    }

    pub fn owner_of(&self, queue: &Queue) -> Option<WorkerId> {
        self.current
            .iter()
            .find(|(_, queues)| queues.contains(queue))
            .map(|(worker, _)| *worker)
    }

    pub fn held(&self) -> &BTreeSet<Queue> {
        &self.held
    }

    pub fn pending_for(&self, worker: WorkerId) -> Option<&BTreeMap<Queue, Split>> {
        self.pending.get(&worker)
    }

    pub fn has_pending(&self, worker: WorkerId) -> bool {
        self.pending.contains_key(&worker)
    }

    pub fn pending_split_count(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    /// Drain `worker`'s pending buffer. Revokes come first.
    pub fn take_pending(&mut self, worker: WorkerId) -> Vec<Split> {
        let mut splits: Vec<Split> = self
            .pending
            .remove(&worker)
            .map(|buffer| buffer.into_values().collect())
            .unwrap_or_default();
        splits.sort_by_key(|split| split.tag);
        metrics::gauge!(PENDING_SPLITS).set(self.pending_split_count() as f64);
        splits
    }

    /// Ask `strategy` for the target over the latest topology and fold the
    /// difference into the pending buffers.
    ///
    /// Runs the strategy inline; the coordinator instead calls the strategy
    /// off its task and hands the result to [`Self::apply`].
    pub fn reconcile(
        &mut self,
        change: &SplitChange,
        strategy: &dyn AllocationStrategy,
        parallelism: u32,
    ) -> Result<AssignmentDelta> {
        let queues: BTreeSet<Queue> = change.latest.keys().cloned().collect();
        let target = strategy.allocate(&queues, parallelism)?;
        self.apply(change, target)
    }

    /// Merge a computed target into the pending buffers and make it the new
    /// baseline. On error nothing is changed.
    pub fn apply(&mut self, change: &SplitChange, target: Assignment) -> Result<AssignmentDelta> {
        let mut target_owner: BTreeMap<&Queue, WorkerId> = BTreeMap::new();
        for (worker, queues) in &target {
            for queue in queues {
                if !change.latest.contains_key(queue) {
                    return Err(Error::invalid_state(format!(
                        "strategy placed unknown queue {queue} on worker {worker}"
                    )));
                }
                if let Some(other) = target_owner.insert(queue, *worker) {
                    return Err(Error::invalid_state(format!(
                        "strategy placed queue {queue} on both worker {other} and worker {worker}"
                    )));
                }
            }
        }

        let baseline_owner: BTreeMap<&Queue, WorkerId> = self
            .current
            .iter()
            .flat_map(|(worker, queues)| queues.iter().map(move |queue| (queue, *worker)))
            .collect();

        let mut delta = AssignmentDelta::default();

        for (queue, split) in &change.decreased {
            if let Some(owner) = baseline_owner.get(queue) {
                delta.push(*owner, split.to_revoke());
            } else if self.held.contains(queue) {
                tracing::warn!(
                    queue = %queue,
                    "restored queue removed before its owner was known, no revoke sent"
                );
                delta.forgotten.insert(queue.clone());
            }
        }

        let mut transfers = 0u64;
        for (queue, worker) in &target_owner {
            let split = &change.latest[*queue];
            match baseline_owner.get(queue) {
                Some(owner) if owner == worker => {}
                Some(owner) => {
                    // ownership moves: old owner must let go in the same cycle
                    delta.push(*owner, split.to_revoke());
                    delta.push(*worker, split.to_assign());
                    transfers += 1;
                }
                None if self.held.contains(*queue) => {
                    delta.adopted.insert((*queue).clone(), *worker);
                }
                None => delta.push(*worker, split.to_assign()),
            }
        }

        // Queues the target no longer places anywhere (e.g. fewer workers).
        for (queue, owner) in &baseline_owner {
            if target_owner.contains_key(queue) || delta.contains(*owner, queue) {
                continue;
            }
            let split = change
                .decreased
                .get(*queue)
                .or_else(|| change.latest.get(*queue))
                .or_else(|| self.known.get(*queue))
                .map(Split::to_revoke)
                .unwrap_or_else(|| Split::revoke((*queue).clone(), UNRESOLVED_OFFSET, None));
            delta.push(*owner, split);
        }

        for (worker, split) in delta.iter() {
            fold(self.pending.entry(worker).or_default(), split.clone());
        }
        self.pending.retain(|_, buffer| !buffer.is_empty());
        for queue in delta.adopted.keys().chain(&delta.forgotten) {
            self.held.remove(queue);
        }

        self.current = target
            .into_iter()
            .filter(|(_, queues)| !queues.is_empty())
            .collect();
        self.known = change.latest.clone();

        metrics::counter!(RECONCILIATIONS).increment(1);
        metrics::counter!(OWNERSHIP_TRANSFERS).increment(transfers);
        metrics::gauge!(PENDING_SPLITS).set(self.pending_split_count() as f64);
        tracing::info!(
            delta = delta.len(),
            adopted = delta.adopted.len(),
            transfers,
            workers = self.current.len(),
            pending = self.pending_split_count(),
            "reconciled assignment"
        );

        Ok(delta)
    }

    /// Forget that `worker` holds `splits`: it lost them (failure/restart).
    /// Pending entries for those queues on that worker are dropped too.
    pub fn release(&mut self, worker: WorkerId, splits: &[Split]) {
        for split in splits {
            self.held.remove(&split.queue);
            if let Some(queues) = self.current.get_mut(&worker) {
                queues.remove(&split.queue);
            }
            if let Some(buffer) = self.pending.get_mut(&worker) {
                buffer.remove(&split.queue);
            }
        }
        self.current.retain(|_, queues| !queues.is_empty());
        self.pending.retain(|_, buffer| !buffer.is_empty());
    }

    /// Change treating `returned` as newly added on top of the last known
    /// topology. Returned ranges win over the known ones since they carry the
    /// worker's progress.
    pub fn returned_change(&self, returned: &[Split]) -> SplitChange {
        let mut change = SplitChange {
            latest: self.known.clone(),
            ..Default::default()
        };
        for split in returned {
            let split = split.to_assign();
            change.increased.insert(split.queue.clone(), split.clone());
            change.latest.insert(split.queue.clone(), split);
        }
        change
    }
}

/// Opposite tags for the same queue cancel; same tag replaces the range.
fn fold(buffer: &mut BTreeMap<Queue, Split>, split: Split) {
    match buffer.get(&split.queue) {
        Some(existing) if existing.tag != split.tag => {
            buffer.remove(&split.queue);
        }
        _ => {
            buffer.insert(split.queue.clone(), split);
        }
    }
}

/// True when `split` tells a worker to let go of its queue.
pub fn is_tombstone(split: &Split) -> bool {
    split.tag == SplitTag::Revoke
}
