use std::collections::{BTreeMap, BTreeSet};

use tokio::sync::mpsc;

use crate::metrics_consts::REGISTERED_WORKERS;
use crate::types::{WorkerCommand, WorkerId};

/// Workers currently registered with the coordinator, with the channel used
/// to push commands to each.
///
/// Owned by the coordination task, so no internal locking.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    connections: BTreeMap<WorkerId, mpsc::UnboundedSender<WorkerCommand>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker. Replaces the channel of a previous registration
    /// under the same id; returns true if one existed.
    pub fn register(
        &mut self,
        worker: WorkerId,
        commands: mpsc::UnboundedSender<WorkerCommand>,
    ) -> bool {
        let replaced = self.connections.insert(worker, commands).is_some();
        metrics::gauge!(REGISTERED_WORKERS).set(self.connections.len() as f64);
        replaced
    }

    pub fn unregister(&mut self, worker: WorkerId) -> bool {
        let removed = self.connections.remove(&worker).is_some();
        metrics::gauge!(REGISTERED_WORKERS).set(self.connections.len() as f64);
        removed
    }

    pub fn sender(&self, worker: WorkerId) -> Option<&mpsc::UnboundedSender<WorkerCommand>> {
        self.connections.get(&worker)
    }

    /// Registered and its receiving side still alive.
    pub fn is_registered(&self, worker: WorkerId) -> bool {
        self.connections
            .get(&worker)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Ids of registered workers whose channel is still open.
    pub fn registered_workers(&self) -> BTreeSet<WorkerId> {
        self.connections
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(worker, _)| *worker)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
