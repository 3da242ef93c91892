use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::{Queue, WorkerId};

/// Coordinator state persisted with each checkpoint: the queues delivered to
/// workers at snapshot time, and which worker each went to where known.
/// Pending splits are not part of it; they are recomputed after restore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub owned_queues: BTreeSet<Queue>,
    /// Worker -> queues it was delivered. Queues in `owned_queues` missing
    /// here have an unknown owner.
    #[serde(default)]
    pub owners: BTreeMap<WorkerId, BTreeSet<Queue>>,
}

impl CheckpointState {
    /// State with no recorded owners.
    pub fn new(owned_queues: BTreeSet<Queue>) -> Self {
        Self {
            owned_queues,
            owners: BTreeMap::new(),
        }
    }

    /// State from a queue -> worker map plus queues whose owner is unknown.
    pub fn with_owners(owners: &BTreeMap<Queue, WorkerId>, unplaced: &BTreeSet<Queue>) -> Self {
        let mut by_worker: BTreeMap<WorkerId, BTreeSet<Queue>> = BTreeMap::new();
        for (queue, worker) in owners {
            by_worker.entry(*worker).or_default().insert(queue.clone());
        }
        Self {
            owned_queues: owners.keys().chain(unplaced).cloned().collect(),
            owners: by_worker,
        }
    }

    /// Queue -> worker as recorded, restricted to `owned_queues`.
    pub fn owner_map(&self) -> BTreeMap<Queue, WorkerId> {
        let mut map = BTreeMap::new();
        for (worker, queues) in &self.owners {
            for queue in queues.iter().filter(|q| self.owned_queues.contains(*q)) {
                map.entry(queue.clone()).or_insert(*worker);
            }
        }
        map
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
