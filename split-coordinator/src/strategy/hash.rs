use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::hash::{jump_consistent_hash, queue_key};
use crate::types::{Queue, WorkerId};

use super::{ensure_parallelism, AllocationStrategy};

/// Places each queue with jump consistent hash over its identity.
///
/// Placement of a queue depends only on the queue and the parallelism, so
/// queues appearing or disappearing never move other queues. Scaling from N
/// to N+1 workers moves ~1/(N+1) of the queues, all onto the new worker.
pub struct HashAllocateStrategy;

impl AllocationStrategy for HashAllocateStrategy {
    fn name(&self) -> &'static str {
        "hash"
    }

    fn allocate(
        &self,
        queues: &BTreeSet<Queue>,
        parallelism: u32,
    ) -> Result<BTreeMap<WorkerId, BTreeSet<Queue>>> {
        ensure_parallelism(parallelism)?;

        let mut assignments: BTreeMap<WorkerId, BTreeSet<Queue>> = BTreeMap::new();
        for queue in queues {
            let worker = jump_consistent_hash(queue_key(queue), parallelism);
            assignments.entry(worker).or_default().insert(queue.clone());
        }
        Ok(assignments)
    }
}
