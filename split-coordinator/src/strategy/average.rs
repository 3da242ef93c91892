use std::collections::{BTreeMap, BTreeSet};

use crate::error::Result;
use crate::types::{Queue, WorkerId};

use super::{ensure_parallelism, AllocationStrategy};

/// Deals the sorted queue set into contiguous, balanced blocks.
///
/// Every worker gets within one queue of the ideal count; the first
/// `queues % parallelism` workers take the extra queue. Balance is exact, but
/// a queue appearing early in the order shifts the block boundaries, so more
/// queues move on topology changes than with [`super::HashAllocateStrategy`].
pub struct AverageAllocateStrategy;

impl AllocationStrategy for AverageAllocateStrategy {
    fn name(&self) -> &'static str {
        "average"
    }

    fn allocate(
        &self,
        queues: &BTreeSet<Queue>,
        parallelism: u32,
    ) -> Result<BTreeMap<WorkerId, BTreeSet<Queue>>> {
        ensure_parallelism(parallelism)?;

        let total = queues.len();
        let workers = parallelism as usize;
        let base = total / workers;
        let extra = total % workers;

        let mut assignments: BTreeMap<WorkerId, BTreeSet<Queue>> = BTreeMap::new();
        let mut remaining = queues.iter();
        for worker in 0..parallelism {
            let take = base + usize::from((worker as usize) < extra);
            if take == 0 {
                break;
            }
            let block: BTreeSet<Queue> = remaining.by_ref().take(take).cloned().collect();
            assignments.insert(worker, block);
        }

        Ok(assignments)
    }
}
