mod average;
mod hash;

pub use average::AverageAllocateStrategy;
pub use hash::HashAllocateStrategy;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{Queue, WorkerId};

/// Maps the full queue set onto worker ids.
///
/// The coordinator calls `allocate` on every topology change with the complete
/// set of live queues, never a delta, and diffs the result against its current
/// assignment. Implementations must be deterministic for a fixed input and
/// should keep queues on the same worker across calls where they can.
pub trait AllocationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compute the desired worker -> queues mapping.
    ///
    /// - `queues`: every queue that should be owned by some worker
    /// - `parallelism`: number of workers; valid ids are `0..parallelism`
    ///
    /// Workers left without queues may be omitted from the result.
    fn allocate(
        &self,
        queues: &BTreeSet<Queue>,
        parallelism: u32,
    ) -> Result<BTreeMap<WorkerId, BTreeSet<Queue>>>;
}

/// Look up a built-in strategy by its configuration name.
pub fn from_name(name: &str) -> Result<Arc<dyn AllocationStrategy>> {
    match name.trim().to_ascii_lowercase().as_str() {
        "hash" => Ok(Arc::new(HashAllocateStrategy)),
        "average" => Ok(Arc::new(AverageAllocateStrategy)),
        other => Err(Error::allocation(format!(
            "unknown allocation strategy '{other}' (expected 'hash' or 'average')"
        ))),
    }
}

fn ensure_parallelism(parallelism: u32) -> Result<()> {
    if parallelism == 0 {
        return Err(Error::allocation("parallelism must be at least 1"));
    }
    Ok(())
}
