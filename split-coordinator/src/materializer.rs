use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::metrics_consts::OFFSET_RESOLUTION_FAILURES;
use crate::offsets::OffsetResolver;
use crate::types::{Queue, QueueChange, Split, SplitChange, UNRESOLVED_OFFSET};

/// Turns a [`QueueChange`] into splits by attaching starting and stopping
/// offsets.
///
/// Rules when a starting offset cannot be resolved:
/// - newly discovered queue: dropped from this cycle, retried on the next scan
/// - unchanged queue: keeps the split it had last cycle, if any
/// - removed queue: still revoked, with the last known range
pub struct SplitMaterializer {
    starting: Arc<dyn OffsetResolver>,
    stopping: Arc<dyn OffsetResolver>,
}

impl SplitMaterializer {
    pub fn new(starting: Arc<dyn OffsetResolver>, stopping: Arc<dyn OffsetResolver>) -> Self {
        Self { starting, stopping }
    }

    /// `known` holds the splits of the previous cycle, used as fallback.
    pub async fn materialize(
        &self,
        change: &QueueChange,
        known: &BTreeMap<Queue, Split>,
    ) -> SplitChange {
        // latest already contains increased, so one lookup covers all three sets
        let wanted: BTreeSet<Queue> = change.latest.union(&change.decreased).cloned().collect();
        let starting = resolve_or_empty(self.starting.as_ref(), &wanted, "starting").await;
        let stopping = resolve_or_empty(self.stopping.as_ref(), &wanted, "stopping").await;

        let build = |queue: &Queue| -> Option<Split> {
            starting
                .get(queue)
                .map(|start| Split::assign(queue.clone(), *start, stopping.get(queue).copied()))
        };

        let mut result = SplitChange::default();

        for queue in &change.latest {
            let split = match build(queue) {
                Some(split) => split,
                None if change.increased.contains(queue) => {
                    metrics::counter!(OFFSET_RESOLUTION_FAILURES).increment(1);
                    tracing::warn!(queue = %queue, "no starting offset for new queue, retrying next scan");
                    continue;
                }
                None => match known.get(queue) {
                    Some(previous) => previous.to_assign(),
                    None => {
                        metrics::counter!(OFFSET_RESOLUTION_FAILURES).increment(1);
                        tracing::warn!(queue = %queue, "no starting offset and no previous split, skipping queue");
                        continue;
                    }
                },
            };

            if change.increased.contains(queue) {
                result.increased.insert(queue.clone(), split.clone());
            }
            result.latest.insert(queue.clone(), split);
        }

        for queue in &change.decreased {
            let split = build(queue)
                .or_else(|| known.get(queue).cloned())
                .unwrap_or_else(|| Split::assign(queue.clone(), UNRESOLVED_OFFSET, None));
            result.decreased.insert(queue.clone(), split.to_revoke());
        }

        result
    }
}

async fn resolve_or_empty(
    resolver: &dyn OffsetResolver,
    queues: &BTreeSet<Queue>,
    kind: &'static str,
) -> BTreeMap<Queue, i64> {
    if queues.is_empty() {
        return BTreeMap::new();
    }
    match resolver.resolve(queues).await {
        Ok(offsets) => offsets,
        Err(e) => {
            metrics::counter!(OFFSET_RESOLUTION_FAILURES).increment(queues.len() as u64);
            tracing::warn!(kind, queues = queues.len(), error = %e, "offset resolution failed for batch");
            BTreeMap::new()
        }
    }
}
