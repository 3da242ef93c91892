use std::collections::BTreeSet;

use crate::types::{Queue, QueueChange};

/// Compare the latest discovered queues with the owned set.
///
/// `increased = latest - owned`, `decreased = owned - latest`. Callers skip
/// the rest of the cycle when [`QueueChange::is_empty`] holds.
pub fn diff(latest: &BTreeSet<Queue>, owned: &BTreeSet<Queue>) -> QueueChange {
    let increased: BTreeSet<Queue> = latest.difference(owned).cloned().collect();
    let decreased: BTreeSet<Queue> = owned.difference(latest).cloned().collect();

    if increased.is_empty() && decreased.is_empty() {
        tracing::debug!(owned = owned.len(), "queue topology unchanged");
    } else {
        tracing::info!(
            owned = owned.len(),
            latest = latest.len(),
            increased = ?increased,
            decreased = ?decreased,
            "queue topology changed"
        );
    }

    QueueChange {
        increased,
        decreased,
        latest: latest.clone(),
    }
}
