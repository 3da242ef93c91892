use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::metrics_consts::OFFSET_RESOLUTION_FAILURES;
use crate::types::Queue;

/// Resolves one offset per queue.
///
/// The coordinator holds two of these: one for starting offsets and one for
/// stopping offsets. A queue missing from the returned map could not be
/// resolved; an `Err` means nothing in the batch could be.
#[async_trait]
pub trait OffsetResolver: Send + Sync {
    async fn resolve(&self, queues: &BTreeSet<Queue>) -> Result<BTreeMap<Queue, i64>>;
}

/// Broker-side offset lookups that [`PolicyResolver`] builds on.
///
/// Implemented by the broker client; every call may hit the network.
#[async_trait]
pub trait OffsetsRetriever: Send + Sync {
    async fn min_offset(&self, queue: &Queue) -> Result<i64>;

    async fn max_offset(&self, queue: &Queue) -> Result<i64>;

    /// Offset committed by `group`, or `None` if the group never committed.
    async fn committed_offset(&self, group: &str, queue: &Queue) -> Result<Option<i64>>;

    /// First offset whose store timestamp is at or after `timestamp_ms`.
    async fn offset_for_timestamp(&self, queue: &Queue, timestamp_ms: i64) -> Result<i64>;
}

/// Where a queue's range starts (or stops).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OffsetPolicy {
    Earliest,
    Latest,
    /// Group's committed offset, falling back when nothing was committed.
    Committed { fallback: CommittedFallback },
    Timestamp(i64),
    Fixed(BTreeMap<Queue, i64>),
    /// Resolves nothing. As a stopping policy this means "read forever".
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommittedFallback {
    Earliest,
    Latest,
}

/// [`OffsetResolver`] that applies an [`OffsetPolicy`] through an
/// [`OffsetsRetriever`].
///
/// Lookups are per queue; one failing queue is logged and left out of the
/// result without affecting the others.
pub struct PolicyResolver {
    policy: OffsetPolicy,
    retriever: Arc<dyn OffsetsRetriever>,
    consumer_group: String,
}

impl PolicyResolver {
    pub fn new(
        policy: OffsetPolicy,
        retriever: Arc<dyn OffsetsRetriever>,
        consumer_group: impl Into<String>,
    ) -> Self {
        Self {
            policy,
            retriever,
            consumer_group: consumer_group.into(),
        }
    }

    async fn resolve_one(&self, queue: &Queue) -> Result<Option<i64>> {
        let offset = match &self.policy {
            OffsetPolicy::Earliest => Some(self.retriever.min_offset(queue).await?),
            OffsetPolicy::Latest => Some(self.retriever.max_offset(queue).await?),
            OffsetPolicy::Committed { fallback } => {
                match self
                    .retriever
                    .committed_offset(&self.consumer_group, queue)
                    .await?
                {
                    Some(offset) => Some(offset),
                    None => match fallback {
                        CommittedFallback::Earliest => Some(self.retriever.min_offset(queue).await?),
                        CommittedFallback::Latest => Some(self.retriever.max_offset(queue).await?),
                    },
                }
            }
            OffsetPolicy::Timestamp(ts) => {
                Some(self.retriever.offset_for_timestamp(queue, *ts).await?)
            }
            OffsetPolicy::Fixed(offsets) => offsets.get(queue).copied(),
            OffsetPolicy::Unbounded => None,
        };
        Ok(offset)
    }
}

#[async_trait]
impl OffsetResolver for PolicyResolver {
    async fn resolve(&self, queues: &BTreeSet<Queue>) -> Result<BTreeMap<Queue, i64>> {
        let mut resolved = BTreeMap::new();
        for queue in queues {
            match self.resolve_one(queue).await {
                Ok(Some(offset)) => {
                    resolved.insert(queue.clone(), offset);
                }
                Ok(None) => {}
                Err(e) => {
                    metrics::counter!(OFFSET_RESOLUTION_FAILURES).increment(1);
                    tracing::warn!(queue = %queue, policy = ?self.policy, error = %e, "failed to resolve offset");
                }
            }
        }
        Ok(resolved)
    }
}
