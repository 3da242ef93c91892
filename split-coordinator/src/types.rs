use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Index of a parallel worker (reader subtask). Workers are numbered
/// `0..parallelism`.
pub type WorkerId = u32;

/// Starting offset used for splits whose position could not be resolved,
/// e.g. queues restored from a checkpoint before the first discovery pass.
/// Readers resume from their committed position when they see it.
pub const UNRESOLVED_OFFSET: i64 = -1;

/// One queue (partition) of a topic on a given broker. The unit of ownership.
///
/// Field order matters: queues sort by topic, then broker, then index, which
/// keeps allocation deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Queue {
    pub topic: String,
    pub broker_name: String,
    pub queue_id: u32,
}

impl Queue {
    pub fn new(topic: impl Into<String>, broker_name: impl Into<String>, queue_id: u32) -> Self {
        Self {
            topic: topic.into(),
            broker_name: broker_name.into(),
            queue_id,
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}#{}", self.topic, self.broker_name, self.queue_id)
    }
}

/// Whether a split hands a queue to a worker or takes it away.
///
/// Encoded on the wire as a single byte: `1` assigns, `0` revokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum SplitTag {
    /// Tombstone: the worker must relinquish the queue.
    Revoke,
    /// Live readable range.
    Assign,
}

impl SplitTag {
    pub fn as_byte(self) -> u8 {
        match self {
            SplitTag::Revoke => 0,
            SplitTag::Assign => 1,
        }
    }
}

impl From<SplitTag> for u8 {
    fn from(tag: SplitTag) -> Self {
        tag.as_byte()
    }
}

impl TryFrom<u8> for SplitTag {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SplitTag::Revoke),
            1 => Ok(SplitTag::Assign),
            other => Err(format!("unknown split tag {other}")),
        }
    }
}

/// A queue plus the offset range a worker should read, tagged assign or revoke.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Split {
    pub queue: Queue,
    pub starting_offset: i64,
    /// `None` means unbounded: read until cancelled.
    pub stopping_offset: Option<i64>,
    pub tag: SplitTag,
}

impl Split {
    pub fn assign(queue: Queue, starting_offset: i64, stopping_offset: Option<i64>) -> Self {
        Self {
            queue,
            starting_offset,
            stopping_offset,
            tag: SplitTag::Assign,
        }
    }

    pub fn revoke(queue: Queue, starting_offset: i64, stopping_offset: Option<i64>) -> Self {
        Self {
            queue,
            starting_offset,
            stopping_offset,
            tag: SplitTag::Revoke,
        }
    }

    /// Same range, revoke tag.
    pub fn to_revoke(&self) -> Self {
        Self {
            tag: SplitTag::Revoke,
            ..self.clone()
        }
    }

    /// Same range, assign tag.
    pub fn to_assign(&self) -> Self {
        Self {
            tag: SplitTag::Assign,
            ..self.clone()
        }
    }

    pub fn is_valid(&self) -> bool {
        self.tag == SplitTag::Assign
    }
}

/// Result of diffing a freshly discovered queue set against the owned set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueChange {
    pub increased: BTreeSet<Queue>,
    pub decreased: BTreeSet<Queue>,
    pub latest: BTreeSet<Queue>,
}

impl QueueChange {
    pub fn is_empty(&self) -> bool {
        self.increased.is_empty() && self.decreased.is_empty()
    }
}

/// A [`QueueChange`] with offsets attached, keyed by queue.
///
/// `increased` and `latest` hold assign-tagged splits, `decreased` holds
/// revoke-tagged ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitChange {
    pub increased: BTreeMap<Queue, Split>,
    pub decreased: BTreeMap<Queue, Split>,
    pub latest: BTreeMap<Queue, Split>,
}

/// Commands pushed to a worker over its command channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerCommand {
    /// Incremental assignment update: assign-tagged splits are new ranges to
    /// read, revoke-tagged splits must be dropped.
    AssignSplits(Vec<Split>),
    /// The worker will not receive further splits (bounded, one-shot jobs).
    NoMoreSplits,
}

/// Whether the job ends once the stopping offsets are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Boundedness {
    Bounded,
    ContinuousUnbounded,
}
