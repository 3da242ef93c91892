use thiserror::Error;

use crate::types::WorkerId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("worker {0} is not registered with the coordinator")]
    WorkerNotRegistered(WorkerId),

    #[error("allocation failed: {0}")]
    Allocation(String),

    #[error("failed to fetch queues for topic {topic}: {reason}")]
    Discovery { topic: String, reason: String },

    #[error("offset resolution failed: {0}")]
    OffsetResolution(String),

    #[error("broker client error: {0}")]
    Broker(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("coordinator is no longer running")]
    CoordinatorStopped,

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl Error {
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn allocation(msg: impl Into<String>) -> Self {
        Self::Allocation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
