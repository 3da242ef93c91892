pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod hash;
pub mod materializer;
pub mod metrics_consts;
pub mod offsets;
pub mod reconciler;
pub mod strategy;
pub mod topology;
pub mod types;
pub mod worker_registry;
