// ==== Discovery ====
/// Counter for completed discovery scans
pub const DISCOVERY_SCANS: &str = "split_coordinator_discovery_scans_total";

/// Counter for topics whose route lookup failed during a scan
pub const DISCOVERY_TOPIC_FAILURES: &str = "split_coordinator_discovery_topic_failures_total";

/// Gauge for the number of queues seen in the latest scan
pub const DISCOVERED_QUEUES: &str = "split_coordinator_discovered_queues";

// ==== Offsets ====
/// Counter for queues dropped or degraded because offset resolution failed
pub const OFFSET_RESOLUTION_FAILURES: &str = "split_coordinator_offset_resolution_failures_total";

// ==== Reconciliation ====
/// Counter for reconciliation cycles that produced a target assignment
pub const RECONCILIATIONS: &str = "split_coordinator_reconciliations_total";

/// Counter for ownership transfers between two workers
pub const OWNERSHIP_TRANSFERS: &str = "split_coordinator_ownership_transfers_total";

/// Gauge for splits waiting in pending buffers
pub const PENDING_SPLITS: &str = "split_coordinator_pending_splits";

// ==== Dispatch ====
/// Counter for assign-tagged splits delivered to workers
pub const SPLITS_ASSIGNED: &str = "split_coordinator_splits_assigned_total";

/// Counter for revoke-tagged splits delivered to workers
pub const SPLITS_REVOKED: &str = "split_coordinator_splits_revoked_total";

/// Counter for assigns delivered while the previous owner had not yet been
/// sent its revoke, leaving two workers holding the queue
pub const ASSIGNS_BEFORE_REVOKE: &str = "split_coordinator_assigns_before_revoke_total";

/// Gauge for queues currently delivered to some worker
pub const OWNED_QUEUES: &str = "split_coordinator_owned_queues";

/// Gauge for registered workers
pub const REGISTERED_WORKERS: &str = "split_coordinator_registered_workers";
