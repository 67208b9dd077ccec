//! Tunable defaults for the executor and its collaborators.

use std::time::Duration;

/// Default bound on the results channel the scheduler drains; sized well
/// above any realistic in-flight worker count so a worker never blocks on
/// send.
pub const DEFAULT_RESULTS_CHANNEL_CAPACITY: usize = 1024;

/// Default per-node timeout applied to a plugin `apply` call when the
/// caller does not override [`crate::executor::Executor::node_timeout`].
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Default heartbeat interval for a held state-backend lock.
pub const DEFAULT_LOCK_HEARTBEAT: Duration = Duration::from_secs(30);

/// Default lock staleness threshold: a lock whose last heartbeat is older
/// than this is eligible for an operator override break.
pub const DEFAULT_LOCK_STALE_AFTER: Duration = Duration::from_secs(5 * 60);
