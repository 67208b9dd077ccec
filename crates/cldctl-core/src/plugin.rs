//! The `Plugin` trait (spec §6): the IaC transport boundary. `cldctl-core`
//! ships no production transport — a real implementation shells out to a
//! plugin binary over whatever protocol the datacenter's `module_source`
//! names — but the trait is what the executor drives, and
//! `cldctl_testing::MockPlugin` implements it for tests.

use crate::error::Result;
use crate::value::ValueMap;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Everything a `Plugin` call needs, assembled by the executor from a
/// matched hook plus resolved expression inputs (spec §4.4 step c-d).
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub node_id: String,
    /// Reference or path to the module the hook names.
    pub module_source: String,
    pub inputs: ValueMap,
    /// The state backend's last persisted bytes for this node, if any.
    pub state_in: Option<Vec<u8>>,
    pub env: HashMap<String, String>,
    pub cancellation: CancellationToken,
}

/// What `preview` reports without mutating anything.
#[derive(Debug, Clone, Default)]
pub struct PreviewResult {
    pub summary: String,
    pub projected_outputs: ValueMap,
}

/// What a successful `apply` returns: the node's new outputs plus opaque
/// state bytes for the state backend to persist.
#[derive(Debug, Clone, Default)]
pub struct ApplyResult {
    pub outputs: ValueMap,
    pub state_out: Vec<u8>,
}

/// What `refresh` reports: outputs as currently observed out-of-band.
#[derive(Debug, Clone, Default)]
pub struct RefreshResult {
    pub outputs: ValueMap,
    pub drifted: bool,
}

/// The IaC plugin boundary (spec §6). One call per node per phase; the
/// executor is the only caller. Implementations must respect
/// `RunOptions::cancellation` — on cancellation, terminate the underlying
/// process/call promptly rather than let it run to completion.
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn preview(&self, opts: RunOptions) -> Result<PreviewResult>;
    async fn apply(&self, opts: RunOptions) -> Result<ApplyResult>;
    async fn destroy(&self, opts: RunOptions) -> Result<()>;
    async fn refresh(&self, opts: RunOptions) -> Result<RefreshResult>;
}
