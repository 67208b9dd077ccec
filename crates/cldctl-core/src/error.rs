//! Crate-wide error taxonomy.
//!
//! Every failure mode the graph engine can produce is one variant of
//! [`Error`]. Variants carry structured fields rather than a rendered
//! message so callers (the CLI, tests, an API consumer) can branch on the
//! failure kind instead of parsing strings.

use thiserror::Error;

/// Result alias used throughout `cldctl-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// The phase of a plugin invocation during which a [`Error::Plugin`] occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginPhase {
    Preview,
    Apply,
    Destroy,
    Refresh,
}

impl std::fmt::Display for PluginPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PluginPhase::Preview => "preview",
            PluginPhase::Apply => "apply",
            PluginPhase::Destroy => "destroy",
            PluginPhase::Refresh => "refresh",
        };
        write!(f, "{s}")
    }
}

/// One node in the set a [`Error::Cycle`] reports as involved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleFragment {
    /// The node id.
    pub id: String,
    /// Its `dependsOn` list at the time the cycle was detected.
    pub depends_on: Vec<String>,
}

/// The stable error taxonomy for the graph engine (spec §7).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Attempted to add a node whose id already exists in the graph.
    #[error("duplicate node id: {id}")]
    DuplicateId { id: String },

    /// An edge referenced a node id that is not present in the graph.
    #[error("unknown node id: {id}")]
    UnknownNode { id: String },

    /// The builder produced an invalid reference (e.g. an unresolvable
    /// expression namespace, or a dependency alias with no target).
    #[error("invalid graph reference: {reason}")]
    GraphBuild { reason: String },

    /// `topologicalSort` could not emit every node: the graph has a cycle.
    #[error("dependency cycle involving {}", involved.iter().map(|f| f.id.as_str()).collect::<Vec<_>>().join(", "))]
    Cycle { involved: Vec<CycleFragment> },

    /// A declared (non-implicit) node matched no hook.
    #[error("no hook matched node {node_id} (type {node_type})")]
    HookNotMatched { node_id: String, node_type: String },

    /// The IaC plugin returned an error during `preview`/`apply`/`destroy`/`refresh`.
    #[error("plugin error during {phase} for {node_id}: {message} (exit status {exit_status:?})")]
    Plugin {
        node_id: String,
        phase: PluginPhase,
        message: String,
        exit_status: Option<i32>,
        stderr_tail: String,
    },

    /// The state backend failed to read, write, list, or lock a path.
    #[error("state backend error on {path}: {message}")]
    State { path: String, message: String },

    /// The state backend lock for a path is held by another process/run.
    #[error("state lock contention on {path}, held by {holder}")]
    LockContention { path: String, holder: String },

    /// An expression reference could not be resolved.
    #[error("unresolved expression reference: {reference}")]
    UnresolvedReference { reference: String },

    /// An expression reference formed a resolution cycle.
    #[error("cyclic expression reference: {}", chain.join(" -> "))]
    CyclicReference { chain: Vec<String> },

    /// A target node was present but the requested field was absent and no
    /// fallback applied.
    #[error("field {field} missing on node {node_id}")]
    FieldMissing { node_id: String, field: String },

    /// A secret reference (`${secret:...}`) could not be resolved.
    #[error("unresolved secret reference: {key}")]
    SecretNotFound { key: String },

    /// An unclosed `${secret:...}` token was found while resolving secrets.
    #[error("unclosed secret token in: {fragment}")]
    UnclosedSecretToken { fragment: String },

    /// The run was cancelled by the host (timeout or user interrupt).
    #[error("cancelled: {reason}")]
    Cancelled { reason: String },

    /// A structural problem surfaced by an out-of-scope loader (component
    /// or datacenter parsing). Normally caught before execution begins.
    #[error("validation error: {reason}")]
    Validation { reason: String },
}

impl Error {
    /// Construct an [`Error::Cycle`] from the raw involved ids and their
    /// current `dependsOn` snapshots, matching the deterministic ordering
    /// `topologicalSort` uses elsewhere (lexicographic by id).
    pub fn cycle(mut involved: Vec<CycleFragment>) -> Self {
        involved.sort_by(|a, b| a.id.cmp(&b.id));
        Error::Cycle { involved }
    }
}
