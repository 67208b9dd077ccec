//! The abstract values the out-of-scope component/datacenter loaders
//! produce (spec §1, §6) and that the [`crate::builder::Builder`] consumes.
//!
//! These are plain data — no YAML/HCL parsing lives here. Tests and
//! examples build them directly; a real CLI wires a schema parser in
//! front of them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A `${{ ... }}`-bearing string, or a plain literal. The builder does not
/// evaluate these; it only scans them for references while wiring edges
/// (spec §4.2 step 4). Evaluation happens later, against node outputs, via
/// [`crate::resolver`].
pub type ExprString = String;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Only set for top-level component `builds` entries, which declare a
    /// standalone `dockerBuild` node addressable as `${{ builds.<name>.* }}`.
    /// Inline builds (a workload's or migration's own `build` block) leave
    /// this `None`; the builder synthesizes that node's name from its owner.
    #[serde(default)]
    pub name: Option<String>,
    pub context: String,
    #[serde(default)]
    pub dockerfile: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeSpec {
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationsSpec {
    #[serde(default)]
    pub build: Option<BuildSpec>,
    #[serde(default)]
    pub runtime: Option<RuntimeSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSpec {
    pub name: String,
    /// Version-qualified type string, e.g. `postgres:^16`.
    pub db_type: String,
    #[serde(default)]
    pub migrations: Option<MigrationsSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BucketSpec {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortSpec {
    pub name: String,
    pub port: u16,
}

/// A workload resource: `deployment`, `function`, or `cronjob`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    #[serde(default)]
    pub image: Option<ExprString>,
    #[serde(default)]
    pub build: Option<BuildSpec>,
    /// Env var name -> value, where the value may contain `${{ ... }}`.
    #[serde(default)]
    pub environment: HashMap<String, ExprString>,
    /// Only meaningful for cronjobs; carried through untouched by the graph
    /// engine (consumed by the plugin).
    #[serde(default)]
    pub schedule: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub name: String,
    #[serde(default)]
    pub port: Option<ExprString>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteSpec {
    pub name: String,
    #[serde(default)]
    pub service: Option<ExprString>,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilitySpec {
    #[serde(default)]
    pub config: HashMap<String, ExprString>,
}

/// A `dependencies` entry: an alias this component uses in
/// `${{ dependencies.<alias>.outputs.* }}`, a target component (the
/// `:tag` suffix, if any, is stripped when recording `dependencyTargets`),
/// and whether the dependency is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    pub alias: String,
    pub target: String,
    #[serde(default)]
    pub optional: bool,
}

/// The abstract, validated value for one component (spec §1, §4.2).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentValue {
    pub name: String,
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
    #[serde(default)]
    pub databases: Vec<DatabaseSpec>,
    #[serde(default)]
    pub buckets: Vec<BucketSpec>,
    #[serde(default)]
    pub builds: Vec<BuildSpec>,
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    #[serde(default)]
    pub deployments: Vec<WorkloadSpec>,
    #[serde(default)]
    pub functions: Vec<WorkloadSpec>,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub observability: Option<ObservabilitySpec>,
    #[serde(default)]
    pub cronjobs: Vec<WorkloadSpec>,
    /// Output name -> expression string (recorded into
    /// `Graph::component_output_exprs`).
    #[serde(default)]
    pub outputs: HashMap<String, ExprString>,
}

/// One datacenter hook: a rule that, when its `when` clause matches a
/// prospective node's `inputs`, provisions it by evaluating `inputs`
/// (expression templates resolved against graph outputs) and projecting
/// `outputs` from the combined `{inputs, plugin outputs, upstream outputs}`
/// context (spec §4.4 step b-e).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Hook {
    pub node_type: crate::node::NodeType,
    /// HCL boolean expression over the prospective node's `inputs`. An
    /// absent/empty `when` matches unconditionally (the catch-all).
    #[serde(default)]
    pub when: Option<String>,
    /// Reference to the plugin module this hook invokes.
    pub module_source: String,
    /// Expression templates resolved against `inputs` before the plugin
    /// call.
    #[serde(default)]
    pub inputs: HashMap<String, ExprString>,
    /// Expression templates resolved against `{inputs, plugin outputs,
    /// upstream outputs}` after the plugin call, producing the node's
    /// observable `outputs`.
    #[serde(default)]
    pub outputs: HashMap<String, ExprString>,
}

/// The abstract, validated value for a datacenter: one hook per resource
/// kind it knows how to provision (spec §1, §4.2, §4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatacenterValue {
    pub name: String,
    pub hooks: Vec<Hook>,
}

impl DatacenterValue {
    /// Hooks declared for a given node type, in declaration order (the
    /// first whose `when` matches wins, spec §4.4 step b).
    pub fn hooks_for(&self, node_type: crate::node::NodeType) -> impl Iterator<Item = &Hook> {
        self.hooks.iter().filter(move |h| h.node_type == node_type)
    }
}
