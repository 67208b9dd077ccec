//! The graph's atom: [`NodeType`], [`NodeState`], [`Instance`], and [`Node`]
//! itself (spec §3, §4.1).

use crate::value::ValueMap;
use serde::{Deserialize, Serialize};

/// The closed set of resource kinds a node can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Database,
    DatabaseUser,
    Bucket,
    EncryptionKey,
    Smtp,
    Deployment,
    Function,
    Service,
    Route,
    Cronjob,
    DockerBuild,
    Task,
    Observability,
    Port,
    NetworkPolicy,
    Secret,
}

impl NodeType {
    /// Workload kinds: the things a datacenter hook ultimately runs code for.
    pub fn is_workload(self) -> bool {
        matches!(
            self,
            NodeType::Deployment | NodeType::Function | NodeType::Cronjob | NodeType::Task
        )
    }

    /// Per-instance kinds: duplicated once per progressive-delivery instance.
    pub fn is_per_instance(self) -> bool {
        matches!(
            self,
            NodeType::Deployment
                | NodeType::Function
                | NodeType::Service
                | NodeType::Cronjob
                | NodeType::DockerBuild
                | NodeType::Port
        )
    }

    /// Shared kinds: the complement of per-instance, created once regardless
    /// of instance count.
    pub fn is_shared(self) -> bool {
        !self.is_per_instance()
    }

    /// The plural namespace an expression uses to address this kind, e.g.
    /// `databases.main.url` for [`NodeType::Database`].
    pub fn expression_namespace(self) -> &'static str {
        match self {
            NodeType::Database => "databases",
            NodeType::DatabaseUser => "databaseUsers",
            NodeType::Bucket => "buckets",
            NodeType::EncryptionKey => "encryptionKeys",
            NodeType::Smtp => "smtp",
            NodeType::Deployment => "deployments",
            NodeType::Function => "functions",
            NodeType::Service => "services",
            NodeType::Route => "routes",
            NodeType::Cronjob => "cronjobs",
            NodeType::DockerBuild => "builds",
            NodeType::Task => "tasks",
            NodeType::Observability => "observability",
            NodeType::Port => "ports",
            NodeType::NetworkPolicy => "networkPolicies",
            NodeType::Secret => "secrets",
        }
    }

    /// The lowerCamelCase tag used inside a node id, e.g. `database`,
    /// `databaseUser`, `dockerBuild`.
    pub fn id_tag(self) -> &'static str {
        match self {
            NodeType::Database => "database",
            NodeType::DatabaseUser => "databaseUser",
            NodeType::Bucket => "bucket",
            NodeType::EncryptionKey => "encryptionKey",
            NodeType::Smtp => "smtp",
            NodeType::Deployment => "deployment",
            NodeType::Function => "function",
            NodeType::Service => "service",
            NodeType::Route => "route",
            NodeType::Cronjob => "cronjob",
            NodeType::DockerBuild => "dockerBuild",
            NodeType::Task => "task",
            NodeType::Observability => "observability",
            NodeType::Port => "port",
            NodeType::NetworkPolicy => "networkPolicy",
            NodeType::Secret => "secret",
        }
    }
}

/// A node's lifecycle state (spec §3 Invariants 4 and 6, §4.1, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl Default for NodeState {
    fn default() -> Self {
        NodeState::Pending
    }
}

/// Progressive-delivery instance identity carried by a per-instance node,
/// and (for shared nodes in multi-instance mode) listed in [`Node::instances`]
/// so a shared hook can compute e.g. a traffic split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub name: String,
    pub weight: u32,
}

/// The graph's atom (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// `<component>/<type>/<name>`, or `<component>/<instance>/<type>/<name>`
    /// for per-instance nodes. Globally unique in a graph.
    pub id: String,
    pub node_type: NodeType,
    pub component: String,
    pub name: String,

    #[serde(default)]
    pub inputs: ValueMap,
    #[serde(default)]
    pub outputs: ValueMap,

    /// Ordered, unique-insertion upstream node ids.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Reverse adjacency, maintained in lock-step with `depends_on`.
    #[serde(default)]
    pub depended_on_by: Vec<String>,

    #[serde(default)]
    pub state: NodeState,

    /// Present only on per-instance nodes.
    #[serde(default)]
    pub instance: Option<Instance>,
    /// Present only on shared nodes built in multi-instance mode: every
    /// sibling instance, so a shared hook can see the whole set.
    #[serde(default)]
    pub instances: Vec<Instance>,
}

impl Node {
    /// `newNode` (spec §4.1): a shared/singleton node, id `<component>/<type>/<name>`.
    pub fn new(node_type: NodeType, component: impl Into<String>, name: impl Into<String>) -> Self {
        let component = component.into();
        let name = name.into();
        let id = format!("{component}/{}/{name}", node_type.id_tag());
        Node {
            id,
            node_type,
            component,
            name,
            inputs: ValueMap::new(),
            outputs: ValueMap::new(),
            depends_on: Vec::new(),
            depended_on_by: Vec::new(),
            state: NodeState::Pending,
            instance: None,
            instances: Vec::new(),
        }
    }

    /// `newInstanceNode` (spec §4.1): a per-instance node, id
    /// `<component>/<instance>/<type>/<name>`.
    pub fn new_instance(
        node_type: NodeType,
        component: impl Into<String>,
        instance_name: impl Into<String>,
        weight: u32,
        name: impl Into<String>,
    ) -> Self {
        let component = component.into();
        let instance_name = instance_name.into();
        let name = name.into();
        let id = format!(
            "{component}/{instance_name}/{}/{name}",
            node_type.id_tag()
        );
        Node {
            id,
            node_type,
            component,
            name,
            inputs: ValueMap::new(),
            outputs: ValueMap::new(),
            depends_on: Vec::new(),
            depended_on_by: Vec::new(),
            state: NodeState::Pending,
            instance: Some(Instance {
                name: instance_name,
                weight,
            }),
            instances: Vec::new(),
        }
    }

    /// Idempotent: adds `dependency_id` to `depends_on` unless already present.
    pub fn add_dependency(&mut self, dependency_id: impl Into<String>) {
        let id = dependency_id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
    }

    /// Idempotent: adds `dependent_id` to `depended_on_by` unless already present.
    pub fn add_dependent(&mut self, dependent_id: impl Into<String>) {
        let id = dependent_id.into();
        if !self.depended_on_by.contains(&id) {
            self.depended_on_by.push(id);
        }
    }

    /// `node.ready(g)` (spec §4.1): pending, and every upstream present in
    /// the graph is completed. Missing upstreams (filtered out elsewhere)
    /// never block readiness by themselves; use [`crate::graph::Graph::ready_nodes`]
    /// which resolves ids against the graph.
    pub fn is_ready(&self, upstream_states: impl IntoIterator<Item = NodeState>) -> bool {
        self.state == NodeState::Pending
            && upstream_states
                .into_iter()
                .all(|s| s == NodeState::Completed)
    }
}
