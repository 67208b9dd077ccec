//! [`Graph`]: the node set plus component-level metadata the builder
//! records, and the queries/topological sorts the executor drives off of
//! (spec §3, §4.1).

use crate::error::{CycleFragment, Error, Result};
use crate::node::{Node, NodeState, NodeType};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::cmp::Reverse;

/// The node set plus the component-level metadata the builder records
/// while lowering components and the datacenter into nodes (spec §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Graph {
    /// Insertion-ordered so iteration order is deterministic independent of
    /// hashing, even before a topological sort is requested.
    pub nodes: IndexMap<String, Node>,
    pub environment: String,
    pub datacenter: String,

    /// Non-optional component dependencies: component -> [component].
    #[serde(default)]
    pub component_dependencies: HashMap<String, Vec<String>>,
    /// Optional component dependencies: component -> set<dependency component>.
    #[serde(default)]
    pub optional_dependencies: HashMap<String, HashSet<String>>,
    /// Dependency alias -> target component name, per component.
    #[serde(default)]
    pub dependency_targets: HashMap<String, HashMap<String, String>>,
    /// Output expression name -> expression string, per component.
    #[serde(default)]
    pub component_output_exprs: HashMap<String, HashMap<String, String>>,
}

/// The outcome of a full scheduler run (spec §7, §8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure,
}

impl Graph {
    pub fn new(environment: impl Into<String>, datacenter: impl Into<String>) -> Self {
        Graph {
            nodes: IndexMap::new(),
            environment: environment.into(),
            datacenter: datacenter.into(),
            component_dependencies: HashMap::new(),
            optional_dependencies: HashMap::new(),
            dependency_targets: HashMap::new(),
            component_output_exprs: HashMap::new(),
        }
    }

    /// `addNode` (spec §4.1): fails with [`Error::DuplicateId`] if present.
    pub fn add_node(&mut self, node: Node) -> Result<()> {
        if self.nodes.contains_key(&node.id) {
            return Err(Error::DuplicateId { id: node.id });
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    /// `addEdge` (spec §4.1): `dependent` depends on `dependency`. Fails with
    /// [`Error::UnknownNode`] if either id is absent.
    pub fn add_edge(&mut self, dependent: &str, dependency: &str) -> Result<()> {
        if !self.nodes.contains_key(dependent) {
            return Err(Error::UnknownNode {
                id: dependent.to_string(),
            });
        }
        if !self.nodes.contains_key(dependency) {
            return Err(Error::UnknownNode {
                id: dependency.to_string(),
            });
        }
        self.nodes
            .get_mut(dependent)
            .expect("presence checked above")
            .add_dependency(dependency);
        self.nodes
            .get_mut(dependency)
            .expect("presence checked above")
            .add_dependent(dependent);
        Ok(())
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn nodes_of_type(&self, node_type: NodeType) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(move |n| n.node_type == node_type)
    }

    pub fn nodes_of_component<'a>(&'a self, component: &'a str) -> impl Iterator<Item = &'a Node> {
        self.nodes.values().filter(move |n| n.component == component)
    }

    /// Every `dependsOn` id that is actually present in the graph. Used by
    /// `topologicalSort` and readiness to treat missing ids (external or
    /// optional references) as non-blocking.
    fn present_deps<'a>(&'a self, node: &'a Node) -> impl Iterator<Item = &'a str> {
        node.depends_on
            .iter()
            .filter(move |d| self.nodes.contains_key(d.as_str()))
            .map(|d| d.as_str())
    }

    /// A node is ready iff pending and every *present* upstream is completed.
    pub fn is_ready(&self, id: &str) -> bool {
        match self.nodes.get(id) {
            Some(n) if n.state == NodeState::Pending => self
                .present_deps(n)
                .all(|d| self.nodes.get(d).map(|u| u.state) == Some(NodeState::Completed)),
            _ => false,
        }
    }

    /// All currently-ready node ids, in deterministic (lexicographic) order.
    pub fn ready_nodes(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .nodes
            .keys()
            .filter(|id| self.is_ready(id))
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn all_completed(&self) -> bool {
        self.nodes.values().all(|n| n.state == NodeState::Completed)
    }

    pub fn has_failed(&self) -> bool {
        self.nodes.values().any(|n| n.state == NodeState::Failed)
    }

    /// Overall verdict once no worker is in-flight and no node is ready
    /// (spec §4.4 step 2, §7): success iff every node completed and none
    /// failed or was skipped.
    pub fn verdict(&self) -> Verdict {
        let all_resolved = self
            .nodes
            .values()
            .all(|n| matches!(n.state, NodeState::Completed | NodeState::Failed | NodeState::Skipped));
        if all_resolved && self.all_completed() {
            Verdict::Success
        } else {
            Verdict::Failure
        }
    }

    /// Kahn's algorithm with lexicographic tie-breaking on node id, using
    /// only `depends_on` ids present in the graph (spec §4.1). Returns
    /// [`Error::Cycle`] with the involved ids' `dependsOn` fragments if
    /// fewer nodes are emitted than present.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        self.kahn(false)
    }

    /// The reverse of `topological_sort`; used for destroy ordering
    /// (spec §4.4 Destroy, S6). `kahn(true)` already walks the reversed edge
    /// set (dependents before dependencies), so its raw output is the
    /// destroy order — no further reversal needed.
    pub fn reverse_topological_sort(&self) -> Result<Vec<String>> {
        self.kahn(true)
    }

    fn kahn(&self, reverse_edges: bool) -> Result<Vec<String>> {
        // in_degree(n) counts present upstreams of n in the forward
        // direction; `reverse_edges` walks dependents instead so the same
        // routine produces both orders.
        let mut in_degree: HashMap<&str, usize> = HashMap::with_capacity(self.nodes.len());
        let mut forward: HashMap<&str, Vec<&str>> = HashMap::with_capacity(self.nodes.len());

        for id in self.nodes.keys() {
            in_degree.entry(id.as_str()).or_insert(0);
            forward.entry(id.as_str()).or_default();
        }

        for (id, node) in &self.nodes {
            let preds = self.present_deps(node);
            for p in preds {
                if reverse_edges {
                    // reverse order: edges run dependency -> dependent,
                    // i.e. p is now downstream of id.
                    *in_degree.get_mut(p).expect("known id") += 1;
                    forward.get_mut(id.as_str()).expect("known id").push(p);
                } else {
                    *in_degree.get_mut(id.as_str()).expect("known id") += 1;
                    forward.get_mut(p).expect("known id").push(id.as_str());
                }
            }
        }

        let mut heap: BinaryHeap<Reverse<&str>> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| Reverse(*id))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(id)) = heap.pop() {
            order.push(id.to_string());
            for &next in &forward[id] {
                let deg = in_degree.get_mut(next).expect("known id");
                *deg -= 1;
                if *deg == 0 {
                    heap.push(Reverse(next));
                }
            }
        }

        if order.len() < self.nodes.len() {
            let emitted: HashSet<&str> = order.iter().map(|s| s.as_str()).collect();
            let involved = self
                .nodes
                .iter()
                .filter(|(id, _)| !emitted.contains(id.as_str()))
                .map(|(id, n)| CycleFragment {
                    id: id.clone(),
                    depends_on: n.depends_on.clone(),
                })
                .collect();
            return Err(Error::cycle(involved));
        }

        Ok(order)
    }
}
