#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Property-based tests for the graph engine.
//!
//! These verify algebraic invariants that should hold for every graph the
//! builder can produce, using the proptest framework.
//!
//! ## Test categories
//!
//! 1. **Adjacency symmetry**: `depends_on`/`depended_on_by` always agree.
//! 2. **Acyclicity**: a builder-produced graph always admits a topological sort.
//! 3. **Determinism**: repeated `topological_sort()` calls return the same order.
//! 6. **Fan-out uniqueness**: at most one `databaseUser` per (database, consumer).
//! 7. **Skip closure**: every downstream of a failed node ends up skipped.
//! 8. **Instance isolation**: per-instance resources of distinct instances
//!    share no edges except through nodes the builder explicitly shares.

use cldctl_core::graph::Graph;
use cldctl_core::node::{Instance, Node, NodeState, NodeType};
use cldctl_testing::{
    build_graph_with_catch_all, deployment_component, deployment_with_database, with_dependency,
};
use proptest::prelude::*;
use std::collections::HashSet;

/// A small, valid component name: lowercase ascii, 1-8 chars.
fn component_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,7}"
}

fn db_type() -> impl Strategy<Value = String> {
    prop_oneof!["postgres", "mysql", "redis"].prop_map(str::to_string)
}

proptest! {
    /// Invariant 1: adjacency symmetry.
    #[test]
    fn adjacency_is_symmetric(
        names in prop::collection::vec(component_name(), 1..5),
        kind in db_type(),
    ) {
        let components: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(i, n)| deployment_with_database(format!("{n}{i}"), "image:latest", kind.clone()))
            .collect();
        let graph = build_graph_with_catch_all("test", &components).unwrap();

        for (id, node) in &graph.nodes {
            for dep in &node.depends_on {
                let Some(upstream) = graph.node(dep) else { continue };
                prop_assert!(upstream.depended_on_by.contains(id));
            }
            for dependent in &node.depended_on_by {
                let Some(downstream) = graph.node(dependent) else { continue };
                prop_assert!(downstream.depends_on.contains(id));
            }
        }
    }

    /// Invariant 2: no cycles in a builder-produced graph.
    #[test]
    fn builder_output_has_no_cycles(
        names in prop::collection::vec(component_name(), 1..6),
        kind in db_type(),
    ) {
        let components: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(i, n)| deployment_with_database(format!("{n}{i}"), "image:latest", kind.clone()))
            .collect();
        let graph = build_graph_with_catch_all("test", &components).unwrap();
        prop_assert!(graph.topological_sort().is_ok());
    }

    /// Invariant 3: determinism — repeated calls return the same sequence.
    #[test]
    fn topological_sort_is_deterministic(
        names in prop::collection::vec(component_name(), 1..6),
        kind in db_type(),
    ) {
        let components: Vec<_> = names
            .iter()
            .enumerate()
            .map(|(i, n)| deployment_with_database(format!("{n}{i}"), "image:latest", kind.clone()))
            .collect();
        let graph = build_graph_with_catch_all("test", &components).unwrap();
        let first = graph.topological_sort().unwrap();
        let second = graph.topological_sort().unwrap();
        let third = graph.topological_sort().unwrap();
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(&second, &third);
    }

    /// Invariant 6: fan-out uniqueness — one `databaseUser` per
    /// (database, consumer) pair no matter how many fields reference it.
    #[test]
    fn database_user_fan_out_is_unique(field_count in 1usize..5) {
        let mut component = deployment_with_database("api", "image:latest", "postgres:^16");
        let deployment = &mut component.deployments[0];
        for i in 0..field_count {
            deployment.environment.insert(
                format!("VAR_{i}"),
                "${{ databases.main.url }}".to_string(),
            );
        }
        let graph = build_graph_with_catch_all("test", std::slice::from_ref(&component)).unwrap();
        let db_users: Vec<_> = graph.nodes_of_type(NodeType::DatabaseUser).collect();
        prop_assert_eq!(db_users.len(), 1);
    }
}

/// Invariant 7: skip closure — a hand-built diamond where the middle node
/// fails skips every node reachable from it, never completes them.
#[test]
fn skip_closure_reaches_every_downstream_of_a_failure() {
    let mut graph = Graph::new("test", "dc");
    for name in ["a", "b", "c", "d"] {
        graph.add_node(Node::new(NodeType::Task, "comp", name)).unwrap();
    }
    let a = "comp/task/a".to_string();
    let b = "comp/task/b".to_string();
    let c = "comp/task/c".to_string();
    let d = "comp/task/d".to_string();
    graph.add_edge(&b, &a).unwrap();
    graph.add_edge(&c, &b).unwrap();
    graph.add_edge(&d, &a).unwrap();

    graph.node_mut(&a).unwrap().state = NodeState::Completed;
    graph.node_mut(&b).unwrap().state = NodeState::Failed;

    // Mirrors `Executor::propagate_skips`: a frontier walk over `depended_on_by`.
    let mut frontier: Vec<String> = graph.node(&b).unwrap().depended_on_by.clone();
    let mut visited: HashSet<String> = HashSet::new();
    while let Some(id) = frontier.pop() {
        if !visited.insert(id.clone()) {
            continue;
        }
        let node = graph.node_mut(&id).unwrap();
        if node.state == NodeState::Pending {
            node.state = NodeState::Skipped;
            frontier.extend(node.depended_on_by.clone());
        }
    }

    assert_eq!(graph.node(&c).unwrap().state, NodeState::Skipped);
    assert_eq!(graph.node(&d).unwrap().state, NodeState::Completed);
}

/// Invariant 8: instance isolation — two instances' per-instance deployment
/// nodes share no edges with one another, only (optionally) with a shared
/// node the builder wires explicitly.
#[test]
fn distinct_instances_share_no_direct_edges() {
    let component = deployment_component("api", "image:latest");
    let instances = vec![
        Instance { name: "blue".into(), weight: 100 },
        Instance { name: "green".into(), weight: 0 },
    ];
    let mut graph = Graph::new("test", "dc");
    let datacenter = cldctl_testing::catch_all_datacenter("dc");
    let builder = cldctl_core::builder::Builder::new(&datacenter);
    builder
        .add_component_with_instances(&mut graph, &component, &instances, &[])
        .unwrap();

    let blue_id = "api/blue/deployment/api";
    let green_id = "api/green/deployment/api";
    assert!(graph.node(blue_id).is_some());
    assert!(graph.node(green_id).is_some());

    let blue = graph.node(blue_id).unwrap();
    let green = graph.node(green_id).unwrap();
    assert!(!blue.depends_on.contains(&green_id.to_string()));
    assert!(!blue.depended_on_by.contains(&green_id.to_string()));
    assert!(!green.depends_on.contains(&blue_id.to_string()));
    assert!(!green.depended_on_by.contains(&blue_id.to_string()));
}

/// `with_dependency` sanity check exercised alongside the property suite:
/// a component-level dependency is recorded without creating a node edge.
#[test]
fn component_dependency_metadata_does_not_create_node_edges() {
    let consumer = with_dependency(deployment_component("api", "image:latest"), "db", "shared-db", false);
    let graph = build_graph_with_catch_all("test", &[consumer]).unwrap();
    assert_eq!(
        graph.component_dependencies.get("api").map(Vec::as_slice),
        Some(&["shared-db".to_string()][..])
    );
}
