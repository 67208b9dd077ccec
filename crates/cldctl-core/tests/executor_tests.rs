#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Integration tests for the executor against the real scheduler and
//! `cldctl_testing::MockPlugin`, covering the two invariants that need a
//! live `apply()` run rather than pure graph algebra:
//!
//! 4. **Happens-before**: a downstream node's resolved inputs see every
//!    field of an upstream node's outputs that existed when it completed.
//! 5. **Pass-through fallback**: an implicit node with no matching hook
//!    inherits its parent's outputs instead of failing.

use cldctl_core::builder::Builder;
use cldctl_core::events::TracingEventSink;
use cldctl_core::executor::Executor;
use cldctl_core::graph::{Graph, Verdict};
use cldctl_core::model::{DatacenterValue, Hook};
use cldctl_core::node::{Node, NodeState, NodeType};
use cldctl_core::value::{Value, ValueMap};
use cldctl_testing::{InMemoryStateBackend, MockPlugin, StaticSecretsManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn executor(datacenter: DatacenterValue, plugin: MockPlugin) -> Executor {
    Executor {
        datacenter,
        plugin: Arc::new(plugin),
        state_backend: Arc::new(InMemoryStateBackend::new()),
        secrets: Arc::new(StaticSecretsManager::new()),
        events: Arc::new(TracingEventSink::new()),
        worker_count: 4,
        cancellation: CancellationToken::new(),
        node_timeout: std::time::Duration::from_secs(30),
        fail_fast: false,
    }
}

/// Invariant 4: a deployment hook whose `inputs` template references the
/// upstream database's `url` output only ever sees the real, post-apply
/// value — never an empty/placeholder one.
#[tokio::test]
async fn downstream_worker_sees_upstream_outputs_before_it_runs() {
    let datacenter = DatacenterValue {
        name: "dc".to_string(),
        hooks: vec![
            Hook {
                node_type: NodeType::Database,
                when: None,
                module_source: "mock://database".to_string(),
                inputs: Default::default(),
                outputs: Default::default(),
            },
            Hook {
                node_type: NodeType::Deployment,
                when: None,
                module_source: "mock://deployment".to_string(),
                inputs: [("url".to_string(), "${{ databases.main.url }}".to_string())].into(),
                outputs: Default::default(),
            },
        ],
    };

    let mut db_outputs = ValueMap::new();
    db_outputs.insert("url".into(), Value::String("postgres://generated-at-runtime".into()));
    let plugin = MockPlugin::new().with_outputs_for(NodeType::Database, db_outputs);

    let mut graph = Graph::new("test", "dc");
    graph.add_node(Node::new(NodeType::Database, "comp", "main")).unwrap();
    graph.add_node(Node::new(NodeType::Deployment, "comp", "api")).unwrap();
    graph.add_edge("comp/deployment/api", "comp/database/main").unwrap();

    let ex = executor(datacenter, plugin.clone());
    let verdict = ex.apply(&mut graph).await.unwrap();
    assert_eq!(verdict, Verdict::Success);

    let deployment_call = plugin
        .apply_calls()
        .into_iter()
        .find(|c| c.node_id == "comp/deployment/api")
        .expect("deployment was applied");
    assert_eq!(
        deployment_call.inputs.get("url"),
        Some(&Value::String("postgres://generated-at-runtime".to_string()))
    );
}

/// Invariant 5: a `databaseUser` node with no matching hook at all (the
/// datacenter declares none) inherits its parent database's outputs
/// wholesale rather than failing with `HookNotMatched`.
#[tokio::test]
async fn hookless_implicit_node_falls_through_to_parent_outputs() {
    let datacenter = DatacenterValue {
        name: "dc".to_string(),
        hooks: vec![Hook {
            node_type: NodeType::Database,
            when: None,
            module_source: "mock://database".to_string(),
            inputs: Default::default(),
            outputs: Default::default(),
        }],
    };

    let mut graph = Graph::new("test", "dc");
    let mut db = Node::new(NodeType::Database, "comp", "main");
    let mut db_outputs = ValueMap::new();
    db_outputs.insert("url".into(), Value::String("postgres://parent".into()));
    db.outputs = db_outputs.clone();
    db.state = NodeState::Completed;
    graph.add_node(db).unwrap();

    let mut db_user = Node::new(NodeType::DatabaseUser, "comp", "main--api");
    db_user.depends_on.push("comp/database/main".to_string());
    graph.add_node(db_user).unwrap();
    graph.add_edge("comp/databaseUser/main--api", "comp/database/main").unwrap();

    let plugin = MockPlugin::new();
    let ex = executor(datacenter, plugin.clone());
    let verdict = ex.apply(&mut graph).await.unwrap();

    assert_eq!(verdict, Verdict::Success);
    let db_user_node = graph.node("comp/databaseUser/main--api").unwrap();
    assert_eq!(db_user_node.state, NodeState::Completed);
    assert_eq!(db_user_node.outputs, db_outputs);
    // The mock plugin was never invoked for the pass-through node.
    assert!(plugin.apply_calls().iter().all(|c| c.node_id != "comp/databaseUser/main--api"));
}

/// Builder-produced graph sanity check backing both invariants: wiring a
/// deployment against a real postgres database through the builder (rather
/// than hand-built nodes) produces the same happens-before shape.
#[tokio::test]
async fn builder_wired_graph_resolves_database_url_end_to_end() {
    let datacenter = DatacenterValue {
        name: "dc".to_string(),
        hooks: vec![
            Hook {
                node_type: NodeType::Database,
                when: None,
                module_source: "mock://database".to_string(),
                inputs: Default::default(),
                outputs: Default::default(),
            },
            Hook {
                node_type: NodeType::Deployment,
                when: None,
                module_source: "mock://deployment".to_string(),
                inputs: [("url".to_string(), "${{ databases.main.url }}".to_string())].into(),
                outputs: Default::default(),
            },
        ],
    };

    let component = cldctl_testing::deployment_with_database("api", "image:latest", "postgres:^16");
    let mut graph = Builder::new(&datacenter).build("test", &[component]).unwrap();

    let mut db_outputs = ValueMap::new();
    db_outputs.insert("url".into(), Value::String("postgres://builder-wired".into()));
    let plugin = MockPlugin::new().with_outputs_for(NodeType::Database, db_outputs);

    let ex = executor(datacenter, plugin.clone());
    let verdict = ex.apply(&mut graph).await.unwrap();
    assert_eq!(verdict, Verdict::Success);

    let deployment_call = plugin
        .apply_calls()
        .into_iter()
        .find(|c| c.node_id == "api/deployment/api")
        .expect("deployment was applied");
    assert_eq!(
        deployment_call.inputs.get("url"),
        Some(&Value::String("postgres://builder-wired".to_string()))
    );
}
