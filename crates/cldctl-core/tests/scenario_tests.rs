#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end scenario tests (S1-S6): representative shapes the builder and
//! executor must produce together, each as one `#[tokio::test]`.

use cldctl_core::builder::Builder;
use cldctl_core::events::TracingEventSink;
use cldctl_core::executor::Executor;
use cldctl_core::graph::{Graph, Verdict};
use cldctl_core::model::{ComponentValue, DatabaseSpec, DatacenterValue, Hook, WorkloadSpec};
use cldctl_core::node::{Node, NodeType};
use cldctl_testing::{InMemoryStateBackend, MockPlugin, StaticSecretsManager};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn postgres_only_datacenter() -> DatacenterValue {
    DatacenterValue {
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
                node_type: NodeType::DatabaseUser,
                when: Some(r#"split(":", type)[0] == "postgres""#.to_string()),
                module_source: "mock://databaseUser".to_string(),
                inputs: Default::default(),
                outputs: Default::default(),
            },
            Hook {
                node_type: NodeType::Deployment,
                when: None,
                module_source: "mock://deployment".to_string(),
                inputs: Default::default(),
                outputs: Default::default(),
            },
            Hook {
                node_type: NodeType::Task,
                when: None,
                module_source: "mock://task".to_string(),
                inputs: Default::default(),
                outputs: Default::default(),
            },
        ],
    }
}

fn executor(datacenter: DatacenterValue) -> Executor {
    Executor {
        datacenter,
        plugin: Arc::new(MockPlugin::new()),
        state_backend: Arc::new(InMemoryStateBackend::new()),
        secrets: Arc::new(StaticSecretsManager::new()),
        events: Arc::new(TracingEventSink::new()),
        worker_count: 4,
        cancellation: CancellationToken::new(),
        node_timeout: std::time::Duration::from_secs(30),
        fail_fast: false,
    }
}

/// S1: two workloads fan out through one `databaseUser` each — no direct
/// database->workload edge is created once a matching hook exists.
#[tokio::test]
async fn s1_two_workload_fan_out_through_database_user() {
    let datacenter = postgres_only_datacenter();
    let component = ComponentValue {
        name: "webapp".to_string(),
        databases: vec![DatabaseSpec {
            name: "main".to_string(),
            db_type: "postgres:^16".to_string(),
            migrations: None,
        }],
        deployments: vec![
            WorkloadSpec {
                name: "api".to_string(),
                environment: [("DATABASE_URL".to_string(), "${{ databases.main.url }}".to_string())].into(),
                ..Default::default()
            },
            WorkloadSpec {
                name: "worker".to_string(),
                environment: [("DATABASE_URL".to_string(), "${{ databases.main.url }}".to_string())].into(),
                ..Default::default()
            },
        ],
        ..Default::default()
    };

    let graph = Builder::new(&datacenter).build("test", &[component]).unwrap();

    for id in [
        "webapp/database/main",
        "webapp/databaseUser/main--api",
        "webapp/databaseUser/main--worker",
        "webapp/deployment/api",
        "webapp/deployment/worker",
    ] {
        assert!(graph.node(id).is_some(), "missing node {id}");
    }

    let api = graph.node("webapp/deployment/api").unwrap();
    assert!(api.depends_on.contains(&"webapp/databaseUser/main--api".to_string()));
    assert!(!api.depends_on.contains(&"webapp/database/main".to_string()));

    let worker = graph.node("webapp/deployment/worker").unwrap();
    assert!(worker.depends_on.contains(&"webapp/databaseUser/main--worker".to_string()));
    assert!(!worker.depends_on.contains(&"webapp/database/main".to_string()));
}

/// S2: a mixed hook match — a postgres `databaseUser` hook does not match a
/// redis database, so that database wires directly to its consumer.
#[tokio::test]
async fn s2_mixed_hook_match_skips_database_user_for_non_matching_type() {
    let datacenter = postgres_only_datacenter();
    let component = ComponentValue {
        name: "webapp".to_string(),
        databases: vec![
            DatabaseSpec { name: "main".to_string(), db_type: "postgres:^16".to_string(), migrations: None },
            DatabaseSpec { name: "cache".to_string(), db_type: "redis:7".to_string(), migrations: None },
        ],
        deployments: vec![WorkloadSpec {
            name: "api".to_string(),
            environment: [
                ("DATABASE_URL".to_string(), "${{ databases.main.url }}".to_string()),
                ("CACHE_URL".to_string(), "${{ databases.cache.url }}".to_string()),
            ]
            .into(),
            ..Default::default()
        }],
        ..Default::default()
    };

    let graph = Builder::new(&datacenter).build("test", &[component]).unwrap();

    assert!(graph.node("webapp/databaseUser/main--api").is_some());
    assert!(graph.node("webapp/databaseUser/cache--api").is_none());

    let api = graph.node("webapp/deployment/api").unwrap();
    assert!(api.depends_on.contains(&"webapp/databaseUser/main--api".to_string()));
    assert!(api.depends_on.contains(&"webapp/database/cache".to_string()));
}

/// S3: a database with `migrations` interposes a task node; a deployment
/// referencing that database also depends on the migration task.
#[tokio::test]
async fn s3_migrations_interpose_a_task_node() {
    let datacenter = postgres_only_datacenter();
    let component = ComponentValue {
        name: "webapp".to_string(),
        databases: vec![DatabaseSpec {
            name: "main".to_string(),
            db_type: "postgres:^16".to_string(),
            migrations: Some(cldctl_core::model::MigrationsSpec {
                build: None,
                runtime: Some(cldctl_core::model::RuntimeSpec {
                    command: vec!["migrate".to_string(), "up".to_string()],
                    working_directory: None,
                }),
            }),
        }],
        deployments: vec![WorkloadSpec {
            name: "api".to_string(),
            environment: [("DATABASE_URL".to_string(), "${{ databases.main.url }}".to_string())].into(),
            ..Default::default()
        }],
        ..Default::default()
    };

    let graph = Builder::new(&datacenter).build("test", &[component]).unwrap();

    let task_id = "webapp/task/main-migration";
    assert!(graph.node(task_id).is_some());
    let task = graph.node(task_id).unwrap();
    assert!(task.depends_on.contains(&"webapp/database/main".to_string()));

    let api = graph.node("webapp/deployment/api").unwrap();
    assert!(api.depends_on.contains(&task_id.to_string()));
    assert!(api.depends_on.contains(&"webapp/databaseUser/main--api".to_string()));
}

/// S4: a node failing in the middle of a diamond skips everything
/// downstream of it while an unrelated sibling still completes.
#[tokio::test]
async fn s4_failure_propagates_to_descendants_only() {
    let datacenter = postgres_only_datacenter();
    let mut graph = Graph::new("test", "dc");
    for name in ["a", "b", "c", "d"] {
        graph.add_node(Node::new(NodeType::Task, "comp", name)).unwrap();
    }
    graph.add_edge("comp/task/b", "comp/task/a").unwrap();
    graph.add_edge("comp/task/c", "comp/task/b").unwrap();
    graph.add_edge("comp/task/d", "comp/task/a").unwrap();

    let plugin = MockPlugin::new();
    plugin.fail_next("comp/task/b");
    let ex = Executor {
        datacenter,
        plugin: Arc::new(plugin),
        state_backend: Arc::new(InMemoryStateBackend::new()),
        secrets: Arc::new(StaticSecretsManager::new()),
        events: Arc::new(TracingEventSink::new()),
        worker_count: 4,
        cancellation: CancellationToken::new(),
        node_timeout: std::time::Duration::from_secs(30),
        fail_fast: false,
    };

    let verdict = ex.apply(&mut graph).await.unwrap();
    assert_eq!(verdict, Verdict::Failure);

    use cldctl_core::node::NodeState;
    assert_eq!(graph.node("comp/task/a").unwrap().state, NodeState::Completed);
    assert_eq!(graph.node("comp/task/b").unwrap().state, NodeState::Failed);
    assert_eq!(graph.node("comp/task/c").unwrap().state, NodeState::Skipped);
    assert_eq!(graph.node("comp/task/d").unwrap().state, NodeState::Completed);
}

/// S5: adding a manual back-edge onto the S4 shape (A now depends on C)
/// turns it into a cycle; `topological_sort` reports it instead of
/// silently dropping nodes. The detector reports every node it could not
/// emit, which is a superset of the cycle's core membership {a, b, c} when
/// a downstream node (d) also depends on the blocked chain.
#[tokio::test]
async fn s5_cycle_detection_reports_the_involved_nodes() {
    let mut graph = Graph::new("test", "dc");
    for name in ["a", "b", "c", "d"] {
        graph.add_node(Node::new(NodeType::Task, "comp", name)).unwrap();
    }
    graph.add_edge("comp/task/b", "comp/task/a").unwrap();
    graph.add_edge("comp/task/c", "comp/task/b").unwrap();
    graph.add_edge("comp/task/d", "comp/task/a").unwrap();
    graph.add_edge("comp/task/a", "comp/task/c").unwrap();

    let err = graph.topological_sort().unwrap_err();
    let cldctl_core::error::Error::Cycle { involved } = err else {
        panic!("expected Error::Cycle, got {err:?}");
    };
    let ids: std::collections::HashSet<&str> = involved.iter().map(|f| f.id.as_str()).collect();
    for id in ["comp/task/a", "comp/task/b", "comp/task/c"] {
        assert!(ids.contains(id), "cycle report missing {id}: {ids:?}");
    }
}

/// S6: destroying a deployed graph tears down dependents before their
/// dependencies.
#[tokio::test]
async fn s6_destroy_order_is_dependents_before_dependencies() {
    let datacenter = postgres_only_datacenter();
    let mut graph = Graph::new("test", "dc");
    graph.add_node(Node::new(NodeType::Database, "comp", "main")).unwrap();
    graph.add_node(Node::new(NodeType::Deployment, "comp", "api")).unwrap();
    graph.add_edge("comp/deployment/api", "comp/database/main").unwrap();

    let plugin = Arc::new(MockPlugin::new());
    let ex = Executor {
        datacenter,
        plugin: plugin.clone(),
        state_backend: Arc::new(InMemoryStateBackend::new()),
        secrets: Arc::new(StaticSecretsManager::new()),
        events: Arc::new(TracingEventSink::new()),
        worker_count: 4,
        cancellation: CancellationToken::new(),
        node_timeout: std::time::Duration::from_secs(30),
        fail_fast: false,
    };

    assert_eq!(ex.apply(&mut graph).await.unwrap(), Verdict::Success);
    assert_eq!(ex.destroy(&mut graph).await.unwrap(), Verdict::Success);

    let destroyed = plugin.destroyed_ids();
    let api_pos = destroyed.iter().position(|id| id == "comp/deployment/api").expect("api destroyed");
    let db_pos = destroyed.iter().position(|id| id == "comp/database/main").expect("database destroyed");
    assert!(api_pos < db_pos, "expected api destroyed before database, got {destroyed:?}");
}

/// `reverse_topological_sort` itself (no executor involved) must emit
/// dependents before dependencies: for `api.depends_on = [database]`, the
/// order is `[api, database]`, not the deploy order `[database, api]`.
#[test]
fn reverse_topological_sort_orders_dependents_before_dependencies() {
    let mut graph = Graph::new("test", "dc");
    graph.add_node(Node::new(NodeType::Database, "comp", "main")).unwrap();
    graph.add_node(Node::new(NodeType::Deployment, "comp", "api")).unwrap();
    graph.add_edge("comp/deployment/api", "comp/database/main").unwrap();

    let order = graph.reverse_topological_sort().unwrap();
    assert_eq!(order, vec!["comp/deployment/api".to_string(), "comp/database/main".to_string()]);

    let forward = graph.topological_sort().unwrap();
    assert_eq!(forward, vec!["comp/database/main".to_string(), "comp/deployment/api".to_string()]);
}
