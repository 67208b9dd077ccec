//! Small constructors for the abstract component/datacenter values the
//! builder consumes (spec §4.2, §6), so tests can stand up a [`Graph`]
//! without hand-writing every field of [`ComponentValue`]/[`DatacenterValue`].

use cldctl_core::builder::Builder;
use cldctl_core::graph::Graph;
use cldctl_core::model::{
    ComponentValue, DatabaseSpec, DatacenterValue, DependencySpec, Hook, WorkloadSpec,
};
use cldctl_core::node::NodeType;

/// A datacenter with one catch-all hook (`when: None`) per [`NodeType`],
/// each pointing at a nominal `mock://<kind>` module. Matches every
/// prospective node unconditionally — the simplest datacenter that makes
/// every resource kind provisionable.
pub fn catch_all_datacenter(name: impl Into<String>) -> DatacenterValue {
    let kinds = [
        NodeType::Database,
        NodeType::DatabaseUser,
        NodeType::Bucket,
        NodeType::EncryptionKey,
        NodeType::Smtp,
        NodeType::Deployment,
        NodeType::Function,
        NodeType::Service,
        NodeType::Route,
        NodeType::Cronjob,
        NodeType::DockerBuild,
        NodeType::Task,
        NodeType::Observability,
        NodeType::Port,
        NodeType::NetworkPolicy,
        NodeType::Secret,
    ];
    DatacenterValue {
        name: name.into(),
        hooks: kinds
            .into_iter()
            .map(|node_type| Hook {
                node_type,
                when: None,
                module_source: format!("mock://{}", node_type.id_tag()),
                inputs: Default::default(),
                outputs: Default::default(),
            })
            .collect(),
    }
}

/// A component with a single deployment workload named `name`, no
/// databases/buckets/dependencies.
pub fn deployment_component(name: impl Into<String>, image: impl Into<String>) -> ComponentValue {
    let name = name.into();
    ComponentValue {
        name: name.clone(),
        deployments: vec![WorkloadSpec {
            name,
            image: Some(image.into()),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// A component with a single `deployments` workload and one `databases`
/// entry, matching the common "web app with its own database" shape used
/// across the scenario tests.
pub fn deployment_with_database(
    name: impl Into<String>,
    image: impl Into<String>,
    db_type: impl Into<String>,
) -> ComponentValue {
    let mut component = deployment_component(name.into(), image);
    component.databases.push(DatabaseSpec {
        name: "main".to_string(),
        db_type: db_type.into(),
        migrations: None,
    });
    component
}

/// Adds a `dependencies` entry to `component` pointing at `target` under
/// `alias`.
pub fn with_dependency(
    mut component: ComponentValue,
    alias: impl Into<String>,
    target: impl Into<String>,
    optional: bool,
) -> ComponentValue {
    component.dependencies.push(DependencySpec {
        alias: alias.into(),
        target: target.into(),
        optional,
    });
    component
}

/// Build a graph for `components` against a fresh [`catch_all_datacenter`],
/// the shortest path to a runnable [`Graph`] in a test.
pub fn build_graph_with_catch_all(
    environment: &str,
    components: &[ComponentValue],
) -> cldctl_core::error::Result<Graph> {
    let datacenter = catch_all_datacenter("test-datacenter");
    Builder::new(&datacenter).build(environment, components)
}
