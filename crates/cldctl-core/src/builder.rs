//! Lowers validated component + datacenter models into a [`Graph`]
//! (spec §4.2). This is the half of the engine that runs once, before any
//! plugin is invoked: it never touches `outputs`, only `inputs` and edges.

use crate::error::Result;
use crate::filter::build_filter;
use crate::graph::Graph;
use crate::model::{ComponentValue, DatacenterValue, WorkloadSpec};
use crate::node::{Instance, Node, NodeType};
use crate::value::Value;
use std::collections::HashMap;

/// Lowers one or more [`ComponentValue`]s against a [`DatacenterValue`]
/// into a [`Graph`] (spec §4.2).
pub struct Builder<'dc> {
    datacenter: &'dc DatacenterValue,
}

/// Per-component scratch state for the wiring pass: the interposed nodes
/// created so far, keyed so repeated references dedupe (spec §4.2 step 4,
/// Testable Property 6 "Fan-out uniqueness").
#[derive(Default)]
struct WiringState {
    database_users: HashMap<(String, String), String>,
    network_policies: HashMap<(String, String), String>,
}

impl<'dc> Builder<'dc> {
    pub fn new(datacenter: &'dc DatacenterValue) -> Self {
        Builder { datacenter }
    }

    /// Build a graph for `components` in single-instance mode.
    pub fn build(&self, environment: &str, components: &[ComponentValue]) -> Result<Graph> {
        let mut graph = Graph::new(environment, self.datacenter.name.clone());
        for component in components {
            self.add_component(&mut graph, component, None, &[])?;
        }
        Ok(graph)
    }

    /// `addComponentWithInstances` (spec §4.2 Multi-instance mode): builds
    /// one component under progressive delivery, partitioning per-instance
    /// vs shared resource kinds. `distinct_list` names shared-kind
    /// resources (by name) to promote to per-instance anyway.
    pub fn add_component_with_instances(
        &self,
        graph: &mut Graph,
        component: &ComponentValue,
        instances: &[Instance],
        distinct_list: &[String],
    ) -> Result<()> {
        self.add_component(graph, component, Some(instances), distinct_list)
    }

    fn add_component(
        &self,
        graph: &mut Graph,
        component: &ComponentValue,
        instances: Option<&[Instance]>,
        distinct_list: &[String],
    ) -> Result<()> {
        self.record_component_metadata(graph, component);
        self.declare_resources(graph, component, instances, distinct_list)?;

        let mut wiring = WiringState::default();
        self.wire_workloads(graph, component, instances, distinct_list, &mut wiring)?;
        self.wire_services(graph, component, instances, distinct_list)?;
        self.wire_observability(graph, component, instances, distinct_list)?;
        Ok(())
    }

    // ---- Step 1: component-level metadata ---------------------------------

    fn record_component_metadata(&self, graph: &mut Graph, component: &ComponentValue) {
        for dep in &component.dependencies {
            let target = strip_tag(&dep.target);
            if dep.optional {
                graph
                    .optional_dependencies
                    .entry(component.name.clone())
                    .or_default()
                    .insert(dep.alias.clone());
            } else {
                graph
                    .component_dependencies
                    .entry(component.name.clone())
                    .or_default()
                    .push(target.clone());
            }
            graph
                .dependency_targets
                .entry(component.name.clone())
                .or_default()
                .insert(dep.alias.clone(), target);
        }
        if !component.outputs.is_empty() {
            graph
                .component_output_exprs
                .insert(component.name.clone(), component.outputs.clone());
        }
    }

    // ---- Step 2+3: declare resource nodes + synthesise implicit nodes -----

    fn declare_resources(
        &self,
        graph: &mut Graph,
        component: &ComponentValue,
        instances: Option<&[Instance]>,
        distinct_list: &[String],
    ) -> Result<()> {
        let comp = &component.name;

        for db in &component.databases {
            let mut node = Node::new(NodeType::Database, comp, &db.name);
            node.inputs.insert("type".into(), Value::String(db.db_type.clone()));
            apply_shared_instances(&mut node, instances, distinct_list);
            graph.add_node(node)?;

            if let Some(migrations) = &db.migrations {
                let task_name = format!("{}-migration", db.name);
                let task = Node::new(NodeType::Task, comp, &task_name);
                let task_id = task.id.clone();
                let db_id = format!("{comp}/{}/{}", NodeType::Database.id_tag(), db.name);
                graph.add_node(task)?;
                graph.add_edge(&task_id, &db_id)?;

                if let Some(build) = &migrations.build {
                    let mut build_node = Node::new(NodeType::DockerBuild, comp, format!("{task_name}-build"));
                    build_node
                        .inputs
                        .insert("context".into(), Value::String(build.context.clone()));
                    if let Some(dockerfile) = &build.dockerfile {
                        build_node
                            .inputs
                            .insert("dockerfile".into(), Value::String(dockerfile.clone()));
                    }
                    let build_id = build_node.id.clone();
                    graph.add_node(build_node)?;
                    graph.add_edge(&task_id, &build_id)?;
                }

                if let Some(runtime) = &migrations.runtime {
                    let working_directory = runtime
                        .working_directory
                        .clone()
                        .unwrap_or_else(|| format!("./{comp}"));
                    if let Some(t) = graph.node_mut(&task_id) {
                        t.inputs.insert(
                            "command".into(),
                            Value::List(runtime.command.iter().cloned().map(Value::String).collect()),
                        );
                        t.inputs
                            .insert("workingDirectory".into(), Value::String(working_directory));
                    }
                }
            }
        }

        for build in &component.builds {
            if let Some(name) = &build.name {
                let mut node = Node::new(NodeType::DockerBuild, comp, name);
                node.inputs.insert("context".into(), Value::String(build.context.clone()));
                if let Some(dockerfile) = &build.dockerfile {
                    node.inputs.insert("dockerfile".into(), Value::String(dockerfile.clone()));
                }
                graph.add_node(node)?;
            }
        }

        for bucket in &component.buckets {
            let mut node = Node::new(NodeType::Bucket, comp, &bucket.name);
            apply_shared_instances(&mut node, instances, distinct_list);
            graph.add_node(node)?;
        }

        for port in &component.ports {
            self.declare_maybe_per_instance(
                graph,
                comp,
                NodeType::Port,
                &port.name,
                instances,
                distinct_list,
                |node| {
                    node.inputs.insert("port".into(), Value::Number(port.port as f64));
                },
            )?;
        }

        for deployment in &component.deployments {
            self.declare_workload(graph, comp, NodeType::Deployment, deployment, instances, distinct_list)?;
        }
        for function in &component.functions {
            self.declare_workload(graph, comp, NodeType::Function, function, instances, distinct_list)?;
        }

        for service in &component.services {
            self.declare_maybe_per_instance(
                graph,
                comp,
                NodeType::Service,
                &service.name,
                instances,
                distinct_list,
                |node| {
                    if let Some(port) = &service.port {
                        node.inputs.insert("port".into(), Value::String(port.clone()));
                    }
                },
            )?;
        }

        for route in &component.routes {
            let mut node = Node::new(NodeType::Route, comp, &route.name);
            apply_shared_instances(&mut node, instances, distinct_list);
            if let Some(service) = &route.service {
                node.inputs.insert("service".into(), Value::String(service.clone()));
            }
            if let Some(path) = &route.path {
                node.inputs.insert("path".into(), Value::String(path.clone()));
            }
            graph.add_node(node)?;
        }

        if let Some(observability) = &component.observability {
            let mut node = Node::new(NodeType::Observability, comp, "observability");
            apply_shared_instances(&mut node, instances, distinct_list);
            for (k, v) in &observability.config {
                node.inputs.insert(k.clone(), Value::String(v.clone()));
            }
            graph.add_node(node)?;
        }

        for cronjob in &component.cronjobs {
            self.declare_workload(graph, comp, NodeType::Cronjob, cronjob, instances, distinct_list)?;
        }

        Ok(())
    }

    fn declare_workload(
        &self,
        graph: &mut Graph,
        comp: &str,
        node_type: NodeType,
        workload: &WorkloadSpec,
        instances: Option<&[Instance]>,
        distinct_list: &[String],
    ) -> Result<()> {
        self.declare_maybe_per_instance(
            graph,
            comp,
            node_type,
            &workload.name,
            instances,
            distinct_list,
            |node| {
                if let Some(image) = &workload.image {
                    node.inputs.insert("image".into(), Value::String(image.clone()));
                }
                for (k, v) in &workload.environment {
                    node.inputs
                        .entry("environment".to_string())
                        .or_insert_with(|| Value::Map(HashMap::new()));
                    if let Some(Value::Map(env)) = node.inputs.get_mut("environment") {
                        env.insert(k.clone(), Value::String(v.clone()));
                    }
                }
                if let Some(schedule) = &workload.schedule {
                    node.inputs.insert("schedule".into(), Value::String(schedule.clone()));
                }
            },
        )?;

        if let Some(build) = &workload.build {
            let build_name = format!("{}-build", workload.name);
            for id in self.declared_ids(comp, node_type, &workload.name, instances, distinct_list) {
                let build_id = match instance_of(&id) {
                    Some(instance) => format!("{comp}/{instance}/{}/{build_name}", NodeType::DockerBuild.id_tag()),
                    None => format!("{comp}/{}/{build_name}", NodeType::DockerBuild.id_tag()),
                };
                if graph.node(&build_id).is_none() {
                    // A build's own weight is never read (only the workload
                    // instance's weight matters for traffic splitting).
                    let mut build_node = match instance_of(&id) {
                        Some(instance) => Node::new_instance(NodeType::DockerBuild, comp, instance, 0, &build_name),
                        None => Node::new(NodeType::DockerBuild, comp, &build_name),
                    };
                    build_node
                        .inputs
                        .insert("context".into(), Value::String(build.context.clone()));
                    if let Some(dockerfile) = &build.dockerfile {
                        build_node
                            .inputs
                            .insert("dockerfile".into(), Value::String(dockerfile.clone()));
                    }
                    graph.add_node(build_node)?;
                }
                graph.add_edge(&id, &build_id)?;
            }
        }
        Ok(())
    }

    /// Declare a resource that is per-instance only under multi-instance
    /// mode and a resource explicitly named in `distinct_list`; otherwise a
    /// single shared node (spec §4.2 Multi-instance mode).
    fn declare_maybe_per_instance(
        &self,
        graph: &mut Graph,
        comp: &str,
        node_type: NodeType,
        name: &str,
        instances: Option<&[Instance]>,
        distinct_list: &[String],
        mut populate: impl FnMut(&mut Node),
    ) -> Result<()> {
        match instances {
            Some(instances) if is_effectively_per_instance(node_type, name, distinct_list) => {
                for instance in instances {
                    let mut node =
                        Node::new_instance(node_type, comp, &instance.name, instance.weight, name);
                    populate(&mut node);
                    graph.add_node(node)?;
                }
            }
            Some(instances) => {
                let mut node = Node::new(node_type, comp, name);
                node.instances = instances.to_vec();
                populate(&mut node);
                graph.add_node(node)?;
            }
            None => {
                let mut node = Node::new(node_type, comp, name);
                populate(&mut node);
                graph.add_node(node)?;
            }
        }
        Ok(())
    }

    /// All node ids a declared resource occupies (one per instance if
    /// per-instance, otherwise the single shared id).
    fn declared_ids(
        &self,
        comp: &str,
        node_type: NodeType,
        name: &str,
        instances: Option<&[Instance]>,
        distinct_list: &[String],
    ) -> Vec<String> {
        match instances {
            Some(instances) if is_effectively_per_instance(node_type, name, distinct_list) => {
                instances
                    .iter()
                    .map(|i| format!("{comp}/{}/{}/{name}", i.name, node_type.id_tag()))
                    .collect()
            }
            _ => vec![format!("{comp}/{}/{name}", node_type.id_tag())],
        }
    }

    // ---- Step 4/5: wire expressions + observability fan-in ---------------

    fn wire_workloads(
        &self,
        graph: &mut Graph,
        component: &ComponentValue,
        instances: Option<&[Instance]>,
        distinct_list: &[String],
        wiring: &mut WiringState,
    ) -> Result<()> {
        let comp = component.name.clone();
        let mut jobs: Vec<(NodeType, &WorkloadSpec)> = Vec::new();
        for d in &component.deployments {
            jobs.push((NodeType::Deployment, d));
        }
        for f in &component.functions {
            jobs.push((NodeType::Function, f));
        }
        for c in &component.cronjobs {
            jobs.push((NodeType::Cronjob, c));
        }

        for (node_type, workload) in jobs {
            for workload_id in
                self.declared_ids(&comp, node_type, &workload.name, instances, distinct_list)
            {
                let instance_name = instance_of(&workload_id);
                let mut fields: Vec<&str> = workload.environment.values().map(|s| s.as_str()).collect();
                if let Some(image) = &workload.image {
                    fields.push(image);
                }
                for field in fields {
                    for reference in extract_references(field) {
                        self.wire_workload_reference(
                            graph,
                            &comp,
                            &workload_id,
                            node_type,
                            instance_name.as_deref(),
                            &reference,
                            wiring,
                        )?;
                    }
                }
            }
        }
        Ok(())
    }

    fn wire_workload_reference(
        &self,
        graph: &mut Graph,
        comp: &str,
        workload_id: &str,
        workload_type: NodeType,
        instance: Option<&str>,
        reference: &ParsedReference,
        wiring: &mut WiringState,
    ) -> Result<()> {
        let Some(target_id) = resolve_target_id(graph, comp, instance, reference) else {
            return Ok(());
        };
        let Some(target_node) = graph.node(&target_id) else {
            return Ok(());
        };
        let target_type = target_node.node_type;

        match target_type {
            NodeType::Database if workload_type.is_workload() => {
                let db_type = target_node
                    .inputs
                    .get("type")
                    .map(|v| v.as_interpolated_string())
                    .unwrap_or_default();
                let filter_inputs = database_user_filter_inputs(
                    &target_id,
                    &db_type,
                    workload_id,
                    workload_type,
                );
                let filter = build_filter(self.datacenter, NodeType::DatabaseUser);
                if filter(&filter_inputs) {
                    let key = (target_id.clone(), workload_id.to_string());
                    let db_user_id = if let Some(existing) = wiring.database_users.get(&key) {
                        existing.clone()
                    } else {
                        let consumer_name = node_name_segment(workload_id);
                        let db_name = node_name_segment(&target_id);
                        let mut db_user = Node::new(
                            NodeType::DatabaseUser,
                            comp,
                            format!("{db_name}--{consumer_name}"),
                        );
                        db_user.inputs = filter_inputs.clone();
                        graph.add_node(db_user.clone())?;
                        graph.add_edge(&db_user.id, &target_id)?;
                        wiring.database_users.insert(key, db_user.id.clone());
                        db_user.id
                    };
                    graph.add_edge(workload_id, &db_user_id)?;
                } else {
                    graph.add_edge(workload_id, &target_id)?;
                }
                self.propagate_task_dependencies(graph, workload_id, &target_id)?;
            }
            NodeType::Service if workload_type.is_workload() => {
                let filter_inputs = network_policy_filter_inputs(workload_id, workload_type, &target_id);
                let filter = build_filter(self.datacenter, NodeType::NetworkPolicy);
                if filter(&filter_inputs) {
                    let key = (workload_id.to_string(), target_id.clone());
                    if !wiring.network_policies.contains_key(&key) {
                        let from_name = node_name_segment(workload_id);
                        let to_name = node_name_segment(&target_id);
                        let mut policy = Node::new(
                            NodeType::NetworkPolicy,
                            comp,
                            format!("{from_name}--{to_name}"),
                        );
                        policy.inputs = filter_inputs;
                        graph.add_node(policy.clone())?;
                        graph.add_edge(&policy.id, workload_id)?;
                        graph.add_edge(&policy.id, &target_id)?;
                        wiring.network_policies.insert(key, policy.id);
                    }
                } else {
                    graph.add_edge(workload_id, &target_id)?;
                }
                self.propagate_task_dependencies(graph, workload_id, &target_id)?;
            }
            _ => {
                graph.add_edge(workload_id, &target_id)?;
                self.propagate_task_dependencies(graph, workload_id, &target_id)?;
            }
        }
        Ok(())
    }

    /// "also add edges from the workload to any task nodes that already
    /// depend on the target" (spec §4.2 step 4, scenario S3).
    fn propagate_task_dependencies(&self, graph: &mut Graph, workload_id: &str, target_id: &str) -> Result<()> {
        let task_ids: Vec<String> = graph
            .nodes_of_type(NodeType::Task)
            .filter(|t| t.depends_on.contains(&target_id.to_string()))
            .map(|t| t.id.clone())
            .collect();
        for task_id in task_ids {
            graph.add_edge(workload_id, &task_id)?;
        }
        Ok(())
    }

    fn wire_services(
        &self,
        graph: &mut Graph,
        component: &ComponentValue,
        instances: Option<&[Instance]>,
        distinct_list: &[String],
    ) -> Result<()> {
        let comp = component.name.clone();
        for service in &component.services {
            let Some(port_field) = &service.port else { continue };
            for service_id in
                self.declared_ids(&comp, NodeType::Service, &service.name, instances, distinct_list)
            {
                let instance_name = instance_of(&service_id);
                for reference in extract_references(port_field) {
                    if let Some(target_id) =
                        resolve_target_id(graph, &comp, instance_name.as_deref(), &reference)
                    {
                        if graph.node(&target_id).is_some() {
                            graph.add_edge(&service_id, &target_id)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Observability fan-in (spec §4.2 step 5).
    fn wire_observability(
        &self,
        graph: &mut Graph,
        component: &ComponentValue,
        instances: Option<&[Instance]>,
        distinct_list: &[String],
    ) -> Result<()> {
        if component.observability.is_none() {
            return Ok(());
        }
        let comp = component.name.clone();
        let observability_id = format!("{comp}/{}/observability", NodeType::Observability.id_tag());
        if graph.node(&observability_id).is_none() {
            return Ok(());
        }

        let mut workload_ids = Vec::new();
        for d in &component.deployments {
            workload_ids.extend(self.declared_ids(&comp, NodeType::Deployment, &d.name, instances, distinct_list));
        }
        for f in &component.functions {
            workload_ids.extend(self.declared_ids(&comp, NodeType::Function, &f.name, instances, distinct_list));
        }
        for c in &component.cronjobs {
            workload_ids.extend(self.declared_ids(&comp, NodeType::Cronjob, &c.name, instances, distinct_list));
        }
        // Synthesized migration tasks are workloads too (spec §3): a task
        // node isn't declared per-instance, so collect it straight off the
        // graph rather than through `declared_ids`.
        workload_ids.extend(
            graph
                .nodes_of_component(&comp)
                .filter(|n| n.node_type == NodeType::Task)
                .map(|n| n.id.clone()),
        );

        for id in workload_ids {
            graph.add_edge(&id, &observability_id)?;
        }
        Ok(())
    }
}

fn strip_tag(target: &str) -> String {
    target.split(':').next().unwrap_or(target).to_string()
}

fn apply_shared_instances(node: &mut Node, instances: Option<&[Instance]>, _distinct_list: &[String]) {
    if let Some(instances) = instances {
        node.instances = instances.to_vec();
    }
}

fn is_effectively_per_instance(node_type: NodeType, name: &str, distinct_list: &[String]) -> bool {
    node_type.is_per_instance() || distinct_list.iter().any(|n| n == name)
}

/// The last path segment of a node id: its resource `name`.
fn node_name_segment(id: &str) -> String {
    id.rsplit('/').next().unwrap_or(id).to_string()
}

/// The instance segment of a per-instance node id, if any
/// (`<component>/<instance>/<type>/<name>` has four segments).
fn instance_of(id: &str) -> Option<String> {
    let segments: Vec<&str> = id.split('/').collect();
    if segments.len() == 4 {
        Some(segments[1].to_string())
    } else {
        None
    }
}

/// A parsed `${{ ns.name.field }}` occurrence, scanned at build time purely
/// to discover which node it targets (no output resolution happens yet).
struct ParsedReference {
    ns: String,
    name: String,
}

fn extract_references(text: &str) -> Vec<ParsedReference> {
    let mut out = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("${{") {
        let after_open = &rest[start + 3..];
        let Some(end) = after_open.find("}}") else { break };
        let expr = after_open[..end].trim();
        let parts: Vec<&str> = expr.split('.').collect();
        if parts.len() >= 2 && parts[0] != "variables" && parts[0] != "locals" && parts[0] != "dependencies" {
            out.push(ParsedReference {
                ns: parts[0].to_string(),
                name: parts[1].to_string(),
            });
        }
        rest = &after_open[end + 2..];
    }
    out
}

fn resolve_target_id(
    graph: &Graph,
    comp: &str,
    instance: Option<&str>,
    reference: &ParsedReference,
) -> Option<String> {
    let node_type = NodeType::from_namespace(&reference.ns)?;
    if let Some(instance) = instance {
        if node_type.is_per_instance() {
            let candidate = format!("{comp}/{instance}/{}/{}", node_type.id_tag(), reference.name);
            if graph.node(&candidate).is_some() {
                return Some(candidate);
            }
        }
    }
    let shared = format!("{comp}/{}/{}", node_type.id_tag(), reference.name);
    if graph.node(&shared).is_some() {
        Some(shared)
    } else {
        None
    }
}

fn database_user_filter_inputs(
    database_id: &str,
    db_type: &str,
    consumer_id: &str,
    consumer_type: NodeType,
) -> HashMap<String, Value> {
    let mut m = HashMap::new();
    m.insert("database".into(), Value::String(database_id.to_string()));
    m.insert("type".into(), Value::String(db_type.to_string()));
    m.insert("consumer".into(), Value::String(consumer_id.to_string()));
    m.insert(
        "consumerType".into(),
        Value::String(consumer_type.id_tag().to_string()),
    );
    m
}

fn network_policy_filter_inputs(
    from_id: &str,
    from_type: NodeType,
    to_id: &str,
) -> HashMap<String, Value> {
    let mut m = HashMap::new();
    m.insert("from".into(), Value::String(from_id.to_string()));
    m.insert("fromType".into(), Value::String(from_type.id_tag().to_string()));
    m.insert("to".into(), Value::String(to_id.to_string()));
    m.insert("toType".into(), Value::String(NodeType::Service.id_tag().to_string()));
    m
}
