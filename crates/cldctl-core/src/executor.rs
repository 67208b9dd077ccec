//! The graph executor (spec §4.4): a bounded-parallelism scheduler that
//! drives every node to `completed`/`failed`/`skipped`, and its destroy
//! counterpart.
//!
//! One thread (this async task) owns all `Graph` mutation; workers are
//! `tokio::spawn`ed with only what they need (node id, resolved inputs,
//! cancellation token) and report back over a single `mpsc` results
//! channel, mirroring the teacher's `approval.rs` channel-based
//! coordination generalized from one pending request to `P` in-flight
//! workers (spec §5, §9 Design Notes "Concurrency").

use crate::constants::DEFAULT_RESULTS_CHANNEL_CAPACITY;
use crate::error::{Error, PluginPhase, Result};
use crate::events::{Event, EventSink};
use crate::filter::select_hook;
use crate::graph::{Graph, Verdict};
use crate::model::DatacenterValue;
use crate::node::NodeState;
use crate::plugin::{Plugin, RunOptions};
use crate::resolver::{self, Context};
use crate::secrets::SecretsManager;
use crate::state_backend::StateBackend;
use crate::value::{Value, ValueMap};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// The out-of-scope collaborators plus run configuration the executor needs
/// (spec §6). Constructed once and shared (via `Arc`) across every worker.
///
/// Tuning knobs (`worker_count`, `node_timeout`, `fail_fast`) sit directly on
/// `Executor` rather than behind a separate config type — there's only ever
/// one of them per run, and the teacher's own executor-adjacent structs
/// (`approval.rs`) inline their tuning fields the same way.
pub struct Executor {
    pub datacenter: DatacenterValue,
    pub plugin: Arc<dyn Plugin>,
    pub state_backend: Arc<dyn StateBackend>,
    pub secrets: Arc<dyn SecretsManager>,
    pub events: Arc<dyn EventSink>,
    pub worker_count: usize,
    pub cancellation: CancellationToken,
    /// Wall-clock budget for a single node's `plugin.apply` call. A node
    /// that exceeds this is reported as failed, which triggers the normal
    /// skip closure for its descendants.
    pub node_timeout: Duration,
    /// When `true`, the first node failure cancels every other in-flight
    /// node instead of letting independent branches run to completion.
    pub fail_fast: bool,
}

enum Outcome {
    Completed { node_id: String, outputs: ValueMap, state_out: Vec<u8> },
    Failed { node_id: String, message: String },
    Cancelled { node_id: String },
    DestroyOk { node_id: String },
    DestroyFailed { node_id: String, message: String },
}

impl Executor {
    /// `componentDependencies` gate scheduling, not just alias resolution:
    /// a node may only dispatch once every node of each non-optional
    /// dependency component has completed (spec §4.2 step 1 records this
    /// metadata; §4.4's component-level ordering is this rule applied at
    /// dispatch time).
    fn component_deps_satisfied(&self, graph: &Graph, component: &str) -> bool {
        graph
            .component_dependencies
            .get(component)
            .map(|deps| {
                deps.iter().all(|dep| {
                    graph
                        .nodes_of_component(dep)
                        .all(|n| n.state == NodeState::Completed)
                })
            })
            .unwrap_or(true)
    }

    /// Drives `graph` to completion (spec §4.4 Scheduling model).
    pub async fn apply(&self, graph: &mut Graph) -> Result<Verdict> {
        let (tx, mut rx) = mpsc::channel::<Outcome>(DEFAULT_RESULTS_CHANNEL_CAPACITY);
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut fail_fast_triggered = false;

        loop {
            if fail_fast_triggered && in_flight.is_empty() {
                return Ok(Verdict::Failure);
            }
            if self.cancellation.is_cancelled() && in_flight.is_empty() && !fail_fast_triggered {
                return Err(Error::Cancelled {
                    reason: "cancelled before completion".to_string(),
                });
            }

            let dispatchable: Vec<String> = graph
                .ready_nodes()
                .into_iter()
                .filter(|id| !in_flight.contains(id))
                .filter(|id| {
                    graph
                        .node(id)
                        .map(|n| self.component_deps_satisfied(graph, &n.component))
                        .unwrap_or(false)
                })
                .collect();

            if dispatchable.is_empty() && in_flight.is_empty() {
                if graph.all_completed() {
                    return Ok(Verdict::Success);
                }
                return Ok(Verdict::Failure);
            }

            let spare = self.worker_count.saturating_sub(in_flight.len());
            for node_id in dispatchable.into_iter().take(spare.max(0)) {
                if self.cancellation.is_cancelled() {
                    break;
                }
                self.dispatch_apply(graph, &node_id, tx.clone(), &mut in_flight)?;
            }

            if in_flight.is_empty() {
                continue;
            }

            let Some(outcome) = rx.recv().await else {
                return Ok(Verdict::Failure);
            };
            let was_failure = matches!(outcome, Outcome::Failed { .. });
            self.apply_outcome(graph, outcome, &mut in_flight);
            if was_failure && self.fail_fast {
                fail_fast_triggered = true;
                self.cancellation.cancel();
            }
        }
    }

    fn dispatch_apply(
        &self,
        graph: &mut Graph,
        node_id: &str,
        tx: mpsc::Sender<Outcome>,
        in_flight: &mut HashSet<String>,
    ) -> Result<()> {
        let node = graph
            .node(node_id)
            .ok_or_else(|| Error::UnknownNode { id: node_id.to_string() })?
            .clone();

        self.events.emit(Event::Started { node_id: node.id.clone() });

        let hook = select_hook(&self.datacenter, node.node_type, &node.inputs).cloned();

        let Some(hook) = hook else {
            if node.node_type.is_implicit() {
                let upstream_outputs = node
                    .depends_on
                    .iter()
                    .find_map(|up| graph.node(up))
                    .map(|up| up.outputs.clone())
                    .unwrap_or_default();
                if let Some(n) = graph.node_mut(node_id) {
                    n.state = NodeState::Running;
                    n.outputs = upstream_outputs;
                    n.state = NodeState::Completed;
                }
                self.events.emit(Event::OutputsReady { node_id: node.id.clone() });
                return Ok(());
            }
            if let Some(n) = graph.node_mut(node_id) {
                n.state = NodeState::Failed;
            }
            self.events.emit(Event::ApplyErr {
                node_id: node.id.clone(),
                phase: PluginPhase::Apply,
                message: "no hook matched".to_string(),
            });
            self.propagate_skips(graph, node_id);
            return Ok(());
        };

        self.events.emit(Event::HookSelected {
            node_id: node.id.clone(),
            module_source: hook.module_source.clone(),
        });

        let ctx = Context::new(graph, node.component.clone());
        let mut resolved_inputs = ValueMap::with_capacity(hook.inputs.len());
        for (name, template) in &hook.inputs {
            match resolver::resolve_template(template, &ctx) {
                Ok(resolved) => {
                    resolved_inputs.insert(name.clone(), Value::String(resolved));
                }
                Err(e) => {
                    if let Some(n) = graph.node_mut(node_id) {
                        n.state = NodeState::Failed;
                    }
                    self.events.emit(Event::ApplyErr {
                        node_id: node.id.clone(),
                        phase: PluginPhase::Apply,
                        message: e.to_string(),
                    });
                    self.propagate_skips(graph, node_id);
                    return Ok(());
                }
            }
        }

        if let Some(n) = graph.node_mut(node_id) {
            n.state = NodeState::Running;
        }
        in_flight.insert(node_id.to_string());

        let plugin = self.plugin.clone();
        let state_backend = self.state_backend.clone();
        let secrets = self.secrets.clone();
        let cancellation = self.cancellation.clone();
        let output_exprs = hook.outputs.clone();
        let module_source = hook.module_source.clone();
        let node_id = node_id.to_string();
        let node_timeout = self.node_timeout;

        tokio::spawn(async move {
            let outcome = run_apply_worker(
                node_id.clone(),
                module_source,
                resolved_inputs,
                output_exprs,
                plugin,
                state_backend,
                secrets,
                cancellation,
                node_timeout,
            )
            .await;
            let _ = tx.send(outcome).await;
        });

        Ok(())
    }

    fn apply_outcome(&self, graph: &mut Graph, outcome: Outcome, in_flight: &mut HashSet<String>) {
        match outcome {
            Outcome::Completed { node_id, outputs, state_out } => {
                in_flight.remove(&node_id);
                if let Some(n) = graph.node_mut(&node_id) {
                    n.outputs = outputs;
                    n.state = NodeState::Completed;
                }
                let _ = state_out;
                self.events.emit(Event::ApplyOk {
                    node_id: node_id.clone(),
                    phase: PluginPhase::Apply,
                });
                self.events.emit(Event::OutputsReady { node_id });
            }
            Outcome::Failed { node_id, message } => {
                in_flight.remove(&node_id);
                if let Some(n) = graph.node_mut(&node_id) {
                    n.state = NodeState::Failed;
                }
                self.events.emit(Event::ApplyErr {
                    node_id: node_id.clone(),
                    phase: PluginPhase::Apply,
                    message,
                });
                self.propagate_skips(graph, &node_id);
            }
            Outcome::Cancelled { node_id } => {
                in_flight.remove(&node_id);
                if let Some(n) = graph.node_mut(&node_id) {
                    n.state = NodeState::Failed;
                }
                self.events.emit(Event::ApplyErr {
                    node_id,
                    phase: PluginPhase::Apply,
                    message: "cancelled".to_string(),
                });
            }
            Outcome::DestroyOk { .. } | Outcome::DestroyFailed { .. } => unreachable!("apply loop never produces destroy outcomes"),
        }
    }

    /// Skip closure (spec Testable Property 7): every descendant of a
    /// failed node is eventually `skipped`, never `completed`.
    fn propagate_skips(&self, graph: &mut Graph, failed_id: &str) {
        let mut frontier: Vec<String> = graph
            .node(failed_id)
            .map(|n| n.depended_on_by.clone())
            .unwrap_or_default();
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(id) = frontier.pop() {
            if !visited.insert(id.clone()) {
                continue;
            }
            let Some(n) = graph.node_mut(&id) else { continue };
            if n.state == NodeState::Pending {
                n.state = NodeState::Skipped;
                self.events.emit(Event::Skipped {
                    node_id: id.clone(),
                    cause: format!("upstream {failed_id} failed"),
                });
                frontier.extend(n.depended_on_by.clone());
            }
        }
    }

    /// Destroy (spec §4.4 Destroy): same worker-pool machinery, walking
    /// dependents-before-dependencies. `Graph::is_ready`/`ready_nodes` are
    /// apply-shaped (readiness over `depends_on`), so destroy uses its own
    /// readiness computed over the reverse adjacency (`depended_on_by`)
    /// plus local bookkeeping rather than reusing `NodeState`, which has no
    /// "destroyed" variant.
    pub async fn destroy(&self, graph: &mut Graph) -> Result<Verdict> {
        let (tx, mut rx) = mpsc::channel::<Outcome>(DEFAULT_RESULTS_CHANNEL_CAPACITY);
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut destroyed: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut skipped: HashSet<String> = HashSet::new();

        let all_ids: Vec<String> = graph.nodes.keys().cloned().collect();

        loop {
            let resolved = destroyed.len() + failed.len() + skipped.len();
            if resolved == all_ids.len() && in_flight.is_empty() {
                return Ok(if failed.is_empty() && skipped.is_empty() {
                    Verdict::Success
                } else {
                    Verdict::Failure
                });
            }

            let dispatchable: Vec<String> = all_ids
                .iter()
                .filter(|id| !destroyed.contains(*id) && !failed.contains(*id) && !skipped.contains(*id))
                .filter(|id| !in_flight.contains(*id))
                .filter(|id| {
                    graph
                        .node(id)
                        .map(|n| {
                            let component_ok = self.destroy_component_deps_satisfied(graph, &n.component, &destroyed);
                            let dependents_ok = n
                                .depended_on_by
                                .iter()
                                .filter(|d| graph.node(d).is_some())
                                .all(|d| destroyed.contains(d) || failed.contains(d) || skipped.contains(d));
                            let blocked_by_failure = n
                                .depended_on_by
                                .iter()
                                .any(|d| failed.contains(d) || skipped.contains(d));
                            dependents_ok && component_ok && !blocked_by_failure
                        })
                        .unwrap_or(false)
                })
                .cloned()
                .collect();

            // Dependents that failed/were skipped block their dependencies
            // from being destroyed: mark them skipped instead of leaving
            // them dispatchable forever.
            for id in &all_ids {
                if destroyed.contains(id) || failed.contains(id) || skipped.contains(id) || in_flight.contains(id) {
                    continue;
                }
                let Some(n) = graph.node(id) else { continue };
                let blocked = n
                    .depended_on_by
                    .iter()
                    .any(|d| failed.contains(d) || skipped.contains(d));
                if blocked {
                    skipped.insert(id.clone());
                    self.events.emit(Event::Skipped {
                        node_id: id.clone(),
                        cause: "a dependent failed to destroy".to_string(),
                    });
                }
            }

            if dispatchable.is_empty() && in_flight.is_empty() {
                let resolved = destroyed.len() + failed.len() + skipped.len();
                if resolved < all_ids.len() {
                    for id in &all_ids {
                        if !destroyed.contains(id) && !failed.contains(id) && !skipped.contains(id) {
                            skipped.insert(id.clone());
                        }
                    }
                }
                return Ok(if failed.is_empty() { Verdict::Success } else { Verdict::Failure });
            }

            let spare = self.worker_count.saturating_sub(in_flight.len());
            for node_id in dispatchable.into_iter().take(spare.max(0)) {
                self.dispatch_destroy(graph, &node_id, tx.clone(), &mut in_flight)?;
            }

            if in_flight.is_empty() {
                continue;
            }

            let Some(outcome) = rx.recv().await else {
                return Ok(Verdict::Failure);
            };
            match outcome {
                Outcome::DestroyOk { node_id } => {
                    in_flight.remove(&node_id);
                    destroyed.insert(node_id.clone());
                    self.events.emit(Event::ApplyOk { node_id, phase: PluginPhase::Destroy });
                }
                Outcome::DestroyFailed { node_id, message } => {
                    in_flight.remove(&node_id);
                    failed.insert(node_id.clone());
                    self.events.emit(Event::ApplyErr { node_id, phase: PluginPhase::Destroy, message });
                }
                _ => unreachable!("destroy loop never produces apply outcomes"),
            }
        }
    }

    /// Mirror of `component_deps_satisfied` for destroy order: a component's
    /// nodes are destroy-eligible once every component that depends on it
    /// has been fully destroyed ("dependents destroyed before dependencies").
    fn destroy_component_deps_satisfied(&self, graph: &Graph, component: &str, destroyed: &HashSet<String>) -> bool {
        let dependent_components: Vec<&String> = graph
            .component_dependencies
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == component))
            .map(|(comp, _)| comp)
            .collect();

        dependent_components.iter().all(|comp| {
            graph
                .nodes_of_component(comp)
                .all(|n| destroyed.contains(&n.id))
        })
    }

    fn dispatch_destroy(
        &self,
        graph: &mut Graph,
        node_id: &str,
        tx: mpsc::Sender<Outcome>,
        in_flight: &mut HashSet<String>,
    ) -> Result<()> {
        let node = graph
            .node(node_id)
            .ok_or_else(|| Error::UnknownNode { id: node_id.to_string() })?
            .clone();

        in_flight.insert(node_id.to_string());
        let plugin = self.plugin.clone();
        let state_backend = self.state_backend.clone();
        let cancellation = self.cancellation.clone();
        let node_id = node_id.to_string();
        let module_source = select_hook(&self.datacenter, node.node_type, &node.inputs)
            .map(|h| h.module_source.clone())
            .unwrap_or_default();

        tokio::spawn(async move {
            let state_in = state_backend.read(&state_key(&node_id)).await.ok().flatten();
            let opts = RunOptions {
                node_id: node_id.clone(),
                module_source,
                inputs: ValueMap::new(),
                state_in,
                env: HashMap::new(),
                cancellation,
            };
            let outcome = match plugin.destroy(opts).await {
                Ok(()) => {
                    let _ = state_backend.delete(&state_key(&node_id)).await;
                    Outcome::DestroyOk { node_id }
                }
                Err(e) => Outcome::DestroyFailed { node_id, message: e.to_string() },
            };
            let _ = tx.send(outcome).await;
        });

        Ok(())
    }
}

async fn run_apply_worker(
    node_id: String,
    module_source: String,
    resolved_inputs: ValueMap,
    output_exprs: HashMap<String, String>,
    plugin: Arc<dyn Plugin>,
    state_backend: Arc<dyn StateBackend>,
    secrets: Arc<dyn SecretsManager>,
    cancellation: CancellationToken,
    node_timeout: Duration,
) -> Outcome {
    let mut inputs_with_secrets = ValueMap::with_capacity(resolved_inputs.len());
    for (k, v) in resolved_inputs {
        match secrets.resolve_secrets(v).await {
            Ok(resolved) => {
                inputs_with_secrets.insert(k, resolved);
            }
            Err(e) => return Outcome::Failed { node_id, message: e.to_string() },
        }
    }

    let state_in = state_backend.read(&state_key(&node_id)).await.unwrap_or(None);

    let opts = RunOptions {
        node_id: node_id.clone(),
        module_source,
        inputs: inputs_with_secrets.clone(),
        state_in,
        env: HashMap::new(),
        cancellation: cancellation.clone(),
    };

    let apply_result = tokio::select! {
        _ = cancellation.cancelled() => return Outcome::Cancelled { node_id },
        timed = tokio::time::timeout(node_timeout, plugin.apply(opts)) => match timed {
            Ok(result) => result,
            Err(_) => return Outcome::Failed {
                node_id,
                message: format!("timed out after {node_timeout:?}"),
            },
        },
    };

    let applied = match apply_result {
        Ok(a) => a,
        Err(e) => return Outcome::Failed { node_id, message: e.to_string() },
    };

    if let Err(e) = state_backend.write(&state_key(&node_id), &applied.state_out).await {
        return Outcome::Failed { node_id, message: e.to_string() };
    }

    let mut merged: HashMap<String, Value> = inputs_with_secrets;
    for (k, v) in &applied.outputs {
        merged.insert(k.clone(), v.clone());
    }

    let mut outputs = ValueMap::with_capacity(output_exprs.len());
    for (name, template) in &output_exprs {
        match evaluate_flat_template(template, &merged) {
            Ok(v) => {
                outputs.insert(name.clone(), v);
            }
            Err(e) => return Outcome::Failed { node_id, message: e.to_string() },
        }
    }
    if output_exprs.is_empty() {
        outputs = applied.outputs;
    }

    Outcome::Completed { node_id, outputs, state_out: applied.state_out }
}

/// Evaluate a hook's `outputs` template (spec §4.4 step e) against the flat
/// `{resolved inputs, plugin outputs}` context, a simpler grammar than
/// [`resolver::resolve_template`]'s cross-node references: a single
/// dotted-path lookup per `${{ ... }}` occurrence, no namespace dispatch.
fn evaluate_flat_template(template: &str, context: &HashMap<String, Value>) -> Result<Value> {
    if let Some(path) = template.trim().strip_prefix("${{").and_then(|s| s.strip_suffix("}}")) {
        if !path.contains("${{") {
            let segments: Vec<&str> = path.trim().split('.').collect();
            let root = Value::Map(context.clone());
            return root.get_path(&segments).cloned().ok_or_else(|| Error::FieldMissing {
                node_id: String::new(),
                field: template.to_string(),
            });
        }
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${{") {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + 3..];
        let end = after_open.find("}}").ok_or_else(|| Error::FieldMissing {
            node_id: String::new(),
            field: template.to_string(),
        })?;
        let segments: Vec<&str> = after_open[..end].trim().split('.').collect();
        let value = Value::Map(context.clone())
            .get_path(&segments)
            .cloned()
            .ok_or_else(|| Error::FieldMissing {
                node_id: String::new(),
                field: after_open[..end].trim().to_string(),
            })?;
        out.push_str(&value.as_interpolated_string());
        rest = &after_open[end + 2..];
    }
    out.push_str(rest);
    Ok(Value::String(out))
}

fn state_key(node_id: &str) -> String {
    format!("nodes/{node_id}.json")
}
