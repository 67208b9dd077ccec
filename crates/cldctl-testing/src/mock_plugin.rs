//! A configurable mock [`Plugin`], grounded on the teacher's `MockTool`
//! (`dashflow-testing/src/mock_tool.rs`): call history, a one-shot
//! `fail_next`, and an optional per-node-type handler in place of a fixed
//! response.

use async_trait::async_trait;
use cldctl_core::error::{Error, PluginPhase, Result};
use cldctl_core::node::NodeType;
use cldctl_core::plugin::{ApplyResult, Plugin, PreviewResult, RefreshResult, RunOptions};
use cldctl_core::value::{Value, ValueMap};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// A per-node-type handler computing outputs from a call's resolved
/// inputs. Falls back to [`MockPlugin::default_outputs`] when absent.
pub type ApplyHandler = Arc<dyn Fn(&RunOptions) -> Result<ValueMap> + Send + Sync>;

/// A mock [`Plugin`]: canned outputs per [`NodeType`] (or a custom handler),
/// an artificial latency knob, a one-shot failure trigger per node id, and
/// a recorded call history for assertions.
#[derive(Clone)]
pub struct MockPlugin {
    handlers: Arc<Mutex<HashMap<NodeType, ApplyHandler>>>,
    default_outputs: ValueMap,
    latency: Option<Duration>,
    fail_once: Arc<Mutex<HashSet<String>>>,
    applied: Arc<Mutex<Vec<RunOptions>>>,
    destroyed: Arc<Mutex<Vec<String>>>,
}

impl Default for MockPlugin {
    fn default() -> Self {
        MockPlugin {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            default_outputs: ValueMap::new(),
            latency: None,
            fail_once: Arc::new(Mutex::new(HashSet::new())),
            applied: Arc::new(Mutex::new(Vec::new())),
            destroyed: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl MockPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always return these outputs for node types without their own handler.
    pub fn with_default_outputs(mut self, outputs: ValueMap) -> Self {
        self.default_outputs = outputs;
        self
    }

    /// Install a canned outputs map for every node of `node_type`.
    pub fn with_outputs_for(self, node_type: NodeType, outputs: ValueMap) -> Self {
        self.with_handler(node_type, move |_opts| Ok(outputs.clone()))
    }

    /// Install a handler computing outputs for every node of `node_type`.
    pub fn with_handler<F>(self, node_type: NodeType, handler: F) -> Self
    where
        F: Fn(&RunOptions) -> Result<ValueMap> + Send + Sync + 'static,
    {
        self.handlers.lock().insert(node_type, Arc::new(handler));
        self
    }

    /// Sleep this long before returning from every `apply` call, to exercise
    /// concurrency (overlapping in-flight nodes) in executor tests.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `apply` call for `node_id` fail, then succeed normally
    /// afterward — mirrors `MockTool::fail_next`.
    pub fn fail_next(&self, node_id: &str) {
        self.fail_once.lock().insert(node_id.to_string());
    }

    /// The `RunOptions` passed to every successful or failed `apply` call,
    /// in call order.
    pub fn apply_calls(&self) -> Vec<RunOptions> {
        self.applied.lock().clone()
    }

    pub fn apply_count(&self) -> usize {
        self.applied.lock().len()
    }

    /// Node ids that had `destroy` invoked, in call order.
    pub fn destroyed_ids(&self) -> Vec<String> {
        self.destroyed.lock().clone()
    }

    fn compute_outputs(&self, node_type: NodeType, opts: &RunOptions) -> Result<ValueMap> {
        if let Some(handler) = self.handlers.lock().get(&node_type) {
            handler(opts)
        } else {
            Ok(self.default_outputs.clone())
        }
    }

    async fn maybe_sleep(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn node_type_from(opts: &RunOptions) -> NodeType {
        // `catch_all_datacenter` names every hook's module `mock://<tag>`;
        // a caller using a different datacenter fixture should prefer
        // `with_handler`/`with_outputs_for` keyed off `module_source`
        // directly rather than relying on this convention.
        opts.module_source
            .rsplit('/')
            .next()
            .and_then(node_type_from_tag)
            .unwrap_or(NodeType::Task)
    }
}

fn node_type_from_tag(tag: &str) -> Option<NodeType> {
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
    kinds.into_iter().find(|k| k.id_tag() == tag)
}

#[async_trait]
impl Plugin for MockPlugin {
    async fn preview(&self, opts: RunOptions) -> Result<PreviewResult> {
        let node_type = Self::node_type_from(&opts);
        let outputs = self.compute_outputs(node_type, &opts)?;
        Ok(PreviewResult {
            summary: format!("would apply {}", opts.node_id),
            projected_outputs: outputs,
        })
    }

    async fn apply(&self, opts: RunOptions) -> Result<ApplyResult> {
        self.maybe_sleep().await;
        self.applied.lock().push(opts.clone());

        if self.fail_once.lock().remove(&opts.node_id) {
            return Err(Error::Plugin {
                node_id: opts.node_id.clone(),
                phase: PluginPhase::Apply,
                message: "mock plugin configured to fail".to_string(),
                exit_status: Some(1),
                stderr_tail: String::new(),
            });
        }

        let node_type = Self::node_type_from(&opts);
        let outputs = self.compute_outputs(node_type, &opts)?;
        let state_out = serde_json::to_vec(&to_json_map(&outputs)).unwrap_or_default();
        Ok(ApplyResult { outputs, state_out })
    }

    async fn destroy(&self, opts: RunOptions) -> Result<()> {
        self.maybe_sleep().await;
        self.destroyed.lock().push(opts.node_id.clone());
        if self.fail_once.lock().remove(&opts.node_id) {
            return Err(Error::Plugin {
                node_id: opts.node_id,
                phase: PluginPhase::Destroy,
                message: "mock plugin configured to fail".to_string(),
                exit_status: Some(1),
                stderr_tail: String::new(),
            });
        }
        Ok(())
    }

    async fn refresh(&self, opts: RunOptions) -> Result<RefreshResult> {
        let node_type = Self::node_type_from(&opts);
        let outputs = self.compute_outputs(node_type, &opts)?;
        Ok(RefreshResult {
            outputs,
            drifted: false,
        })
    }
}

fn to_json_map(outputs: &ValueMap) -> HashMap<String, serde_json::Value> {
    outputs
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_util::sync::CancellationToken;

    fn opts(node_id: &str, module_source: &str) -> RunOptions {
        RunOptions {
            node_id: node_id.to_string(),
            module_source: module_source.to_string(),
            inputs: ValueMap::new(),
            state_in: None,
            env: HashMap::new(),
            cancellation: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn default_outputs_pass_through() {
        let mut outputs = ValueMap::new();
        outputs.insert("host".into(), Value::String("localhost".into()));
        let plugin = MockPlugin::new().with_default_outputs(outputs.clone());

        let result = plugin.apply(opts("comp/database/main", "postgres")).await.unwrap();
        assert_eq!(result.outputs, outputs);
        assert_eq!(plugin.apply_count(), 1);
    }

    #[tokio::test]
    async fn fail_next_fails_exactly_once() {
        let plugin = MockPlugin::new();
        plugin.fail_next("comp/task/migrate");

        let first = plugin.apply(opts("comp/task/migrate", "task")).await;
        assert!(first.is_err());
        let second = plugin.apply(opts("comp/task/migrate", "task")).await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn per_type_handler_overrides_default() {
        let plugin = MockPlugin::new().with_handler(NodeType::Database, |opts| {
            let mut out = ValueMap::new();
            out.insert("node_id".into(), Value::String(opts.node_id.clone()));
            Ok(out)
        });

        let result = plugin.apply(opts("comp/database/main", "database")).await.unwrap();
        assert_eq!(
            result.outputs.get("node_id"),
            Some(&Value::String("comp/database/main".to_string()))
        );
    }
}
