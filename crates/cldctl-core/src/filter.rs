//! Hook matching and the `ImplicitNodeFilter` callback (spec §4.2 step 6,
//! §4.4 step b, Design Notes "Conditional node synthesis").

use crate::model::{DatacenterValue, Hook};
use crate::node::NodeType;
use crate::value::Value;
use crate::when;
use std::collections::HashMap;
use std::sync::Arc;

/// `inputs -> bool`: does some hook of the prospective node's kind match?
/// Built once per datacenter, independent of hook-DSL parsing at the call
/// site — this is what keeps the builder reusable under alternative
/// datacenter grammars (Design Notes).
pub type ImplicitNodeFilter = Arc<dyn Fn(&HashMap<String, Value>) -> bool + Send + Sync>;

/// Build the filter for `node_type` from a datacenter's hooks: `true` iff
/// any hook of that kind's `when` matches `inputs` (an empty `when` always
/// matches; a `when` that fails to evaluate is treated as a match,
/// conservatively).
pub fn build_filter(datacenter: &DatacenterValue, node_type: NodeType) -> ImplicitNodeFilter {
    let hooks: Vec<Hook> = datacenter.hooks_for(node_type).cloned().collect();
    Arc::new(move |inputs| {
        hooks
            .iter()
            .any(|h| when::matches(h.when.as_deref(), inputs))
    })
}

/// Select the hook that would provision a concrete node (spec §4.4 step b):
/// the first, in declaration order, whose `when` matches `inputs`. A hook
/// with no `when` is the catch-all.
pub fn select_hook<'a>(
    datacenter: &'a DatacenterValue,
    node_type: NodeType,
    inputs: &HashMap<String, Value>,
) -> Option<&'a Hook> {
    datacenter
        .hooks_for(node_type)
        .find(|h| when::matches(h.when.as_deref(), inputs))
}
