//! DAG visualization export, grounded on the teacher's
//! `mermaid_visualization.rs` example: render a [`Graph`] as Mermaid
//! flowchart source directly from its own `dependsOn` adjacency (the graph
//! already stores ids, not pointers, per the Design Notes — there is no
//! separate graph library structure to build first).

use crate::graph::Graph;
use crate::node::NodeState;

/// Render `graph` as a Mermaid `flowchart TD` diagram, one node per
/// [`crate::node::Node`], edges following `dependsOn`, and a CSS class per
/// [`NodeState`] so a completed/failed/skipped run is visually obvious.
pub fn to_mermaid(graph: &Graph) -> String {
    let mut out = String::from("flowchart TD\n");

    for node in graph.nodes.values() {
        let label = format!("{} ({})", node.id, node.node_type.id_tag());
        out.push_str(&format!("    {}[\"{}\"]\n", mermaid_id(&node.id), escape(&label)));
    }
    for node in graph.nodes.values() {
        for dep in &node.depends_on {
            if graph.node(dep).is_some() {
                out.push_str(&format!(
                    "    {} --> {}\n",
                    mermaid_id(dep),
                    mermaid_id(&node.id)
                ));
            }
        }
    }
    for node in graph.nodes.values() {
        out.push_str(&format!(
            "    class {} {}\n",
            mermaid_id(&node.id),
            state_class(node.state)
        ));
    }
    out
}

fn state_class(state: NodeState) -> &'static str {
    match state {
        NodeState::Pending => "pending",
        NodeState::Running => "running",
        NodeState::Completed => "completed",
        NodeState::Failed => "failed",
        NodeState::Skipped => "skipped",
    }
}

fn mermaid_id(node_id: &str) -> String {
    node_id.replace(['/', '-', '.'], "_")
}

fn escape(label: &str) -> String {
    label.replace('"', "&quot;")
}
