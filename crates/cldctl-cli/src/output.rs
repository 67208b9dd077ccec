//! Shared print/format helpers for CLI commands: colored status lines and
//! the Mermaid/JSON/table rendering [`crate::commands::graph`] picks between.

use cldctl_core::graph::Graph;
use cldctl_core::node::NodeState;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, Table};

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "ERROR:".bright_red().bold(), msg);
}

#[allow(dead_code)]
pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "WARNING:".bright_yellow().bold(), msg);
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".bright_green().bold(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "ℹ".bright_blue().bold(), msg);
}

pub fn create_table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table
}

fn state_label(state: NodeState) -> String {
    match state {
        NodeState::Pending => "pending".white().to_string(),
        NodeState::Running => "running".bright_blue().to_string(),
        NodeState::Completed => "completed".bright_green().to_string(),
        NodeState::Failed => "failed".bright_red().bold().to_string(),
        NodeState::Skipped => "skipped".bright_yellow().to_string(),
    }
}

/// Render a graph's nodes as a table: id, type, state, upstream count.
/// Used by `plan`, `deploy`, and `destroy` after a sorted traversal.
pub fn print_node_table(graph: &Graph, order: &[String]) {
    let mut table = create_table();
    table.set_header(vec!["Order", "Node", "Type", "State", "Depends on"]);

    for (i, id) in order.iter().enumerate() {
        let Some(node) = graph.node(id) else { continue };
        table.add_row(vec![
            (i + 1).to_string(),
            node.id.clone(),
            node.node_type.id_tag().to_string(),
            state_label(node.state),
            node.depends_on.len().to_string(),
        ]);
    }

    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_label_covers_every_variant() {
        for state in [
            NodeState::Pending,
            NodeState::Running,
            NodeState::Completed,
            NodeState::Failed,
            NodeState::Skipped,
        ] {
            assert!(!state_label(state).is_empty());
        }
    }
}
