//! `cldctl plan`: build the graph from a plan file and show the apply
//! order without running anything.

use crate::output::{print_info, print_node_table};
use crate::planfile::PlanFile;
use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct PlanArgs {
    /// Path to a plan file (JSON: `{environment, datacenter, components}`).
    #[arg(short, long)]
    file: PathBuf,

    /// Print the plan as Mermaid flowchart source instead of a table.
    #[arg(long)]
    mermaid: bool,
}

pub async fn run(args: PlanArgs) -> Result<()> {
    let plan = PlanFile::load(&args.file)?;
    let graph = cldctl_core::builder::Builder::new(&plan.datacenter)
        .build(&plan.environment, &plan.components)?;

    let order = graph.topological_sort()?;

    if args.mermaid {
        println!("{}", cldctl_core::visualize::to_mermaid(&graph));
        return Ok(());
    }

    print_info(&format!(
        "{} node(s) across {} component(s)",
        graph.nodes.len(),
        plan.components.len()
    ));
    print_node_table(&graph, &order);
    Ok(())
}
