//! `cldctl graph`: render a plan file's graph without applying anything,
//! for piping into `mmdc` or another Mermaid renderer.

use crate::planfile::PlanFile;
use anyhow::Result;
use cldctl_core::builder::Builder;
use clap::{Args, ValueEnum};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum GraphFormat {
    #[default]
    Mermaid,
    Json,
}

#[derive(Args)]
pub struct GraphArgs {
    /// Path to a plan file (JSON: `{environment, datacenter, components}`).
    #[arg(short, long)]
    file: PathBuf,

    #[arg(short = 'o', long, value_enum, default_value_t = GraphFormat::Mermaid)]
    format: GraphFormat,
}

pub async fn run(args: GraphArgs) -> Result<()> {
    let plan = PlanFile::load(&args.file)?;
    let graph = Builder::new(&plan.datacenter).build(&plan.environment, &plan.components)?;

    match args.format {
        GraphFormat::Mermaid => println!("{}", cldctl_core::visualize::to_mermaid(&graph)),
        GraphFormat::Json => println!("{}", serde_json::to_string_pretty(&graph)?),
    }
    Ok(())
}
