use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;
mod output;
mod planfile;

use commands::{deploy, destroy, graph, plan};

/// cldctl - build and drive the provisioning graph for an environment
///
/// **Commands**:
///   plan    show the node apply order for a plan file without running it
///   deploy  build the graph and apply it to completion
///   destroy tear the graph down, dependents before dependencies
///   graph   render the graph as Mermaid or JSON
#[derive(Parser)]
#[command(name = "cldctl")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Provision and tear down environments from a component/datacenter graph", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the node apply order for a plan file without running anything
    Plan(plan::PlanArgs),

    /// Build the graph and apply it to completion
    Deploy(deploy::DeployArgs),

    /// Tear the graph down, dependents before dependencies
    Destroy(destroy::DestroyArgs),

    /// Render the graph as Mermaid or JSON
    Graph(graph::GraphArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan(args) => plan::run(args).await,
        Commands::Deploy(args) => deploy::run(args).await,
        Commands::Destroy(args) => destroy::run(args).await,
        Commands::Graph(args) => graph::run(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clap_parses_known_subcommands() {
        let cli = Cli::try_parse_from(["cldctl", "plan", "--file", "plan.json"]).expect("plan");
        assert!(matches!(cli.command, Commands::Plan(_)));

        let cli = Cli::try_parse_from(["cldctl", "graph", "--file", "plan.json", "-o", "json"])
            .expect("graph");
        assert!(matches!(cli.command, Commands::Graph(_)));
    }

    #[test]
    fn clap_enforces_required_args() {
        assert!(Cli::try_parse_from(["cldctl", "plan"]).is_err());
        assert!(Cli::try_parse_from(["cldctl", "deploy"]).is_err());
    }
}
