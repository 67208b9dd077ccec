//! `cldctl destroy`: tear down every node in a plan file, dependents
//! before dependencies (spec §4.4 Destroy).

use crate::output::{print_info, print_node_table, print_success};
use crate::planfile::PlanFile;
use anyhow::Result;
use cldctl_core::builder::Builder;
use cldctl_core::events::TracingEventSink;
use cldctl_core::executor::Executor;
use cldctl_core::graph::Verdict;
use cldctl_core::secrets::EnvSecretsProvider;
use cldctl_core::state_backend::LocalFileStateBackend;
use cldctl_testing::MockPlugin;
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Args)]
pub struct DestroyArgs {
    /// Path to a plan file (JSON: `{environment, datacenter, components}`).
    #[arg(short, long)]
    file: PathBuf,

    /// Directory the local-file state backend persists node state under.
    #[arg(long, default_value = ".cldctl/state")]
    state_dir: PathBuf,

    /// Maximum number of nodes dispatched concurrently.
    #[arg(long, default_value_t = 4)]
    parallelism: usize,

    /// Per-node apply timeout, in seconds (unused by destroy itself, kept
    /// for flag parity with `deploy`).
    #[arg(long, default_value_t = 900)]
    timeout: u64,

    /// Cancel every other in-flight node as soon as one fails to tear down.
    #[arg(long, default_value_t = false)]
    fail_fast: bool,
}

pub async fn run(args: DestroyArgs) -> Result<()> {
    let plan = PlanFile::load(&args.file)?;
    let mut graph = Builder::new(&plan.datacenter).build(&plan.environment, &plan.components)?;

    print_info(&format!("destroying {} node(s)", graph.nodes.len()));

    let executor = Executor {
        datacenter: plan.datacenter,
        plugin: Arc::new(MockPlugin::new()),
        state_backend: Arc::new(LocalFileStateBackend::new(args.state_dir)),
        secrets: Arc::new(EnvSecretsProvider::new()),
        events: Arc::new(TracingEventSink::new()),
        worker_count: args.parallelism.max(1),
        cancellation: CancellationToken::new(),
        node_timeout: Duration::from_secs(args.timeout),
        fail_fast: args.fail_fast,
    };

    let verdict = executor.destroy(&mut graph).await?;
    let order: Vec<String> = graph.reverse_topological_sort().unwrap_or_default();
    print_node_table(&graph, &order);

    match verdict {
        Verdict::Success => {
            print_success("destroy complete");
            Ok(())
        }
        Verdict::Failure => anyhow::bail!("destroy failed: one or more nodes did not tear down"),
    }
}
