use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use caravel_assembly::CloudAssembly;
use caravel_deploy::{
  DeployOptions, DeployResult, FsAssetBuilder, HotswapMode, RunOptions, SubmitMethod, run_deploy,
};
use caravel_engine::{ChannelNotifier, ExecutionEvent};
use caravel_graph::StackAction;

mod sim;

/// Caravel - deploys a synthesized cloud assembly stack by stack
#[derive(Parser)]
#[command(name = "caravel")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the deployment state file (default: .caravel-state.json)
  #[arg(long, global = true)]
  state_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Deploy stacks from a cloud assembly
  Deploy {
    /// Path to the cloud assembly directory (contains manifest.json)
    assembly_dir: PathBuf,

    /// Stacks to deploy; dependencies are included automatically.
    /// Empty selects every stack in the assembly.
    stacks: Vec<String>,

    /// Maximum number of nodes in flight at once
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Apply eligible changes through direct resource mutations, falling
    /// back to a full deployment when any change is ineligible
    #[arg(long)]
    hotswap: bool,

    /// Leave a failed stack in place instead of rolling it back
    #[arg(long)]
    no_rollback: bool,

    /// Apply changes directly instead of through a change set
    #[arg(long)]
    direct: bool,
  },

  /// Destroy stacks in reverse dependency order
  Destroy {
    /// Path to the cloud assembly directory (contains manifest.json)
    assembly_dir: PathBuf,

    /// Stacks to destroy; dependencies are included automatically.
    /// Empty selects every stack in the assembly.
    stacks: Vec<String>,

    /// Maximum number of nodes in flight at once
    #[arg(long, default_value_t = 1)]
    concurrency: usize,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();
  let state_file = cli
    .state_file
    .unwrap_or_else(|| PathBuf::from(".caravel-state.json"));

  let rt = tokio::runtime::Runtime::new()?;
  match cli.command {
    Commands::Deploy {
      assembly_dir,
      stacks,
      concurrency,
      hotswap,
      no_rollback,
      direct,
    } => {
      let options = RunOptions {
        concurrency,
        action: StackAction::Deploy,
        deploy: DeployOptions {
          hotswap: if hotswap {
            HotswapMode::FallBack
          } else {
            HotswapMode::Disabled
          },
          submit_method: if direct {
            SubmitMethod::Direct
          } else {
            SubmitMethod::ChangeSet
          },
          rollback_on_failure: !no_rollback,
          ..DeployOptions::default()
        },
      };
      rt.block_on(run(assembly_dir, stacks, options, state_file))
    }
    Commands::Destroy {
      assembly_dir,
      stacks,
      concurrency,
    } => {
      let options = RunOptions {
        concurrency,
        action: StackAction::Destroy,
        ..RunOptions::default()
      };
      rt.block_on(run(assembly_dir, stacks, options, state_file))
    }
  }
}

async fn run(
  assembly_dir: PathBuf,
  stacks: Vec<String>,
  options: RunOptions,
  state_file: PathBuf,
) -> Result<()> {
  let assembly = CloudAssembly::load(&assembly_dir)
    .with_context(|| format!("failed to load assembly: {}", assembly_dir.display()))?;
  let selected = assembly.select(&stacks)?;
  if selected.is_empty() {
    bail!("the assembly contains no stacks");
  }
  info!(
    stacks = selected.len(),
    action = ?options.action,
    concurrency = options.concurrency,
    "starting run"
  );
  eprintln!(
    "Selected {} stack(s): {}",
    selected.len(),
    selected
      .iter()
      .map(|s| s.stack_id.as_str())
      .collect::<Vec<_>>()
      .join(", ")
  );

  let cloud = Arc::new(sim::InMemoryCloud::load(state_file)?);
  let builder = Arc::new(FsAssetBuilder::new(assembly.directory()));

  // First ctrl-c stops scheduling new nodes and cancels running ones.
  let cancel = CancellationToken::new();
  let ctrl_c_cancel = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      eprintln!("Interrupted; cancelling remaining nodes");
      ctrl_c_cancel.cancel();
    }
  });

  let (sender, mut receiver) = mpsc::unbounded_channel();
  let printer = tokio::spawn(async move {
    while let Some(event) = receiver.recv().await {
      render(&event);
    }
  });

  let result = run_deploy(
    &selected,
    cloud,
    builder,
    options,
    ChannelNotifier::new(sender),
    cancel,
  )
  .await?;
  // Sender side is dropped inside run_deploy's executor; drain the rest.
  let _ = printer.await;

  info!(run_id = %result.run_id, success = result.success(), "run finished");
  report(&result)
}

fn render(event: &ExecutionEvent) {
  match event {
    ExecutionEvent::GraphStarted { node_count, .. } => {
      eprintln!("Executing {node_count} node(s)");
    }
    ExecutionEvent::NodeStarted { node_id, .. } => {
      eprintln!("  {node_id}: started");
    }
    ExecutionEvent::NodeSucceeded { node_id, .. } => {
      eprintln!("  {node_id}: done");
    }
    ExecutionEvent::NodeFailed { node_id, error, .. } => {
      eprintln!("  {node_id}: FAILED: {error}");
    }
    ExecutionEvent::NodeSkipped { node_id, .. } => {
      eprintln!("  {node_id}: skipped (upstream failure)");
    }
    ExecutionEvent::GraphCompleted { failed, .. } => {
      if *failed > 0 {
        eprintln!("Finished with {failed} failed node(s)");
      }
    }
    // Queued is interesting to log consumers, not the terminal.
    ExecutionEvent::NodeQueued { .. } => {}
  }
}

fn report(result: &DeployResult) -> Result<()> {
  eprintln!();
  for (stack_id, outcome) in &result.outcomes {
    eprintln!("{stack_id}: {outcome}");
  }

  if result.success() {
    Ok(())
  } else {
    bail!("run {} finished with failures", result.run_id);
  }
}
