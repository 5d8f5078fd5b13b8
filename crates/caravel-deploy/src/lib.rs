//! Caravel Deployment
//!
//! Per-stack deployment semantics behind the executor: the deployment
//! state machine (inspect, rollback-first, hotswap or full deployment,
//! monitoring), the structural template diff it decides on, the hotswap
//! evaluator, and the asset build/publish runners. Remote calls go through
//! the `CloudService` trait; a real transport client lives outside this
//! crate.
//!
//! The public entry point is [`run_deploy`]: selected stacks in, a
//! per-stack [`DeploymentOutcome`] map out.

mod builder;
mod cloud;
mod diff;
mod error;
mod hotswap;
mod outcome;
mod runner;
mod state;

use std::collections::BTreeMap;
use std::sync::Arc;

use caravel_assembly::StackArtifact;
use caravel_engine::{
  ExecutorOptions, GraphExecutor, NodeOutcome, ProgressNotifier,
};
use caravel_graph::{NodeStatus, StackAction, build_deploy_graph, build_destroy_graph, stack_node_id};
use tokio_util::sync::CancellationToken;

pub use builder::{AssetBuilder, BuildError, FsAssetBuilder};
pub use cloud::{ChangeHandle, CloudError, CloudService, RemoteStack, StackStatus, SubmitMethod};
pub use diff::{ChangeKind, ResourceChange, StackDiff, diff_stacks};
pub use error::{DeployError, RunError};
pub use hotswap::{
  HotswapDecision, HotswapMode, HotswapOperation, IneligibleChange, classify_hotswap,
};
pub use outcome::DeploymentOutcome;
pub use runner::DeploymentRunner;
pub use state::{DeployEvent, DeployOptions, DeployState, StackDeployer, step};

/// Options for one deploy or destroy run.
#[derive(Debug, Clone)]
pub struct RunOptions {
  /// Graph-wide concurrency limit. Default 1: fully sequential.
  pub concurrency: usize,
  pub action: StackAction,
  pub deploy: DeployOptions,
}

impl Default for RunOptions {
  fn default() -> Self {
    Self {
      concurrency: 1,
      action: StackAction::Deploy,
      deploy: DeployOptions::default(),
    }
  }
}

/// Result of one run: per-stack outcomes plus the terminal status of every
/// node in the graph (asset nodes included).
#[derive(Debug)]
pub struct DeployResult {
  pub run_id: String,
  pub outcomes: BTreeMap<String, DeploymentOutcome>,
  pub statuses: BTreeMap<String, NodeStatus>,
}

impl DeployResult {
  /// True iff no node ended failed. Skipped stacks do not fail the run by
  /// themselves; their upstream failure already did.
  pub fn success(&self) -> bool {
    !self.statuses.values().any(|s| *s == NodeStatus::Failed)
  }
}

/// Build the work graph for the selected stacks and drive it to
/// completion.
///
/// Construction errors (cycles, unknown dependencies) surface before any
/// remote call. A per-node failure never aborts running siblings; it only
/// prevents dependents from starting, and those are reported `Skipped`.
pub async fn run_deploy<C, B, N>(
  stacks: &[StackArtifact],
  cloud: Arc<C>,
  builder: Arc<B>,
  options: RunOptions,
  notifier: N,
  cancel: CancellationToken,
) -> Result<DeployResult, RunError>
where
  C: CloudService,
  B: AssetBuilder,
  N: ProgressNotifier,
{
  let graph = match options.action {
    StackAction::Deploy => build_deploy_graph(stacks)?,
    StackAction::Destroy => build_destroy_graph(stacks)?,
  };

  let runner = Arc::new(DeploymentRunner::new(cloud, builder, options.deploy.clone()));
  let executor = GraphExecutor::with_notifier(
    ExecutorOptions {
      max_concurrency: options.concurrency,
    },
    notifier,
  );
  let report = executor.execute(graph, runner, cancel).await?;

  let mut outcomes = BTreeMap::new();
  for stack in stacks {
    let node_id = stack_node_id(&stack.stack_id);
    let outcome = match report.statuses.get(&node_id) {
      Some(NodeStatus::Succeeded) => match report.outcomes.get(&node_id) {
        Some(NodeOutcome::Stack(stack_outcome)) => DeploymentOutcome::from(*stack_outcome),
        _ => DeploymentOutcome::Failed {
          error: "stack node succeeded without a stack outcome".to_string(),
        },
      },
      Some(NodeStatus::Skipped) => DeploymentOutcome::Skipped,
      _ => match report.failures.get(&node_id) {
        Some(error) => match error.downcast_ref::<DeployError>() {
          Some(deploy_error) => deploy_error.outcome(),
          None => DeploymentOutcome::Failed {
            error: error.to_string(),
          },
        },
        None => DeploymentOutcome::Failed {
          error: "stack node did not reach a terminal status".to_string(),
        },
      },
    };
    outcomes.insert(stack.stack_id.clone(), outcome);
  }

  Ok(DeployResult {
    run_id: report.run_id,
    outcomes,
    statuses: report.statuses,
  })
}
