use caravel_engine::ExecuteError;
use caravel_graph::GraphError;
use thiserror::Error;

use crate::cloud::CloudError;
use crate::outcome::DeploymentOutcome;

/// Errors from one stack node's execution. These never cross node
/// boundaries; the executor records them and skips dependents.
#[derive(Debug, Error)]
pub enum DeployError {
  #[error(transparent)]
  Cloud(#[from] CloudError),

  /// The rollback-first step could not complete. Not retried; a stuck
  /// rollback needs operator intervention.
  #[error("rollback of stack '{stack_id}' failed: {reason}")]
  RollbackFailed { stack_id: String, reason: String },

  /// The change reached a terminal failure and the stack was left in
  /// place for inspection.
  #[error("deployment of stack '{stack_id}' failed: {reason}")]
  DeploymentFailed { stack_id: String, reason: String },

  /// The change reached a terminal failure and the stack was rolled back
  /// to its previous state.
  #[error("deployment of stack '{stack_id}' failed and was rolled back: {reason}")]
  DeploymentRolledBack { stack_id: String, reason: String },

  /// A hotswap was attempted and a direct mutation failed. Distinct from
  /// an ineligible classification, which is a silent fallback. The
  /// resource may be partially updated; the recorded template was never
  /// advanced, so the next run diffs non-empty and forces a full
  /// deployment.
  #[error("hotswap of stack '{stack_id}' failed: {source}")]
  HotswapFailed {
    stack_id: String,
    #[source]
    source: CloudError,
  },

  #[error("destroy of stack '{stack_id}' failed: {reason}")]
  DestroyFailed { stack_id: String, reason: String },

  /// A polling loop exceeded its upper bound instead of hanging.
  #[error("timed out waiting for {phase} of stack '{stack_id}'")]
  Timeout {
    stack_id: String,
    phase: &'static str,
  },
}

impl DeployError {
  /// The user-facing outcome this failure maps to in the final report.
  pub fn outcome(&self) -> DeploymentOutcome {
    match self {
      DeployError::DeploymentRolledBack { .. } => DeploymentOutcome::RolledBack,
      other => DeploymentOutcome::Failed {
        error: other.to_string(),
      },
    }
  }
}

/// Errors from a whole run, raised before or outside node execution.
#[derive(Debug, Error)]
pub enum RunError {
  #[error(transparent)]
  Graph(#[from] GraphError),

  #[error(transparent)]
  Execute(#[from] ExecuteError),
}
