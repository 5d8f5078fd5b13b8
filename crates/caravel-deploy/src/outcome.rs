use caravel_engine::StackOutcome;
use serde::{Deserialize, Serialize};

/// Terminal per-stack outcome reported to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeploymentOutcome {
  /// Remote state already matched; nothing was submitted.
  NoOp,
  /// A change was applied.
  Deployed {
    hotswapped: bool,
    rolled_back_first: bool,
  },
  /// The stack was destroyed.
  Destroyed,
  /// The change failed and the stack was rolled back to its previous
  /// state.
  RolledBack,
  /// The change failed; the remote error is carried verbatim.
  Failed { error: String },
  /// Never ran because an upstream node failed.
  Skipped,
}

impl From<StackOutcome> for DeploymentOutcome {
  fn from(outcome: StackOutcome) -> Self {
    match outcome {
      StackOutcome::NoOp => DeploymentOutcome::NoOp,
      StackOutcome::Deployed {
        hotswapped,
        rolled_back_first,
      } => DeploymentOutcome::Deployed {
        hotswapped,
        rolled_back_first,
      },
      StackOutcome::Destroyed => DeploymentOutcome::Destroyed,
    }
  }
}

impl std::fmt::Display for DeploymentOutcome {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      DeploymentOutcome::NoOp => write!(f, "no-op"),
      DeploymentOutcome::Deployed {
        hotswapped: true, ..
      } => write!(f, "deployed (hotswapped)"),
      DeploymentOutcome::Deployed {
        rolled_back_first: true,
        ..
      } => write!(f, "deployed (after rollback)"),
      DeploymentOutcome::Deployed { .. } => write!(f, "deployed"),
      DeploymentOutcome::Destroyed => write!(f, "destroyed"),
      DeploymentOutcome::RolledBack => write!(f, "rolled back"),
      DeploymentOutcome::Failed { error } => write!(f, "failed: {error}"),
      DeploymentOutcome::Skipped => write!(f, "skipped"),
    }
  }
}
