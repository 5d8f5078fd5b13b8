//! The per-stack deployment state machine.
//!
//! Every state is an explicit enum value and every transition a pure
//! `step(state, event) -> state` function, so the control flow is unit
//! testable without any remote dependency. `StackDeployer` performs the
//! effect each state calls for, turns the result into an event, and steps.

use std::sync::Arc;
use std::time::Duration;

use caravel_engine::StackOutcome;
use caravel_graph::{StackAction, StackNode};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::cloud::{ChangeHandle, CloudService, StackStatus, SubmitMethod};
use crate::diff::{StackDiff, diff_stacks};
use crate::error::DeployError;
use crate::hotswap::{HotswapDecision, HotswapMode, HotswapOperation, classify_hotswap};

/// States of one stack node's execution.
#[derive(Debug, Clone, PartialEq)]
pub enum DeployState {
  /// Query remote status and compute the structural diff.
  Inspect,
  /// Remote state already matches; terminal without any submission.
  NoOpDone,
  /// The stack is stuck in an update rollback; it must be resolved before
  /// any new change is accepted.
  NeedsRollbackFirst,
  /// A rollback is in flight.
  RollingBack,
  /// A change exists and the stack is healthy; pick the path.
  ReadyToChange,
  /// Every changed resource is hotswap eligible; applying mutations.
  HotswapAttempt,
  /// Submitting a full change.
  FullDeployment,
  /// Polling the submitted change to a terminal status.
  Monitoring,
  /// The change applied.
  Done,
  /// Terminal failure.
  Failed(String),
}

/// Events the deployer feeds into the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum DeployEvent {
  Inspected {
    change_required: bool,
    stuck_in_rollback: bool,
  },
  RollbackStarted,
  RollbackComplete,
  RollbackFailed { reason: String },
  /// Classification found every changed resource eligible.
  HotswapCandidate,
  /// Hotswap disabled or classification found an ineligible change.
  FullDeploymentRequired,
  HotswapConverged,
  ChangeSubmitted,
  DeploymentSucceeded,
  DeploymentFailed { reason: String },
}

/// The transition function. Events that make no sense in a state land in
/// `Failed` rather than being ignored.
pub fn step(state: DeployState, event: DeployEvent) -> DeployState {
  match (state, event) {
    (
      DeployState::Inspect,
      DeployEvent::Inspected {
        stuck_in_rollback: true,
        ..
      },
    ) => DeployState::NeedsRollbackFirst,
    (
      DeployState::Inspect,
      DeployEvent::Inspected {
        change_required: false,
        ..
      },
    ) => DeployState::NoOpDone,
    (DeployState::Inspect, DeployEvent::Inspected { .. }) => DeployState::ReadyToChange,

    (DeployState::NeedsRollbackFirst, DeployEvent::RollbackStarted) => DeployState::RollingBack,
    (DeployState::RollingBack, DeployEvent::RollbackComplete) => DeployState::ReadyToChange,
    (DeployState::RollingBack, DeployEvent::RollbackFailed { reason }) => {
      DeployState::Failed(reason)
    }

    (DeployState::ReadyToChange, DeployEvent::HotswapCandidate) => DeployState::HotswapAttempt,
    (DeployState::ReadyToChange, DeployEvent::FullDeploymentRequired) => {
      DeployState::FullDeployment
    }

    (DeployState::HotswapAttempt, DeployEvent::HotswapConverged) => DeployState::Done,
    // Classification-time fallback only; never after a mutation applied.
    (DeployState::HotswapAttempt, DeployEvent::FullDeploymentRequired) => {
      DeployState::FullDeployment
    }

    (DeployState::FullDeployment, DeployEvent::ChangeSubmitted) => DeployState::Monitoring,
    (DeployState::Monitoring, DeployEvent::DeploymentSucceeded) => DeployState::Done,
    (DeployState::Monitoring, DeployEvent::DeploymentFailed { reason }) => {
      DeployState::Failed(reason)
    }

    (state, event) => DeployState::Failed(format!(
      "unexpected event {event:?} in state {state:?}"
    )),
  }
}

/// Options threaded through one run's stack deployments. Explicit, never
/// ambient, so concurrent runs cannot interfere.
#[derive(Debug, Clone)]
pub struct DeployOptions {
  pub hotswap: HotswapMode,
  pub submit_method: SubmitMethod,
  /// Roll a failed change back automatically. Disable to leave failed
  /// stacks in place for inspection.
  pub rollback_on_failure: bool,
  pub poll_interval: Duration,
  /// Upper bound for every polling loop (rollback, monitoring, hotswap
  /// convergence, destroy).
  pub poll_timeout: Duration,
}

impl Default for DeployOptions {
  fn default() -> Self {
    Self {
      hotswap: HotswapMode::Disabled,
      submit_method: SubmitMethod::ChangeSet,
      rollback_on_failure: true,
      poll_interval: Duration::from_secs(5),
      poll_timeout: Duration::from_secs(3600),
    }
  }
}

/// Executes one stack node to a terminal outcome.
pub struct StackDeployer<C: CloudService> {
  cloud: Arc<C>,
  options: DeployOptions,
}

impl<C: CloudService> StackDeployer<C> {
  pub fn new(cloud: Arc<C>, options: DeployOptions) -> Self {
    Self { cloud, options }
  }

  pub async fn run(&self, stack: &StackNode) -> Result<StackOutcome, DeployError> {
    match stack.action {
      StackAction::Deploy => self.deploy(stack).await,
      StackAction::Destroy => self.destroy(stack).await,
    }
  }

  async fn deploy(&self, stack: &StackNode) -> Result<StackOutcome, DeployError> {
    let environment = &stack.environment;
    let stack_id = &stack.stack_id;
    debug!(
      stack_id = %stack_id,
      environment = %environment,
      assets = stack.asset_ids.len(),
      "deploying stack"
    );

    let mut state = DeployState::Inspect;
    let mut rolled_back_first = false;
    let mut hotswapped = false;
    let mut diff: Option<StackDiff> = None;
    let mut pending_operations: Vec<HotswapOperation> = Vec::new();
    let mut change: Option<ChangeHandle> = None;
    // The structured error behind a `Failed` state, kept alongside the
    // reason the pure transition carries.
    let mut failure: Option<DeployError> = None;

    loop {
      state = match state {
        DeployState::Inspect => {
          let remote = self.cloud.describe_stack(environment, stack_id).await?;
          let event = match remote {
            Some(remote) if remote.status.is_stuck_rollback() => DeployEvent::Inspected {
              change_required: true,
              stuck_in_rollback: true,
            },
            Some(remote) if remote.status == StackStatus::DeleteComplete => {
              // A deleted stack is treated as absent: full create.
              DeployEvent::Inspected {
                change_required: true,
                stuck_in_rollback: false,
              }
            }
            Some(remote) => {
              let computed =
                diff_stacks(&remote, &stack.template, &stack.parameters, &stack.tags);
              let change_required = !computed.is_empty();
              diff = Some(computed);
              DeployEvent::Inspected {
                change_required,
                stuck_in_rollback: false,
              }
            }
            None => DeployEvent::Inspected {
              change_required: true,
              stuck_in_rollback: false,
            },
          };
          step(DeployState::Inspect, event)
        }

        DeployState::NoOpDone => {
          debug!(stack_id = %stack_id, "no changes; nothing submitted");
          return Ok(StackOutcome::NoOp);
        }

        DeployState::NeedsRollbackFirst => {
          info!(
            stack_id = %stack_id,
            "stack stuck in update rollback; resolving before the new change"
          );
          self.cloud.rollback(environment, stack_id).await?;
          step(DeployState::NeedsRollbackFirst, DeployEvent::RollbackStarted)
        }

        DeployState::RollingBack => {
          let event = self.wait_for_rollback(stack).await?;
          match &event {
            DeployEvent::RollbackComplete => rolled_back_first = true,
            DeployEvent::RollbackFailed { reason } => {
              failure = Some(DeployError::RollbackFailed {
                stack_id: stack_id.clone(),
                reason: reason.clone(),
              });
            }
            _ => {}
          }
          step(DeployState::RollingBack, event)
        }

        DeployState::ReadyToChange => {
          let event = match (self.options.hotswap, &diff) {
            (HotswapMode::FallBack, Some(computed)) => {
              match classify_hotswap(computed, &stack.template) {
                HotswapDecision::Hotswappable(operations) => {
                  pending_operations = operations;
                  DeployEvent::HotswapCandidate
                }
                HotswapDecision::NotHotswappable(reasons) => {
                  for ineligible in &reasons {
                    info!(
                      stack_id = %stack_id,
                      logical_id = %ineligible.logical_id,
                      reason = %ineligible.reason,
                      "hotswap ineligible; falling back to full deployment"
                    );
                  }
                  DeployEvent::FullDeploymentRequired
                }
              }
            }
            // Hotswap disabled, or no last-deployed state to diff against
            // (fresh create, or a rollback-first just rewrote it).
            _ => DeployEvent::FullDeploymentRequired,
          };
          step(DeployState::ReadyToChange, event)
        }

        DeployState::HotswapAttempt => {
          // Past this point a failure is a node failure, never a fallback:
          // a mutation may already have been applied.
          for operation in &pending_operations {
            self
              .cloud
              .apply_hotswap(environment, operation)
              .await
              .map_err(|source| DeployError::HotswapFailed {
                stack_id: stack_id.clone(),
                source,
              })?;
          }
          self.wait_for_convergence(stack, &pending_operations).await?;
          hotswapped = true;
          step(DeployState::HotswapAttempt, DeployEvent::HotswapConverged)
        }

        DeployState::FullDeployment => {
          let handle = self
            .cloud
            .submit_change(
              environment,
              stack_id,
              &stack.template,
              &stack.parameters,
              &stack.tags,
              self.options.submit_method,
            )
            .await?;
          debug!(stack_id = %stack_id, handle = %handle.0, method = ?self.options.submit_method, "change submitted");
          change = Some(handle);
          step(DeployState::FullDeployment, DeployEvent::ChangeSubmitted)
        }

        DeployState::Monitoring => match change.clone() {
          Some(handle) => {
            let event = self.monitor(stack, &handle).await?;
            if let DeployEvent::DeploymentFailed { reason } = &event {
              failure = Some(self.monitoring_failure(stack, reason.clone()).await);
            }
            step(DeployState::Monitoring, event)
          }
          None => DeployState::Failed("no change handle to monitor".to_string()),
        },

        DeployState::Done => {
          return Ok(StackOutcome::Deployed {
            hotswapped,
            rolled_back_first,
          });
        }

        DeployState::Failed(reason) => {
          return Err(failure.take().unwrap_or(DeployError::DeploymentFailed {
            stack_id: stack_id.clone(),
            reason,
          }));
        }
      };
    }
  }

  /// Poll the stack out of its rollback, bounded by the poll timeout.
  async fn wait_for_rollback(&self, stack: &StackNode) -> Result<DeployEvent, DeployError> {
    let deadline = Instant::now() + self.options.poll_timeout;
    loop {
      let remote = self
        .cloud
        .describe_stack(&stack.environment, &stack.stack_id)
        .await?;
      let Some(remote) = remote else {
        return Ok(DeployEvent::RollbackFailed {
          reason: "stack disappeared during rollback".to_string(),
        });
      };

      if !remote.status.is_in_progress() {
        if remote.status.is_stuck_rollback() || remote.status == StackStatus::RollbackFailed {
          return Ok(DeployEvent::RollbackFailed {
            reason: remote
              .status_reason
              .unwrap_or_else(|| remote.status.to_string()),
          });
        }
        return Ok(DeployEvent::RollbackComplete);
      }

      if Instant::now() >= deadline {
        return Err(DeployError::Timeout {
          stack_id: stack.stack_id.clone(),
          phase: "rollback",
        });
      }
      sleep(self.options.poll_interval).await;
    }
  }

  /// Poll a submitted change to a terminal status, bounded by the poll
  /// timeout. A failed change is rolled back here when configured to.
  async fn monitor(
    &self,
    stack: &StackNode,
    handle: &ChangeHandle,
  ) -> Result<DeployEvent, DeployError> {
    let deadline = Instant::now() + self.options.poll_timeout;
    loop {
      let status = self
        .cloud
        .poll_change(&stack.environment, &stack.stack_id, handle)
        .await?;

      if status.is_deploy_success() {
        return Ok(DeployEvent::DeploymentSucceeded);
      }
      if !status.is_in_progress() {
        let reason = self.failure_reason(stack, status).await;
        warn!(stack_id = %stack.stack_id, status = %status, reason = %reason, "deployment failed");
        return Ok(DeployEvent::DeploymentFailed { reason });
      }

      if Instant::now() >= deadline {
        return Err(DeployError::Timeout {
          stack_id: stack.stack_id.clone(),
          phase: "deployment",
        });
      }
      sleep(self.options.poll_interval).await;
    }
  }

  /// Build the structured error for a failed change, rolling the stack
  /// back first when configured to.
  async fn monitoring_failure(&self, stack: &StackNode, reason: String) -> DeployError {
    let already_rolled_back = match self
      .cloud
      .describe_stack(&stack.environment, &stack.stack_id)
      .await
    {
      Ok(Some(remote)) => remote.status.is_rolled_back(),
      _ => false,
    };
    if already_rolled_back {
      return DeployError::DeploymentRolledBack {
        stack_id: stack.stack_id.clone(),
        reason,
      };
    }

    if !self.options.rollback_on_failure {
      return DeployError::DeploymentFailed {
        stack_id: stack.stack_id.clone(),
        reason,
      };
    }

    info!(stack_id = %stack.stack_id, "rolling back failed deployment");
    if let Err(rollback_error) = self.cloud.rollback(&stack.environment, &stack.stack_id).await {
      return DeployError::DeploymentFailed {
        stack_id: stack.stack_id.clone(),
        reason: format!("{reason}; rollback also failed: {rollback_error}"),
      };
    }
    match self.wait_for_rollback(stack).await {
      Ok(DeployEvent::RollbackComplete) => DeployError::DeploymentRolledBack {
        stack_id: stack.stack_id.clone(),
        reason,
      },
      Ok(DeployEvent::RollbackFailed {
        reason: rollback_reason,
      }) => DeployError::DeploymentFailed {
        stack_id: stack.stack_id.clone(),
        reason: format!("{reason}; rollback also failed: {rollback_reason}"),
      },
      Ok(_) => DeployError::DeploymentFailed {
        stack_id: stack.stack_id.clone(),
        reason,
      },
      Err(error) => error,
    }
  }

  async fn failure_reason(&self, stack: &StackNode, status: StackStatus) -> String {
    match self
      .cloud
      .describe_stack(&stack.environment, &stack.stack_id)
      .await
    {
      Ok(Some(remote)) => remote
        .status_reason
        .unwrap_or_else(|| status.to_string()),
      _ => status.to_string(),
    }
  }

  /// Wait until the underlying service reports every mutated resource
  /// converged. Failures here are hotswap failures, not fallbacks.
  async fn wait_for_convergence(
    &self,
    stack: &StackNode,
    operations: &[HotswapOperation],
  ) -> Result<(), DeployError> {
    let deadline = Instant::now() + self.options.poll_timeout;
    for operation in operations {
      loop {
        let converged = self
          .cloud
          .hotswap_converged(&stack.environment, operation)
          .await
          .map_err(|source| DeployError::HotswapFailed {
            stack_id: stack.stack_id.clone(),
            source,
          })?;
        if converged {
          break;
        }
        if Instant::now() >= deadline {
          return Err(DeployError::Timeout {
            stack_id: stack.stack_id.clone(),
            phase: "hotswap convergence",
          });
        }
        sleep(self.options.poll_interval).await;
      }
    }
    Ok(())
  }

  async fn destroy(&self, stack: &StackNode) -> Result<StackOutcome, DeployError> {
    let environment = &stack.environment;
    let stack_id = &stack.stack_id;

    match self.cloud.describe_stack(environment, stack_id).await? {
      None => return Ok(StackOutcome::NoOp),
      Some(remote) if remote.status == StackStatus::DeleteComplete => {
        return Ok(StackOutcome::NoOp);
      }
      Some(_) => {}
    }

    info!(stack_id = %stack_id, "destroying stack");
    self.cloud.delete_stack(environment, stack_id).await?;

    let deadline = Instant::now() + self.options.poll_timeout;
    loop {
      match self.cloud.describe_stack(environment, stack_id).await? {
        None => return Ok(StackOutcome::Destroyed),
        Some(remote) if remote.status == StackStatus::DeleteComplete => {
          return Ok(StackOutcome::Destroyed);
        }
        Some(remote) if remote.status == StackStatus::DeleteFailed => {
          return Err(DeployError::DestroyFailed {
            stack_id: stack_id.clone(),
            reason: remote
              .status_reason
              .unwrap_or_else(|| remote.status.to_string()),
          });
        }
        Some(_) => {}
      }

      if Instant::now() >= deadline {
        return Err(DeployError::Timeout {
          stack_id: stack_id.clone(),
          phase: "destroy",
        });
      }
      sleep(self.options.poll_interval).await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn inspected(change_required: bool, stuck_in_rollback: bool) -> DeployEvent {
    DeployEvent::Inspected {
      change_required,
      stuck_in_rollback,
    }
  }

  #[test]
  fn empty_diff_short_circuits_to_no_op() {
    assert_eq!(
      step(DeployState::Inspect, inspected(false, false)),
      DeployState::NoOpDone
    );
  }

  #[test]
  fn stuck_rollback_takes_precedence_over_the_change() {
    assert_eq!(
      step(DeployState::Inspect, inspected(true, true)),
      DeployState::NeedsRollbackFirst
    );
  }

  #[test]
  fn rollback_resolution_precedes_the_new_change() {
    let state = step(DeployState::NeedsRollbackFirst, DeployEvent::RollbackStarted);
    assert_eq!(state, DeployState::RollingBack);

    let state = step(state, DeployEvent::RollbackComplete);
    assert_eq!(state, DeployState::ReadyToChange);
  }

  #[test]
  fn failed_rollback_is_terminal() {
    let state = step(
      DeployState::RollingBack,
      DeployEvent::RollbackFailed {
        reason: "resource refused to delete".to_string(),
      },
    );
    assert_eq!(
      state,
      DeployState::Failed("resource refused to delete".to_string())
    );
  }

  #[test]
  fn hotswap_candidate_and_fallback_paths() {
    assert_eq!(
      step(DeployState::ReadyToChange, DeployEvent::HotswapCandidate),
      DeployState::HotswapAttempt
    );
    assert_eq!(
      step(DeployState::ReadyToChange, DeployEvent::FullDeploymentRequired),
      DeployState::FullDeployment
    );
    assert_eq!(
      step(DeployState::HotswapAttempt, DeployEvent::HotswapConverged),
      DeployState::Done
    );
  }

  #[test]
  fn full_deployment_monitors_to_done_or_failed() {
    let state = step(DeployState::FullDeployment, DeployEvent::ChangeSubmitted);
    assert_eq!(state, DeployState::Monitoring);

    assert_eq!(
      step(state.clone(), DeployEvent::DeploymentSucceeded),
      DeployState::Done
    );
    assert_eq!(
      step(
        state,
        DeployEvent::DeploymentFailed {
          reason: "limit exceeded".to_string()
        }
      ),
      DeployState::Failed("limit exceeded".to_string())
    );
  }

  #[test]
  fn unexpected_events_fail_instead_of_being_ignored() {
    let state = step(DeployState::Inspect, DeployEvent::ChangeSubmitted);
    assert!(matches!(state, DeployState::Failed(_)));
  }
}
