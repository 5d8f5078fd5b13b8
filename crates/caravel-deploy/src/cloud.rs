//! Remote service boundary.
//!
//! `CloudService` is the thin seam the state machine and the publish
//! runner talk through: describe, submit, poll, rollback, upload, plus the
//! resource-specific direct mutations the hotswap path uses. A production
//! client wraps the vendor SDK behind this trait; tests script it.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use caravel_assembly::{AssetDestination, Environment};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hotswap::HotswapOperation;

/// Errors a remote call can surface. Messages are propagated verbatim to
/// the final report; the engine attempts no semantic recovery here.
#[derive(Debug, Error)]
pub enum CloudError {
  #[error("remote api error: {message}")]
  Api { message: String },

  /// The remote system's single-writer-per-stack semantics rejected the
  /// call. Not retried; the node fails.
  #[error("stack '{stack_id}' is being modified concurrently: {message}")]
  ConcurrentModification { stack_id: String, message: String },
}

/// Remote lifecycle status of a stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
  CreateInProgress,
  CreateComplete,
  CreateFailed,
  UpdateInProgress,
  UpdateComplete,
  UpdateFailed,
  UpdateRollbackInProgress,
  UpdateRollbackComplete,
  UpdateRollbackFailed,
  RollbackInProgress,
  RollbackComplete,
  RollbackFailed,
  DeleteInProgress,
  DeleteComplete,
  DeleteFailed,
}

impl StackStatus {
  pub fn is_in_progress(&self) -> bool {
    matches!(
      self,
      StackStatus::CreateInProgress
        | StackStatus::UpdateInProgress
        | StackStatus::UpdateRollbackInProgress
        | StackStatus::RollbackInProgress
        | StackStatus::DeleteInProgress
    )
  }

  /// A stalled update-rollback: the remote system refuses any new change
  /// until the rollback is continued to completion.
  pub fn is_stuck_rollback(&self) -> bool {
    matches!(self, StackStatus::UpdateRollbackFailed)
  }

  /// Terminal statuses a successful change lands in.
  pub fn is_deploy_success(&self) -> bool {
    matches!(self, StackStatus::CreateComplete | StackStatus::UpdateComplete)
  }

  /// The remote system already rolled the change back on its own.
  pub fn is_rolled_back(&self) -> bool {
    matches!(
      self,
      StackStatus::UpdateRollbackComplete | StackStatus::RollbackComplete
    )
  }
}

impl std::fmt::Display for StackStatus {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = format!("{self:?}");
    // Debug form is CamelCase; the wire form is SCREAMING_SNAKE_CASE.
    let mut out = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
      if c.is_uppercase() && i > 0 {
        out.push('_');
      }
      out.push(c.to_ascii_uppercase());
    }
    f.write_str(&out)
  }
}

/// The remote system's view of a stack: its status and the last-deployed
/// template, parameters, and tags the structural diff compares against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteStack {
  pub status: StackStatus,
  pub template: serde_json::Value,
  pub parameters: BTreeMap<String, String>,
  pub tags: BTreeMap<String, String>,
  /// Remote-provided context for failure statuses, surfaced verbatim.
  pub status_reason: Option<String>,
}

/// Handle for a submitted change, polled until terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeHandle(pub String);

/// How a change is submitted: previewed through a change set and then
/// executed, or applied directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubmitMethod {
  ChangeSet,
  Direct,
}

/// Thin transport wrapper over the remote infrastructure service.
#[async_trait]
pub trait CloudService: Send + Sync + 'static {
  /// Current remote state, or `None` for a stack that does not exist.
  async fn describe_stack(
    &self,
    environment: &Environment,
    stack_id: &str,
  ) -> Result<Option<RemoteStack>, CloudError>;

  /// Submit a template change for create or update.
  async fn submit_change(
    &self,
    environment: &Environment,
    stack_id: &str,
    template: &serde_json::Value,
    parameters: &BTreeMap<String, String>,
    tags: &BTreeMap<String, String>,
    method: SubmitMethod,
  ) -> Result<ChangeHandle, CloudError>;

  /// Current status of a submitted change's stack.
  async fn poll_change(
    &self,
    environment: &Environment,
    stack_id: &str,
    handle: &ChangeHandle,
  ) -> Result<StackStatus, CloudError>;

  /// Start (or continue) rolling the stack back to its last stable state.
  async fn rollback(&self, environment: &Environment, stack_id: &str) -> Result<(), CloudError>;

  async fn delete_stack(&self, environment: &Environment, stack_id: &str)
  -> Result<(), CloudError>;

  /// Whether the destination already holds this artifact fingerprint.
  async fn artifact_exists(
    &self,
    destination: &AssetDestination,
    fingerprint: &str,
  ) -> Result<bool, CloudError>;

  async fn upload_artifact(
    &self,
    source: &Path,
    destination: &AssetDestination,
    fingerprint: &str,
  ) -> Result<(), CloudError>;

  /// Apply one resource-specific direct mutation (hotswap path only).
  async fn apply_hotswap(
    &self,
    environment: &Environment,
    operation: &HotswapOperation,
  ) -> Result<(), CloudError>;

  /// Whether the underlying service reports the mutated resource as
  /// converged (e.g. an ECS rollout finished).
  async fn hotswap_converged(
    &self,
    environment: &Environment,
    operation: &HotswapOperation,
  ) -> Result<bool, CloudError>;
}
