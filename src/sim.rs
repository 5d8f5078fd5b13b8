//! In-memory cloud backend for the CLI.
//!
//! Implements `CloudService` against a JSON state file instead of a real
//! remote service: changes apply immediately, hotswaps always converge,
//! and deployed stack records persist across invocations so a second run
//! of the same assembly reports no-ops.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use caravel_assembly::{AssetDestination, Environment};
use caravel_deploy::{
  ChangeHandle, CloudError, CloudService, HotswapOperation, RemoteStack, StackStatus, SubmitMethod,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Serialize, Deserialize)]
struct SimState {
  stacks: BTreeMap<String, RemoteStack>,
  /// destination key + fingerprint pairs already published.
  artifacts: BTreeSet<String>,
}

pub struct InMemoryCloud {
  state: Mutex<SimState>,
  path: PathBuf,
}

impl InMemoryCloud {
  /// Load existing state from `path`, or start empty if the file does not
  /// exist yet.
  pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
    let path = path.into();
    let state = match std::fs::read_to_string(&path) {
      Ok(content) => serde_json::from_str(&content)
        .with_context(|| format!("failed to parse state file: {}", path.display()))?,
      Err(error) if error.kind() == std::io::ErrorKind::NotFound => SimState::default(),
      Err(error) => {
        return Err(error)
          .with_context(|| format!("failed to read state file: {}", path.display()));
      }
    };
    Ok(Self {
      state: Mutex::new(state),
      path,
    })
  }

  fn save(&self, state: &SimState) -> Result<(), CloudError> {
    let content = serde_json::to_string_pretty(state).map_err(|error| CloudError::Api {
      message: format!("failed to serialize state: {error}"),
    })?;
    std::fs::write(&self.path, content).map_err(|error| CloudError::Api {
      message: format!("failed to write state file {}: {error}", self.path.display()),
    })
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
    // Lock poisoning only happens after a panic elsewhere; state is still
    // structurally valid, so keep going.
    self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

fn artifact_key(destination: &AssetDestination, fingerprint: &str) -> String {
  format!("{}|{}", destination.key(), fingerprint)
}

#[async_trait]
impl CloudService for InMemoryCloud {
  async fn describe_stack(
    &self,
    _environment: &Environment,
    stack_id: &str,
  ) -> Result<Option<RemoteStack>, CloudError> {
    Ok(self.lock().stacks.get(stack_id).cloned())
  }

  async fn submit_change(
    &self,
    _environment: &Environment,
    stack_id: &str,
    template: &serde_json::Value,
    parameters: &BTreeMap<String, String>,
    tags: &BTreeMap<String, String>,
    _method: SubmitMethod,
  ) -> Result<ChangeHandle, CloudError> {
    let mut state = self.lock();
    let status = if state.stacks.contains_key(stack_id) {
      StackStatus::UpdateComplete
    } else {
      StackStatus::CreateComplete
    };
    state.stacks.insert(
      stack_id.to_string(),
      RemoteStack {
        status,
        template: template.clone(),
        parameters: parameters.clone(),
        tags: tags.clone(),
        status_reason: None,
      },
    );
    self.save(&state)?;
    Ok(ChangeHandle(stack_id.to_string()))
  }

  async fn poll_change(
    &self,
    _environment: &Environment,
    stack_id: &str,
    _handle: &ChangeHandle,
  ) -> Result<StackStatus, CloudError> {
    // Changes apply synchronously in the simulator.
    Ok(
      self
        .lock()
        .stacks
        .get(stack_id)
        .map(|s| s.status)
        .unwrap_or(StackStatus::DeleteComplete),
    )
  }

  async fn rollback(&self, _environment: &Environment, stack_id: &str) -> Result<(), CloudError> {
    let mut state = self.lock();
    if let Some(stack) = state.stacks.get_mut(stack_id) {
      stack.status = StackStatus::UpdateRollbackComplete;
      stack.status_reason = None;
    }
    self.save(&state)
  }

  async fn delete_stack(
    &self,
    _environment: &Environment,
    stack_id: &str,
  ) -> Result<(), CloudError> {
    let mut state = self.lock();
    state.stacks.remove(stack_id);
    self.save(&state)
  }

  async fn artifact_exists(
    &self,
    destination: &AssetDestination,
    fingerprint: &str,
  ) -> Result<bool, CloudError> {
    Ok(self.lock().artifacts.contains(&artifact_key(destination, fingerprint)))
  }

  async fn upload_artifact(
    &self,
    _source: &Path,
    destination: &AssetDestination,
    fingerprint: &str,
  ) -> Result<(), CloudError> {
    let mut state = self.lock();
    state.artifacts.insert(artifact_key(destination, fingerprint));
    self.save(&state)
  }

  async fn apply_hotswap(
    &self,
    _environment: &Environment,
    _operation: &HotswapOperation,
  ) -> Result<(), CloudError> {
    // Direct mutations deliberately leave the recorded template alone.
    Ok(())
  }

  async fn hotswap_converged(
    &self,
    _environment: &Environment,
    _operation: &HotswapOperation,
  ) -> Result<bool, CloudError> {
    Ok(true)
  }
}
