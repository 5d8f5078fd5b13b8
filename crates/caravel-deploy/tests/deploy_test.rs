//! End-to-end deployment tests over a scripted in-memory cloud service:
//! idempotence, upload dedup, rollback-first, hotswap decisions, failure
//! propagation, and destroy ordering.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use caravel_assembly::{AssetDestination, AssetKind, AssetRef, Environment, StackArtifact};
use caravel_deploy::{
  AssetBuilder, BuildError, ChangeHandle, CloudError, CloudService, DeployOptions,
  DeploymentOutcome, HotswapMode, HotswapOperation, RemoteStack, RunOptions, StackStatus,
  SubmitMethod, run_deploy,
};
use caravel_engine::NoopNotifier;
use caravel_graph::{AssetBuildNode, StackAction};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

fn env() -> Environment {
  Environment {
    account: "12345".to_string(),
    region: "us-east-1".to_string(),
  }
}

fn stack(id: &str, deps: &[&str], template: Value) -> StackArtifact {
  StackArtifact {
    stack_id: id.to_string(),
    environment: env(),
    template,
    parameters: BTreeMap::new(),
    tags: BTreeMap::new(),
    dependencies: deps.iter().map(|d| d.to_string()).collect(),
    assets: Vec::new(),
  }
}

fn lambda_template(code_key: &str) -> Value {
  json!({
    "Resources": {
      "Fn": {
        "Type": "AWS::Lambda::Function",
        "Properties": {
          "FunctionName": "handler",
          "Code": { "S3Key": code_key }
        }
      }
    }
  })
}

fn remote(status: StackStatus, template: Value) -> RemoteStack {
  RemoteStack {
    status,
    template,
    parameters: BTreeMap::new(),
    tags: BTreeMap::new(),
    status_reason: None,
  }
}

#[derive(Default)]
struct FakeState {
  stacks: HashMap<String, RemoteStack>,
  pending: HashMap<String, RemoteStack>,
  /// Stacks whose change poll never leaves in-progress.
  stalled: HashSet<String>,
  /// Stacks whose change submission is rejected.
  fail_submit: HashMap<String, String>,
  /// Terminal failure status reported on the first poll of a change.
  poll_failures: HashMap<String, StackStatus>,
  /// destination key + fingerprint pairs already published.
  artifacts: HashSet<String>,
  submit_calls: Vec<String>,
  upload_calls: Vec<String>,
  hotswap_calls: Vec<HotswapOperation>,
  rollback_calls: Vec<String>,
  delete_calls: Vec<String>,
}

#[derive(Default)]
struct FakeCloud {
  state: Mutex<FakeState>,
}

impl FakeCloud {
  fn with_state(f: impl FnOnce(&mut FakeState)) -> Arc<Self> {
    let cloud = Self::default();
    f(&mut cloud.state.lock().unwrap());
    Arc::new(cloud)
  }

  fn submit_calls(&self) -> Vec<String> {
    self.state.lock().unwrap().submit_calls.clone()
  }

  fn upload_calls(&self) -> Vec<String> {
    self.state.lock().unwrap().upload_calls.clone()
  }

  fn hotswap_calls(&self) -> Vec<HotswapOperation> {
    self.state.lock().unwrap().hotswap_calls.clone()
  }

  fn rollback_calls(&self) -> Vec<String> {
    self.state.lock().unwrap().rollback_calls.clone()
  }

  fn delete_calls(&self) -> Vec<String> {
    self.state.lock().unwrap().delete_calls.clone()
  }
}

fn artifact_key(destination: &AssetDestination, fingerprint: &str) -> String {
  format!("{}|{}", destination.key(), fingerprint)
}

#[async_trait]
impl CloudService for FakeCloud {
  async fn describe_stack(
    &self,
    _environment: &Environment,
    stack_id: &str,
  ) -> Result<Option<RemoteStack>, CloudError> {
    Ok(self.state.lock().unwrap().stacks.get(stack_id).cloned())
  }

  async fn submit_change(
    &self,
    _environment: &Environment,
    stack_id: &str,
    template: &Value,
    parameters: &BTreeMap<String, String>,
    tags: &BTreeMap<String, String>,
    _method: SubmitMethod,
  ) -> Result<ChangeHandle, CloudError> {
    let mut state = self.state.lock().unwrap();
    if let Some(message) = state.fail_submit.get(stack_id) {
      return Err(CloudError::Api {
        message: message.clone(),
      });
    }
    state.submit_calls.push(stack_id.to_string());
    let existed = state.stacks.contains_key(stack_id);
    let status = if existed {
      StackStatus::UpdateComplete
    } else {
      StackStatus::CreateComplete
    };
    state.pending.insert(
      stack_id.to_string(),
      RemoteStack {
        status,
        template: template.clone(),
        parameters: parameters.clone(),
        tags: tags.clone(),
        status_reason: None,
      },
    );
    Ok(ChangeHandle(stack_id.to_string()))
  }

  async fn poll_change(
    &self,
    _environment: &Environment,
    stack_id: &str,
    _handle: &ChangeHandle,
  ) -> Result<StackStatus, CloudError> {
    let mut state = self.state.lock().unwrap();
    if state.stalled.contains(stack_id) {
      return Ok(StackStatus::UpdateInProgress);
    }
    if let Some(failure) = state.poll_failures.remove(stack_id) {
      state.pending.remove(stack_id);
      if let Some(existing) = state.stacks.get_mut(stack_id) {
        existing.status = failure;
        existing.status_reason = Some("resource limit exceeded".to_string());
      }
      return Ok(failure);
    }
    match state.pending.remove(stack_id) {
      Some(applied) => {
        let status = applied.status;
        state.stacks.insert(stack_id.to_string(), applied);
        Ok(status)
      }
      None => Ok(
        state
          .stacks
          .get(stack_id)
          .map(|s| s.status)
          .unwrap_or(StackStatus::DeleteComplete),
      ),
    }
  }

  async fn rollback(
    &self,
    _environment: &Environment,
    stack_id: &str,
  ) -> Result<(), CloudError> {
    let mut state = self.state.lock().unwrap();
    state.rollback_calls.push(stack_id.to_string());
    if let Some(existing) = state.stacks.get_mut(stack_id) {
      existing.status = StackStatus::UpdateRollbackComplete;
    }
    Ok(())
  }

  async fn delete_stack(
    &self,
    _environment: &Environment,
    stack_id: &str,
  ) -> Result<(), CloudError> {
    let mut state = self.state.lock().unwrap();
    state.delete_calls.push(stack_id.to_string());
    state.stacks.remove(stack_id);
    Ok(())
  }

  async fn artifact_exists(
    &self,
    destination: &AssetDestination,
    fingerprint: &str,
  ) -> Result<bool, CloudError> {
    Ok(
      self
        .state
        .lock()
        .unwrap()
        .artifacts
        .contains(&artifact_key(destination, fingerprint)),
    )
  }

  async fn upload_artifact(
    &self,
    _source: &Path,
    destination: &AssetDestination,
    fingerprint: &str,
  ) -> Result<(), CloudError> {
    let mut state = self.state.lock().unwrap();
    state.upload_calls.push(destination.key());
    state.artifacts.insert(artifact_key(destination, fingerprint));
    Ok(())
  }

  async fn apply_hotswap(
    &self,
    _environment: &Environment,
    operation: &HotswapOperation,
  ) -> Result<(), CloudError> {
    self
      .state
      .lock()
      .unwrap()
      .hotswap_calls
      .push(operation.clone());
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

/// Builder that accepts everything; asset bundling is not under test.
struct NoopBuilder;

#[async_trait]
impl AssetBuilder for NoopBuilder {
  async fn build(
    &self,
    _node: &AssetBuildNode,
    _cancel: CancellationToken,
  ) -> Result<(), BuildError> {
    Ok(())
  }
}

fn fast_options(action: StackAction, hotswap: HotswapMode) -> RunOptions {
  RunOptions {
    concurrency: 1,
    action,
    deploy: DeployOptions {
      hotswap,
      poll_interval: Duration::from_millis(1),
      poll_timeout: Duration::from_millis(250),
      ..DeployOptions::default()
    },
  }
}

async fn run(
  stacks: &[StackArtifact],
  cloud: Arc<FakeCloud>,
  options: RunOptions,
) -> caravel_deploy::DeployResult {
  run_deploy(
    stacks,
    cloud,
    Arc::new(NoopBuilder),
    options,
    NoopNotifier,
    CancellationToken::new(),
  )
  .await
  .unwrap()
}

#[tokio::test]
async fn fresh_deploy_then_second_run_is_a_no_op() {
  let cloud = FakeCloud::with_state(|_| {});
  let stacks = vec![stack("app", &[], lambda_template("v1.zip"))];

  let first = run(
    &stacks,
    cloud.clone(),
    fast_options(StackAction::Deploy, HotswapMode::Disabled),
  )
  .await;
  assert_eq!(
    first.outcomes["app"],
    DeploymentOutcome::Deployed {
      hotswapped: false,
      rolled_back_first: false
    }
  );
  assert_eq!(cloud.submit_calls(), vec!["app"]);

  let second = run(
    &stacks,
    cloud.clone(),
    fast_options(StackAction::Deploy, HotswapMode::Disabled),
  )
  .await;
  assert_eq!(second.outcomes["app"], DeploymentOutcome::NoOp);
  // No second submission: remote state already matched.
  assert_eq!(cloud.submit_calls(), vec!["app"]);
}

#[tokio::test]
async fn shared_artifact_is_uploaded_exactly_once() {
  let destination = AssetDestination {
    account: "12345".to_string(),
    region: "us-east-1".to_string(),
    object_key: "code.zip".to_string(),
  };
  let asset = AssetRef {
    asset_id: "code".to_string(),
    kind: AssetKind::File,
    fingerprint: "sha256:abc".to_string(),
    source: "assets/code.zip".into(),
    destinations: vec![destination],
  };

  let mut a = stack("a", &[], json!({ "Resources": {} }));
  a.assets.push(asset.clone());
  let mut b = stack("b", &[], json!({ "Resources": {} }));
  b.assets.push(asset);

  let cloud = FakeCloud::with_state(|_| {});
  let result = run(
    &[a, b],
    cloud.clone(),
    fast_options(StackAction::Deploy, HotswapMode::Disabled),
  )
  .await;

  assert!(result.success());
  assert_eq!(cloud.upload_calls().len(), 1);
}

#[tokio::test]
async fn existing_fingerprint_short_circuits_the_upload() {
  let destination = AssetDestination {
    account: "12345".to_string(),
    region: "us-east-1".to_string(),
    object_key: "code.zip".to_string(),
  };
  let mut app = stack("app", &[], json!({ "Resources": {} }));
  app.assets.push(AssetRef {
    asset_id: "code".to_string(),
    kind: AssetKind::File,
    fingerprint: "sha256:abc".to_string(),
    source: "assets/code.zip".into(),
    destinations: vec![destination.clone()],
  });

  let cloud = FakeCloud::with_state(|state| {
    state.artifacts.insert(artifact_key(&destination, "sha256:abc"));
  });
  let result = run(
    &[app],
    cloud.clone(),
    fast_options(StackAction::Deploy, HotswapMode::Disabled),
  )
  .await;

  assert!(result.success());
  assert!(cloud.upload_calls().is_empty());
}

#[tokio::test]
async fn stuck_rollback_is_resolved_before_the_new_change() {
  let cloud = FakeCloud::with_state(|state| {
    state.stacks.insert(
      "app".to_string(),
      remote(StackStatus::UpdateRollbackFailed, lambda_template("v1.zip")),
    );
  });
  let stacks = vec![stack("app", &[], lambda_template("v2.zip"))];

  let result = run(
    &stacks,
    cloud.clone(),
    fast_options(StackAction::Deploy, HotswapMode::Disabled),
  )
  .await;

  assert_eq!(
    result.outcomes["app"],
    DeploymentOutcome::Deployed {
      hotswapped: false,
      rolled_back_first: true
    }
  );
  assert_eq!(cloud.rollback_calls(), vec!["app"]);
  assert_eq!(cloud.submit_calls(), vec!["app"]);
}

#[tokio::test]
async fn eligible_change_is_hotswapped_without_a_submission() {
  let cloud = FakeCloud::with_state(|state| {
    state.stacks.insert(
      "app".to_string(),
      remote(StackStatus::UpdateComplete, lambda_template("v1.zip")),
    );
  });
  let stacks = vec![stack("app", &[], lambda_template("v2.zip"))];

  let result = run(
    &stacks,
    cloud.clone(),
    fast_options(StackAction::Deploy, HotswapMode::FallBack),
  )
  .await;

  assert_eq!(
    result.outcomes["app"],
    DeploymentOutcome::Deployed {
      hotswapped: true,
      rolled_back_first: false
    }
  );
  assert!(cloud.submit_calls().is_empty());
  assert_eq!(cloud.hotswap_calls().len(), 1);
}

#[tokio::test]
async fn one_ineligible_resource_forces_a_full_deployment() {
  let mut desired = lambda_template("v2.zip");
  desired["Resources"]["Bucket"] = json!({ "Type": "AWS::S3::Bucket", "Properties": {} });

  let cloud = FakeCloud::with_state(|state| {
    state.stacks.insert(
      "app".to_string(),
      remote(StackStatus::UpdateComplete, lambda_template("v1.zip")),
    );
  });
  let stacks = vec![stack("app", &[], desired)];

  let result = run(
    &stacks,
    cloud.clone(),
    fast_options(StackAction::Deploy, HotswapMode::FallBack),
  )
  .await;

  assert_eq!(
    result.outcomes["app"],
    DeploymentOutcome::Deployed {
      hotswapped: false,
      rolled_back_first: false
    }
  );
  // All or nothing: no direct mutation was issued.
  assert!(cloud.hotswap_calls().is_empty());
  assert_eq!(cloud.submit_calls(), vec!["app"]);
}

#[tokio::test]
async fn failed_stack_skips_its_dependents() {
  let cloud = FakeCloud::with_state(|state| {
    state
      .fail_submit
      .insert("a".to_string(), "access denied".to_string());
  });
  let stacks = vec![
    stack("a", &[], lambda_template("v1.zip")),
    stack("b", &["a"], lambda_template("v1.zip")),
  ];

  let result = run(
    &stacks,
    cloud.clone(),
    fast_options(StackAction::Deploy, HotswapMode::Disabled),
  )
  .await;

  assert!(!result.success());
  assert!(matches!(
    &result.outcomes["a"],
    DeploymentOutcome::Failed { error } if error.contains("access denied")
  ));
  assert_eq!(result.outcomes["b"], DeploymentOutcome::Skipped);
  assert!(cloud.submit_calls().is_empty());
}

#[tokio::test]
async fn failed_change_is_rolled_back_by_default() {
  let cloud = FakeCloud::with_state(|state| {
    state.stacks.insert(
      "app".to_string(),
      remote(StackStatus::UpdateComplete, lambda_template("v1.zip")),
    );
    state
      .poll_failures
      .insert("app".to_string(), StackStatus::UpdateFailed);
  });
  let stacks = vec![stack("app", &[], lambda_template("v2.zip"))];

  let result = run(
    &stacks,
    cloud.clone(),
    fast_options(StackAction::Deploy, HotswapMode::Disabled),
  )
  .await;

  assert_eq!(result.outcomes["app"], DeploymentOutcome::RolledBack);
  assert_eq!(cloud.rollback_calls(), vec!["app"]);
}

#[tokio::test]
async fn no_rollback_leaves_the_failed_stack_in_place() {
  let cloud = FakeCloud::with_state(|state| {
    state.stacks.insert(
      "app".to_string(),
      remote(StackStatus::UpdateComplete, lambda_template("v1.zip")),
    );
    state
      .poll_failures
      .insert("app".to_string(), StackStatus::UpdateFailed);
  });
  let stacks = vec![stack("app", &[], lambda_template("v2.zip"))];

  let mut options = fast_options(StackAction::Deploy, HotswapMode::Disabled);
  options.deploy.rollback_on_failure = false;

  let result = run(&stacks, cloud.clone(), options).await;

  assert!(matches!(
    &result.outcomes["app"],
    DeploymentOutcome::Failed { error } if error.contains("resource limit exceeded")
  ));
  assert!(cloud.rollback_calls().is_empty());
}

#[tokio::test]
async fn destroy_runs_in_reverse_dependency_order() {
  let cloud = FakeCloud::with_state(|state| {
    for id in ["a", "b", "c"] {
      state.stacks.insert(
        id.to_string(),
        remote(StackStatus::UpdateComplete, json!({ "Resources": {} })),
      );
    }
  });
  // c depends on b depends on a.
  let stacks = vec![
    stack("a", &[], json!({ "Resources": {} })),
    stack("b", &["a"], json!({ "Resources": {} })),
    stack("c", &["b"], json!({ "Resources": {} })),
  ];

  let result = run(
    &stacks,
    cloud.clone(),
    fast_options(StackAction::Destroy, HotswapMode::Disabled),
  )
  .await;

  assert!(result.success());
  for id in ["a", "b", "c"] {
    assert_eq!(result.outcomes[id], DeploymentOutcome::Destroyed);
  }
  assert_eq!(cloud.delete_calls(), vec!["c", "b", "a"]);
}

#[tokio::test]
async fn destroying_an_absent_stack_is_a_no_op() {
  let cloud = FakeCloud::with_state(|_| {});
  let stacks = vec![stack("ghost", &[], json!({ "Resources": {} }))];

  let result = run(
    &stacks,
    cloud.clone(),
    fast_options(StackAction::Destroy, HotswapMode::Disabled),
  )
  .await;

  assert_eq!(result.outcomes["ghost"], DeploymentOutcome::NoOp);
  assert!(cloud.delete_calls().is_empty());
}

#[tokio::test]
async fn stalled_monitoring_fails_with_a_timeout() {
  let cloud = FakeCloud::with_state(|state| {
    state.stalled.insert("app".to_string());
  });
  let stacks = vec![stack("app", &[], lambda_template("v1.zip"))];

  let mut options = fast_options(StackAction::Deploy, HotswapMode::Disabled);
  options.deploy.poll_timeout = Duration::from_millis(20);

  let result = run(&stacks, cloud.clone(), options).await;

  assert!(matches!(
    &result.outcomes["app"],
    DeploymentOutcome::Failed { error } if error.contains("timed out")
  ));
}
