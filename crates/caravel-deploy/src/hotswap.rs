//! Hotswap evaluation.
//!
//! Classifies a structural diff as fully hotswappable or not. All or
//! nothing: one disqualifying change forces the whole stack onto the full
//! deployment path, so a mixed change set is never partially applied
//! outside the recording of the stack's template.
//!
//! Hotswap intentionally never advances the recorded stack template; the
//! remote record stays at the pre-change template until a later full
//! deployment catches it up.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diff::{ChangeKind, StackDiff};

/// Whether the run may take the hotswap fast path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HotswapMode {
  /// Never hotswap; every change is a full deployment.
  Disabled,
  /// Hotswap when every changed resource is eligible, fall back to a full
  /// deployment otherwise.
  FallBack,
}

/// One direct-mutation call on the hotswap path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HotswapOperation {
  /// Point a compute function at new code.
  UpdateFunctionCode { function_name: String, code: Value },
  /// Mutate a compute function's configuration in place.
  UpdateFunctionConfiguration {
    function_name: String,
    properties: Value,
  },
  /// Register a new task definition revision and roll the service onto it.
  UpdateTaskDefinition {
    family: String,
    container_definitions: Value,
  },
  /// Swap a state machine's definition.
  UpdateStateMachineDefinition {
    machine_name: String,
    definition: Value,
  },
  /// Re-copy website assets into their destination bucket.
  UpdateWebsiteAssets {
    destination_bucket: String,
    source_object_keys: Value,
  },
}

/// A change that disqualifies the stack from hotswapping, with the reason
/// reported to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IneligibleChange {
  pub logical_id: String,
  pub reason: String,
}

/// Outcome of classification. Not an error either way: `NotHotswappable`
/// is a normal fallback to full deployment, distinct from a hotswap that
/// was attempted and failed.
#[derive(Debug, Clone, PartialEq)]
pub enum HotswapDecision {
  Hotswappable(Vec<HotswapOperation>),
  NotHotswappable(Vec<IneligibleChange>),
}

const FUNCTION_TYPE: &str = "AWS::Lambda::Function";
const TASK_DEFINITION_TYPE: &str = "AWS::ECS::TaskDefinition";
const STATE_MACHINE_TYPE: &str = "AWS::StepFunctions::StateMachine";
const BUCKET_DEPLOYMENT_TYPE: &str = "Custom::CDKBucketDeployment";

/// Bucket deployment properties whose change is just "copy new assets".
const BUCKET_DEPLOYMENT_PROPERTIES: &[&str] = &["SourceBucketNames", "SourceObjectKeys"];

/// Function properties with a safe direct-mutation equivalent. Role is
/// deliberately absent: permission changes are never hotswapped.
const FUNCTION_CONFIG_PROPERTIES: &[&str] = &[
  "Description",
  "Environment",
  "Handler",
  "MemorySize",
  "Timeout",
];

fn desired_properties<'a>(template: &'a Value, logical_id: &str) -> Option<&'a Value> {
  template.get("Resources")?.get(logical_id)?.get("Properties")
}

fn name_property(properties: Option<&Value>, key: &str, fallback: &str) -> String {
  properties
    .and_then(|p| p.get(key))
    .and_then(Value::as_str)
    .unwrap_or(fallback)
    .to_string()
}

/// Classify a non-empty diff against the desired template.
pub fn classify_hotswap(diff: &StackDiff, desired_template: &Value) -> HotswapDecision {
  let mut operations = Vec::new();
  let mut ineligible = Vec::new();

  if diff.parameters_changed {
    ineligible.push(IneligibleChange {
      logical_id: "<parameters>".to_string(),
      reason: "parameter changes require a full deployment".to_string(),
    });
  }
  if diff.tags_changed {
    ineligible.push(IneligibleChange {
      logical_id: "<tags>".to_string(),
      reason: "tag changes require a full deployment".to_string(),
    });
  }

  for change in &diff.resource_changes {
    let changed = match &change.kind {
      ChangeKind::Create => {
        ineligible.push(IneligibleChange {
          logical_id: change.logical_id.clone(),
          reason: format!("resource addition ({}) cannot be hotswapped", change.resource_type),
        });
        continue;
      }
      ChangeKind::Remove => {
        ineligible.push(IneligibleChange {
          logical_id: change.logical_id.clone(),
          reason: format!("resource removal ({}) cannot be hotswapped", change.resource_type),
        });
        continue;
      }
      ChangeKind::Replace => {
        ineligible.push(IneligibleChange {
          logical_id: change.logical_id.clone(),
          reason: "resource replacement cannot be hotswapped".to_string(),
        });
        continue;
      }
      ChangeKind::Update { changed_properties } => changed_properties,
    };

    if change.resource_type.starts_with("AWS::IAM::") {
      ineligible.push(IneligibleChange {
        logical_id: change.logical_id.clone(),
        reason: "IAM and permission changes are never hotswapped".to_string(),
      });
      continue;
    }

    let properties = desired_properties(desired_template, &change.logical_id);
    match change.resource_type.as_str() {
      FUNCTION_TYPE => {
        let disqualifying: Vec<&String> = changed
          .iter()
          .filter(|p| *p != "Code" && !FUNCTION_CONFIG_PROPERTIES.contains(&p.as_str()))
          .collect();
        if !disqualifying.is_empty() {
          ineligible.push(IneligibleChange {
            logical_id: change.logical_id.clone(),
            reason: format!(
              "function properties without a direct-mutation equivalent changed: {}",
              disqualifying
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(", ")
            ),
          });
          continue;
        }

        let function_name = name_property(properties, "FunctionName", &change.logical_id);
        if changed.iter().any(|p| p == "Code") {
          operations.push(HotswapOperation::UpdateFunctionCode {
            function_name: function_name.clone(),
            code: properties
              .and_then(|p| p.get("Code"))
              .cloned()
              .unwrap_or(Value::Null),
          });
        }
        let config: serde_json::Map<String, Value> = changed
          .iter()
          .filter(|p| *p != "Code")
          .filter_map(|p| {
            properties
              .and_then(|props| props.get(p))
              .map(|v| (p.clone(), v.clone()))
          })
          .collect();
        if !config.is_empty() {
          operations.push(HotswapOperation::UpdateFunctionConfiguration {
            function_name,
            properties: Value::Object(config),
          });
        }
      }
      TASK_DEFINITION_TYPE => {
        if changed.iter().any(|p| p != "ContainerDefinitions") {
          ineligible.push(IneligibleChange {
            logical_id: change.logical_id.clone(),
            reason: "only container definition changes can be hotswapped".to_string(),
          });
          continue;
        }
        operations.push(HotswapOperation::UpdateTaskDefinition {
          family: name_property(properties, "Family", &change.logical_id),
          container_definitions: properties
            .and_then(|p| p.get("ContainerDefinitions"))
            .cloned()
            .unwrap_or(Value::Null),
        });
      }
      BUCKET_DEPLOYMENT_TYPE => {
        if changed
          .iter()
          .any(|p| !BUCKET_DEPLOYMENT_PROPERTIES.contains(&p.as_str()))
        {
          ineligible.push(IneligibleChange {
            logical_id: change.logical_id.clone(),
            reason: "only website asset source changes can be hotswapped".to_string(),
          });
          continue;
        }
        operations.push(HotswapOperation::UpdateWebsiteAssets {
          destination_bucket: name_property(properties, "DestinationBucketName", &change.logical_id),
          source_object_keys: properties
            .and_then(|p| p.get("SourceObjectKeys"))
            .cloned()
            .unwrap_or(Value::Null),
        });
      }
      STATE_MACHINE_TYPE => {
        if changed.iter().any(|p| p != "DefinitionString") {
          ineligible.push(IneligibleChange {
            logical_id: change.logical_id.clone(),
            reason: "only definition changes can be hotswapped".to_string(),
          });
          continue;
        }
        operations.push(HotswapOperation::UpdateStateMachineDefinition {
          machine_name: name_property(properties, "StateMachineName", &change.logical_id),
          definition: properties
            .and_then(|p| p.get("DefinitionString"))
            .cloned()
            .unwrap_or(Value::Null),
        });
      }
      other => {
        ineligible.push(IneligibleChange {
          logical_id: change.logical_id.clone(),
          reason: format!("resource type {other} has no hotswap support"),
        });
      }
    }
  }

  if ineligible.is_empty() {
    HotswapDecision::Hotswappable(operations)
  } else {
    HotswapDecision::NotHotswappable(ineligible)
  }
}
