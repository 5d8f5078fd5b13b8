//! Structural stack diff.
//!
//! "Is there a change" is answered by comparing the desired
//! template+parameters+tags against the last-deployed equivalents, never
//! by wall-clock or object identity: the same deploy run twice must be a
//! no-op the second time.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::cloud::RemoteStack;

/// How one logical resource changed.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
  Create,
  Update { changed_properties: Vec<String> },
  /// The resource's type changed; only replacement can reconcile it.
  Replace,
  Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceChange {
  pub logical_id: String,
  pub resource_type: String,
  pub kind: ChangeKind,
}

/// The structural difference between desired and last-deployed state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StackDiff {
  pub resource_changes: Vec<ResourceChange>,
  pub parameters_changed: bool,
  pub tags_changed: bool,
}

impl StackDiff {
  pub fn is_empty(&self) -> bool {
    self.resource_changes.is_empty() && !self.parameters_changed && !self.tags_changed
  }
}

fn resources(template: &Value) -> BTreeMap<String, &Value> {
  template
    .get("Resources")
    .and_then(Value::as_object)
    .map(|map| map.iter().map(|(k, v)| (k.clone(), v)).collect())
    .unwrap_or_default()
}

fn resource_type(resource: &Value) -> String {
  resource
    .get("Type")
    .and_then(Value::as_str)
    .unwrap_or("Unknown")
    .to_string()
}

/// Property names (top-level keys of `Properties`, plus any non-property
/// resource attribute) that differ between two resource definitions.
fn changed_properties(current: &Value, desired: &Value) -> Vec<String> {
  let mut changed = BTreeSet::new();

  let empty = serde_json::Map::new();
  let current_props = current
    .get("Properties")
    .and_then(Value::as_object)
    .unwrap_or(&empty);
  let desired_props = desired
    .get("Properties")
    .and_then(Value::as_object)
    .unwrap_or(&empty);

  for key in current_props.keys().chain(desired_props.keys()) {
    if current_props.get(key) != desired_props.get(key) {
      changed.insert(key.clone());
    }
  }

  // Attribute changes outside Properties (Metadata, DependsOn, ...) count
  // as changes too; they are reported under the attribute name.
  let attrs = |v: &Value| -> BTreeMap<String, Value> {
    v.as_object()
      .map(|map| {
        map
          .iter()
          .filter(|(k, _)| *k != "Properties")
          .map(|(k, v)| (k.clone(), v.clone()))
          .collect()
      })
      .unwrap_or_default()
  };
  let current_attrs = attrs(current);
  let desired_attrs = attrs(desired);
  for key in current_attrs.keys().chain(desired_attrs.keys()) {
    if current_attrs.get(key) != desired_attrs.get(key) {
      changed.insert(key.clone());
    }
  }

  changed.into_iter().collect()
}

/// Diff the desired template+parameters+tags against the remote stack's
/// last-deployed state.
pub fn diff_stacks(
  current: &RemoteStack,
  desired_template: &Value,
  desired_parameters: &BTreeMap<String, String>,
  desired_tags: &BTreeMap<String, String>,
) -> StackDiff {
  let current_resources = resources(&current.template);
  let desired_resources = resources(desired_template);

  let mut changes = Vec::new();

  for (logical_id, desired) in &desired_resources {
    match current_resources.get(logical_id) {
      None => changes.push(ResourceChange {
        logical_id: logical_id.clone(),
        resource_type: resource_type(desired),
        kind: ChangeKind::Create,
      }),
      Some(current) if *current == *desired => {}
      Some(current) => {
        let kind = if resource_type(current) != resource_type(desired) {
          ChangeKind::Replace
        } else {
          ChangeKind::Update {
            changed_properties: changed_properties(current, desired),
          }
        };
        changes.push(ResourceChange {
          logical_id: logical_id.clone(),
          resource_type: resource_type(desired),
          kind,
        });
      }
    }
  }

  for (logical_id, current) in &current_resources {
    if !desired_resources.contains_key(logical_id) {
      changes.push(ResourceChange {
        logical_id: logical_id.clone(),
        resource_type: resource_type(current),
        kind: ChangeKind::Remove,
      });
    }
  }

  StackDiff {
    resource_changes: changes,
    parameters_changed: current.parameters != *desired_parameters,
    tags_changed: current.tags != *desired_tags,
  }
}
