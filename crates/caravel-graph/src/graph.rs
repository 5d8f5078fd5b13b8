use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::node::WorkNode;

/// Lifecycle status of one node. All nodes start `Pending`; the executor
/// is the only writer after construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
  Pending,
  Queued,
  Running,
  Succeeded,
  Failed,
  Skipped,
}

impl NodeStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(
      self,
      NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Skipped
    )
  }
}

/// The work graph for one deployment or destroy run.
///
/// Owns the nodes, the forward adjacency ("depends on"), the reverse
/// adjacency ("blocks"), and the mutable per-node status table. Insertion
/// order is recorded so scheduling is deterministic for a given assembly.
#[derive(Debug, Clone)]
pub struct WorkGraph {
  nodes: HashMap<String, WorkNode>,
  /// Node ids in insertion order; the ready-set tie-break.
  order: Vec<String>,
  /// node_id -> ids it depends on.
  dependencies: HashMap<String, Vec<String>>,
  /// node_id -> ids it blocks.
  dependents: HashMap<String, Vec<String>>,
  statuses: HashMap<String, NodeStatus>,
}

impl WorkGraph {
  pub(crate) fn new() -> Self {
    Self {
      nodes: HashMap::new(),
      order: Vec::new(),
      dependencies: HashMap::new(),
      dependents: HashMap::new(),
      statuses: HashMap::new(),
    }
  }

  /// Insert a node if not already present; returns its id. Duplicate
  /// inserts are how publish-node dedup falls out: the second stack
  /// referencing the same artifact+destination maps onto the first node.
  pub(crate) fn insert(&mut self, node: WorkNode) -> String {
    let id = node.id();
    if !self.nodes.contains_key(&id) {
      self.order.push(id.clone());
      self.dependencies.entry(id.clone()).or_default();
      self.dependents.entry(id.clone()).or_default();
      self.statuses.insert(id.clone(), NodeStatus::Pending);
      self.nodes.insert(id.clone(), node);
    }
    id
  }

  pub(crate) fn add_dependency(&mut self, node_id: &str, depends_on: &str) {
    let deps = self.dependencies.entry(node_id.to_string()).or_default();
    if !deps.iter().any(|d| d == depends_on) {
      deps.push(depends_on.to_string());
      self
        .dependents
        .entry(depends_on.to_string())
        .or_default()
        .push(node_id.to_string());
    }
  }

  pub fn node(&self, node_id: &str) -> Option<&WorkNode> {
    self.nodes.get(node_id)
  }

  /// All node ids in insertion order.
  pub fn node_ids(&self) -> &[String] {
    &self.order
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }

  /// Ids this node depends on.
  pub fn dependencies(&self, node_id: &str) -> &[String] {
    self
      .dependencies
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  /// Ids blocked by this node.
  pub fn dependents(&self, node_id: &str) -> &[String] {
    self
      .dependents
      .get(node_id)
      .map(|v| v.as_slice())
      .unwrap_or(&[])
  }

  pub fn status(&self, node_id: &str) -> NodeStatus {
    self
      .statuses
      .get(node_id)
      .copied()
      .unwrap_or(NodeStatus::Pending)
  }

  pub fn set_status(&mut self, node_id: &str, status: NodeStatus) {
    if let Some(entry) = self.statuses.get_mut(node_id) {
      *entry = status;
    }
  }

  /// Pending nodes whose dependencies have all succeeded, in insertion
  /// order.
  pub fn ready(&self) -> Vec<String> {
    self
      .order
      .iter()
      .filter(|id| self.status(id) == NodeStatus::Pending)
      .filter(|id| {
        self
          .dependencies(id)
          .iter()
          .all(|dep| self.status(dep) == NodeStatus::Succeeded)
      })
      .cloned()
      .collect()
  }

  /// Mark a node failed and transitively skip everything it blocks.
  /// Returns the skipped ids in insertion order. Skipped nodes never run
  /// and are not retried.
  pub fn mark_failed(&mut self, node_id: &str) -> Vec<String> {
    self.set_status(node_id, NodeStatus::Failed);

    let mut to_skip = Vec::new();
    let mut stack = vec![node_id.to_string()];
    while let Some(id) = stack.pop() {
      for dependent in self.dependents(&id).to_vec() {
        if !self.status(&dependent).is_terminal() {
          self.set_status(&dependent, NodeStatus::Skipped);
          to_skip.push(dependent.clone());
          stack.push(dependent);
        }
      }
    }

    // Report in deterministic order.
    let index: HashMap<&String, usize> =
      self.order.iter().enumerate().map(|(i, id)| (id, i)).collect();
    to_skip.sort_by_key(|id| index.get(id).copied().unwrap_or(usize::MAX));
    to_skip
  }

  /// True when every node has reached a terminal status.
  pub fn done(&self) -> bool {
    self.order.iter().all(|id| self.status(id).is_terminal())
  }
}
