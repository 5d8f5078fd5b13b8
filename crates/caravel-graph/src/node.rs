use std::collections::BTreeMap;
use std::path::PathBuf;

use caravel_assembly::{AssetDestination, AssetKind, Environment};
use serde::{Deserialize, Serialize};

/// What a stack node does when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StackAction {
  Deploy,
  Destroy,
}

/// Builds one artifact from its local source.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetBuildNode {
  pub asset_id: String,
  pub kind: AssetKind,
  pub fingerprint: String,
  pub source: PathBuf,
}

/// Uploads one built artifact to one destination. Exactly one incoming
/// edge: the artifact's build node.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetPublishNode {
  pub asset_id: String,
  pub kind: AssetKind,
  pub fingerprint: String,
  pub source: PathBuf,
  pub destination: AssetDestination,
}

/// Deploys or destroys one stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackNode {
  pub stack_id: String,
  pub action: StackAction,
  pub environment: Environment,
  pub template: serde_json::Value,
  pub parameters: BTreeMap<String, String>,
  pub tags: BTreeMap<String, String>,
  /// Declared dependency stack ids (deploy direction, pre-inversion).
  pub dependencies: Vec<String>,
  /// Ids of the assets the template references.
  pub asset_ids: Vec<String>,
}

/// A unit of schedulable work. Closed set: the executor matches
/// exhaustively, so a new kind cannot be forgotten at a dispatch site.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkNode {
  AssetBuild(AssetBuildNode),
  AssetPublish(AssetPublishNode),
  Stack(StackNode),
}

impl WorkNode {
  /// Deterministic node id, stable for a fixed assembly so repeated graph
  /// construction is isomorphic.
  pub fn id(&self) -> String {
    match self {
      WorkNode::AssetBuild(n) => build_node_id(&n.asset_id),
      WorkNode::AssetPublish(n) => publish_node_id(&n.asset_id, &n.destination),
      WorkNode::Stack(n) => stack_node_id(&n.stack_id),
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      WorkNode::AssetBuild(_) => "build",
      WorkNode::AssetPublish(_) => "publish",
      WorkNode::Stack(_) => "stack",
    }
  }
}

/// Id of the build node for an artifact.
pub fn build_node_id(asset_id: &str) -> String {
  format!("build:{asset_id}")
}

/// Id of the publish node for an artifact+destination pair.
pub fn publish_node_id(asset_id: &str, destination: &AssetDestination) -> String {
  format!("publish:{asset_id}@{}", destination.key())
}

/// Id of the node deploying or destroying a stack.
pub fn stack_node_id(stack_id: &str) -> String {
  format!("stack:{stack_id}")
}
