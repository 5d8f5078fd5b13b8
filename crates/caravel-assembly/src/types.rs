use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The account/region a stack deploys into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Environment {
  pub account: String,
  pub region: String,
}

impl std::fmt::Display for Environment {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}/{}", self.account, self.region)
  }
}

/// What kind of artifact an asset is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssetKind {
  /// A file or zip archive uploaded to object storage.
  File,
  /// A container image pushed to a registry.
  ContainerImage,
}

/// One place a built asset must be uploaded to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDestination {
  pub account: String,
  pub region: String,
  /// Object key or `repository:tag`, depending on the asset kind.
  pub object_key: String,
}

impl AssetDestination {
  /// Stable dedup key: two stacks publishing the same artifact here share
  /// one publish node.
  pub fn key(&self) -> String {
    format!("{}-{}-{}", self.account, self.region, self.object_key)
  }
}

/// An asset referenced by a stack's template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetRef {
  /// Unique artifact id within the assembly.
  pub asset_id: String,
  pub kind: AssetKind,
  /// Content hash of the source, computed at synthesis time.
  pub fingerprint: String,
  /// Source location relative to the assembly directory.
  pub source: PathBuf,
  /// Everywhere this artifact must be published for the referencing
  /// stacks to deploy.
  pub destinations: Vec<AssetDestination>,
}

/// One deployable stack from the assembly manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackArtifact {
  pub stack_id: String,
  pub environment: Environment,
  /// The rendered template body.
  #[serde(default)]
  pub template: serde_json::Value,
  #[serde(default)]
  pub parameters: BTreeMap<String, String>,
  #[serde(default)]
  pub tags: BTreeMap<String, String>,
  /// Ids of stacks that must be deployed before this one.
  #[serde(default)]
  pub dependencies: Vec<String>,
  #[serde(default)]
  pub assets: Vec<AssetRef>,
}

impl StackArtifact {
  /// Ids of the assets this stack references.
  pub fn asset_ids(&self) -> Vec<String> {
    self.assets.iter().map(|a| a.asset_id.clone()).collect()
  }
}
