//! Asset build boundary.
//!
//! How a file is bundled or a container image is actually built belongs to
//! external tooling; the work graph only needs a seam it can drive. The
//! bundled `FsAssetBuilder` covers the common case of assets the
//! synthesizer already materialized on disk.

use std::path::PathBuf;

use async_trait::async_trait;
use caravel_graph::AssetBuildNode;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("asset '{asset_id}' source missing: {path}")]
  SourceMissing { asset_id: String, path: PathBuf },

  #[error("build of asset '{asset_id}' failed: {message}")]
  Failed { asset_id: String, message: String },
}

/// Builds one artifact from its local source.
#[async_trait]
pub trait AssetBuilder: Send + Sync + 'static {
  async fn build(&self, node: &AssetBuildNode, cancel: CancellationToken)
  -> Result<(), BuildError>;
}

/// Builder for assets the synthesizer already rendered to disk: verifies
/// the source exists under the assembly directory and leaves it as-is.
#[derive(Debug, Clone)]
pub struct FsAssetBuilder {
  assembly_dir: PathBuf,
}

impl FsAssetBuilder {
  pub fn new(assembly_dir: impl Into<PathBuf>) -> Self {
    Self {
      assembly_dir: assembly_dir.into(),
    }
  }
}

#[async_trait]
impl AssetBuilder for FsAssetBuilder {
  async fn build(
    &self,
    node: &AssetBuildNode,
    _cancel: CancellationToken,
  ) -> Result<(), BuildError> {
    let path = self.assembly_dir.join(&node.source);
    let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);
    if !exists {
      return Err(BuildError::SourceMissing {
        asset_id: node.asset_id.clone(),
        path,
      });
    }
    debug!(asset_id = %node.asset_id, path = %path.display(), "asset source present");
    Ok(())
  }
}
