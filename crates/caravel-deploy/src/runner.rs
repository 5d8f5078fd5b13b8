//! Node execution dispatch.
//!
//! One `NodeRunner` implementation serves the whole graph: builds go to
//! the asset builder, publishes to the remote service (with a fingerprint
//! short-circuit), and stack nodes to the deployment state machine.

use std::sync::Arc;

use async_trait::async_trait;
use caravel_engine::{BoxError, NodeOutcome, NodeRunner};
use caravel_graph::WorkNode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::builder::AssetBuilder;
use crate::cloud::CloudService;
use crate::state::{DeployOptions, StackDeployer};

pub struct DeploymentRunner<C: CloudService, B: AssetBuilder> {
  cloud: Arc<C>,
  builder: Arc<B>,
  deployer: StackDeployer<C>,
}

impl<C: CloudService, B: AssetBuilder> DeploymentRunner<C, B> {
  pub fn new(cloud: Arc<C>, builder: Arc<B>, options: DeployOptions) -> Self {
    let deployer = StackDeployer::new(cloud.clone(), options);
    Self {
      cloud,
      builder,
      deployer,
    }
  }
}

#[async_trait]
impl<C: CloudService, B: AssetBuilder> NodeRunner for DeploymentRunner<C, B> {
  async fn run(&self, node: &WorkNode, cancel: CancellationToken) -> Result<NodeOutcome, BoxError> {
    match node {
      WorkNode::AssetBuild(build) => {
        self.builder.build(build, cancel).await?;
        Ok(NodeOutcome::Built)
      }
      WorkNode::AssetPublish(publish) => {
        let exists = self
          .cloud
          .artifact_exists(&publish.destination, &publish.fingerprint)
          .await?;
        if exists {
          debug!(
            asset_id = %publish.asset_id,
            destination = %publish.destination.key(),
            "artifact already published; skipping upload"
          );
          return Ok(NodeOutcome::Published { uploaded: false });
        }
        self
          .cloud
          .upload_artifact(&publish.source, &publish.destination, &publish.fingerprint)
          .await?;
        info!(
          asset_id = %publish.asset_id,
          destination = %publish.destination.key(),
          "artifact published"
        );
        Ok(NodeOutcome::Published { uploaded: true })
      }
      WorkNode::Stack(stack) => {
        let outcome = self.deployer.run(stack).await?;
        Ok(NodeOutcome::Stack(outcome))
      }
    }
  }
}
