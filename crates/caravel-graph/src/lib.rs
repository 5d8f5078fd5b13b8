//! Caravel Work Graph
//!
//! The in-memory dependency graph a deployment or destroy run executes
//! over: asset build nodes, asset publish nodes, and stack nodes, with
//! forward ("depends on") and reverse ("blocks") adjacency.
//!
//! The graph is built once per invocation from the selected stacks and
//! discarded when the run completes; nothing here is persisted. This crate
//! performs no I/O, so the builder can also serve callers that only need
//! an ordering (e.g. refactor tooling computing a destroy-then-recreate
//! sequence) without pulling in the executor.

mod builder;
mod error;
mod graph;
mod node;

pub use builder::{build_deploy_graph, build_destroy_graph};
pub use error::GraphError;
pub use graph::{NodeStatus, WorkGraph};
pub use node::{
  AssetBuildNode, AssetPublishNode, StackAction, StackNode, WorkNode, build_node_id,
  publish_node_id, stack_node_id,
};
