//! Dependency graph construction.
//!
//! Turns the selected stacks and their asset references into a `WorkGraph`:
//! one build node per unique artifact, one publish node per
//! artifact+destination pair (shared across stacks), and one stack node per
//! stack, wired in dependency order. Destroy graphs carry stack nodes only,
//! with the stack-to-stack edges inverted.
//!
//! Construction is pure: no I/O, no remote calls. Cyclic or missing
//! dependencies fail here, before anything runs.

use std::collections::{HashMap, HashSet};

use caravel_assembly::StackArtifact;

use crate::error::GraphError;
use crate::graph::WorkGraph;
use crate::node::{
  AssetBuildNode, AssetPublishNode, StackAction, StackNode, WorkNode, stack_node_id,
};

/// Build the work graph for a deploy run over the selected stacks.
pub fn build_deploy_graph(stacks: &[StackArtifact]) -> Result<WorkGraph, GraphError> {
  validate_dependencies(stacks)?;
  detect_cycles(stacks)?;

  let mut graph = WorkGraph::new();

  for stack in stacks {
    let mut publish_ids = Vec::new();

    for asset in &stack.assets {
      let build_id = graph.insert(WorkNode::AssetBuild(AssetBuildNode {
        asset_id: asset.asset_id.clone(),
        kind: asset.kind,
        fingerprint: asset.fingerprint.clone(),
        source: asset.source.clone(),
      }));

      for destination in &asset.destinations {
        let publish_id = graph.insert(WorkNode::AssetPublish(AssetPublishNode {
          asset_id: asset.asset_id.clone(),
          kind: asset.kind,
          fingerprint: asset.fingerprint.clone(),
          source: asset.source.clone(),
          destination: destination.clone(),
        }));
        graph.add_dependency(&publish_id, &build_id);
        publish_ids.push(publish_id);
      }
    }

    let stack_id = graph.insert(WorkNode::Stack(stack_node(stack, StackAction::Deploy)));
    for publish_id in publish_ids {
      graph.add_dependency(&stack_id, &publish_id);
    }
    for dep in &stack.dependencies {
      graph.add_dependency(&stack_id, &stack_node_id(dep));
    }
  }

  Ok(graph)
}

/// Build the work graph for a destroy run: stack nodes only (destroy never
/// builds or publishes), with dependency edges inverted so dependents are
/// destroyed before the stacks they depend on.
pub fn build_destroy_graph(stacks: &[StackArtifact]) -> Result<WorkGraph, GraphError> {
  validate_dependencies(stacks)?;
  detect_cycles(stacks)?;

  let mut graph = WorkGraph::new();

  for stack in stacks {
    graph.insert(WorkNode::Stack(stack_node(stack, StackAction::Destroy)));
  }
  for stack in stacks {
    let node_id = stack_node_id(&stack.stack_id);
    for dep in &stack.dependencies {
      // Inverted: the dependency waits for its dependent.
      graph.add_dependency(&stack_node_id(dep), &node_id);
    }
  }

  Ok(graph)
}

fn stack_node(stack: &StackArtifact, action: StackAction) -> StackNode {
  StackNode {
    stack_id: stack.stack_id.clone(),
    action,
    environment: stack.environment.clone(),
    template: stack.template.clone(),
    parameters: stack.parameters.clone(),
    tags: stack.tags.clone(),
    dependencies: stack.dependencies.clone(),
    asset_ids: stack.asset_ids(),
  }
}

/// Every declared dependency must name a selected stack. Self-dependency
/// is a one-element cycle and is reported as such.
fn validate_dependencies(stacks: &[StackArtifact]) -> Result<(), GraphError> {
  let known: HashSet<&str> = stacks.iter().map(|s| s.stack_id.as_str()).collect();
  for stack in stacks {
    if stack.dependencies.iter().any(|d| d == &stack.stack_id) {
      return Err(GraphError::DependencyCycle {
        cycle: vec![stack.stack_id.clone()],
      });
    }
    for dep in &stack.dependencies {
      if !known.contains(dep.as_str()) {
        return Err(GraphError::UnknownDependency {
          stack_id: stack.stack_id.clone(),
          dependency: dep.clone(),
        });
      }
    }
  }
  Ok(())
}

/// Depth-first cycle check over the stack-dependency sub-graph, tracking
/// the active path so the error can name the cycle members in order.
fn detect_cycles(stacks: &[StackArtifact]) -> Result<(), GraphError> {
  let deps: HashMap<&str, &[String]> = stacks
    .iter()
    .map(|s| (s.stack_id.as_str(), s.dependencies.as_slice()))
    .collect();

  let mut finished: HashSet<&str> = HashSet::new();
  let mut path: Vec<&str> = Vec::new();
  let mut on_path: HashSet<&str> = HashSet::new();

  for stack in stacks {
    visit(
      stack.stack_id.as_str(),
      &deps,
      &mut finished,
      &mut path,
      &mut on_path,
    )?;
  }
  Ok(())
}

fn visit<'a>(
  id: &'a str,
  deps: &HashMap<&'a str, &'a [String]>,
  finished: &mut HashSet<&'a str>,
  path: &mut Vec<&'a str>,
  on_path: &mut HashSet<&'a str>,
) -> Result<(), GraphError> {
  if finished.contains(id) {
    return Ok(());
  }
  if on_path.contains(id) {
    let start = path.iter().position(|p| *p == id).unwrap_or(0);
    return Err(GraphError::DependencyCycle {
      cycle: path[start..].iter().map(|s| s.to_string()).collect(),
    });
  }

  path.push(id);
  on_path.insert(id);
  if let Some(dependencies) = deps.get(id) {
    for dep in dependencies.iter() {
      visit(dep.as_str(), deps, finished, path, on_path)?;
    }
  }
  path.pop();
  on_path.remove(id);
  finished.insert(id);
  Ok(())
}
