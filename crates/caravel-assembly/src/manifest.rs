//! Thin reader for the on-disk cloud assembly.
//!
//! The assembly directory holds a `manifest.json` naming every stack, each
//! with a template file rendered next to it and the asset references the
//! template carries.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::AssemblyError;
use crate::types::StackArtifact;

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
  #[serde(default)]
  #[allow(dead_code)]
  version: Option<String>,
  stacks: Vec<ManifestStack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestStack {
  #[serde(flatten)]
  artifact: StackArtifact,
  /// Template body file, relative to the assembly directory. When absent
  /// the inline `template` value is used as-is.
  #[serde(default)]
  template_file: Option<PathBuf>,
}

/// A loaded cloud assembly: the stacks available for deployment.
#[derive(Debug, Clone)]
pub struct CloudAssembly {
  directory: PathBuf,
  stacks: Vec<StackArtifact>,
}

impl CloudAssembly {
  /// Load the assembly from a directory containing `manifest.json`.
  pub fn load(directory: impl AsRef<Path>) -> Result<Self, AssemblyError> {
    let directory = directory.as_ref().to_path_buf();
    let manifest_path = directory.join(MANIFEST_FILE);
    let content = std::fs::read_to_string(&manifest_path).map_err(|source| AssemblyError::Io {
      path: manifest_path.clone(),
      source,
    })?;
    let manifest: Manifest =
      serde_json::from_str(&content).map_err(|source| AssemblyError::Parse {
        path: manifest_path,
        source,
      })?;

    let mut seen = HashSet::new();
    let mut stacks = Vec::with_capacity(manifest.stacks.len());
    for entry in manifest.stacks {
      let mut artifact = entry.artifact;
      if !seen.insert(artifact.stack_id.clone()) {
        return Err(AssemblyError::DuplicateStack(artifact.stack_id));
      }
      if let Some(template_file) = entry.template_file {
        let template_path = directory.join(template_file);
        let body =
          std::fs::read_to_string(&template_path).map_err(|source| AssemblyError::Io {
            path: template_path.clone(),
            source,
          })?;
        artifact.template =
          serde_json::from_str(&body).map_err(|source| AssemblyError::Parse {
            path: template_path,
            source,
          })?;
      }
      stacks.push(artifact);
    }

    Ok(Self { directory, stacks })
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// All stacks in manifest order.
  pub fn stacks(&self) -> &[StackArtifact] {
    &self.stacks
  }

  pub fn stack(&self, stack_id: &str) -> Option<&StackArtifact> {
    self.stacks.iter().find(|s| s.stack_id == stack_id)
  }

  /// Select stacks by id, pulling in their transitive dependencies so the
  /// resulting set is closed under "depends on". An empty pattern list
  /// selects every stack. Manifest order is preserved.
  pub fn select(&self, ids: &[String]) -> Result<Vec<StackArtifact>, AssemblyError> {
    if ids.is_empty() {
      return Ok(self.stacks.clone());
    }

    let mut wanted: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    for id in ids {
      if self.stack(id).is_none() {
        return Err(AssemblyError::StackNotFound(id.clone()));
      }
      queue.push_back(id.clone());
    }
    while let Some(id) = queue.pop_front() {
      if !wanted.insert(id.clone()) {
        continue;
      }
      let stack = self
        .stack(&id)
        .ok_or_else(|| AssemblyError::StackNotFound(id.clone()))?;
      for dep in &stack.dependencies {
        queue.push_back(dep.clone());
      }
    }

    Ok(
      self
        .stacks
        .iter()
        .filter(|s| wanted.contains(&s.stack_id))
        .cloned()
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write_assembly(dir: &Path, manifest: serde_json::Value) {
    std::fs::write(
      dir.join(MANIFEST_FILE),
      serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();
  }

  fn env() -> serde_json::Value {
    serde_json::json!({ "account": "12345", "region": "us-east-1" })
  }

  #[test]
  fn loads_stacks_and_inline_templates() {
    let dir = tempfile::tempdir().unwrap();
    write_assembly(
      dir.path(),
      serde_json::json!({
        "version": "1.0",
        "stacks": [
          {
            "stackId": "db",
            "environment": env(),
            "template": { "Resources": {} }
          },
          {
            "stackId": "api",
            "environment": env(),
            "template": { "Resources": {} },
            "dependencies": ["db"]
          }
        ]
      }),
    );

    let assembly = CloudAssembly::load(dir.path()).unwrap();
    assert_eq!(assembly.directory(), dir.path());
    assert_eq!(assembly.stacks().len(), 2);
    assert_eq!(assembly.stack("api").unwrap().dependencies, vec!["db"]);
  }

  #[test]
  fn loads_template_from_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join("db.template.json"),
      r#"{ "Resources": { "Table": { "Type": "AWS::DynamoDB::Table" } } }"#,
    )
    .unwrap();
    write_assembly(
      dir.path(),
      serde_json::json!({
        "stacks": [
          { "stackId": "db", "environment": env(), "templateFile": "db.template.json" }
        ]
      }),
    );

    let assembly = CloudAssembly::load(dir.path()).unwrap();
    let template = &assembly.stack("db").unwrap().template;
    assert!(template["Resources"]["Table"].is_object());
  }

  #[test]
  fn rejects_duplicate_stack_ids() {
    let dir = tempfile::tempdir().unwrap();
    write_assembly(
      dir.path(),
      serde_json::json!({
        "stacks": [
          { "stackId": "db", "environment": env(), "template": {} },
          { "stackId": "db", "environment": env(), "template": {} }
        ]
      }),
    );

    let err = CloudAssembly::load(dir.path()).unwrap_err();
    assert!(matches!(err, AssemblyError::DuplicateStack(id) if id == "db"));
  }

  #[test]
  fn selection_pulls_in_transitive_dependencies() {
    let dir = tempfile::tempdir().unwrap();
    write_assembly(
      dir.path(),
      serde_json::json!({
        "stacks": [
          { "stackId": "net", "environment": env(), "template": {} },
          { "stackId": "db", "environment": env(), "template": {}, "dependencies": ["net"] },
          { "stackId": "api", "environment": env(), "template": {}, "dependencies": ["db"] },
          { "stackId": "unrelated", "environment": env(), "template": {} }
        ]
      }),
    );

    let assembly = CloudAssembly::load(dir.path()).unwrap();
    let selected = assembly.select(&["api".to_string()]).unwrap();
    let ids: Vec<&str> = selected.iter().map(|s| s.stack_id.as_str()).collect();
    assert_eq!(ids, vec!["net", "db", "api"]);
  }

  #[test]
  fn selecting_unknown_stack_fails() {
    let dir = tempfile::tempdir().unwrap();
    write_assembly(dir.path(), serde_json::json!({ "stacks": [] }));

    let assembly = CloudAssembly::load(dir.path()).unwrap();
    let err = assembly.select(&["nope".to_string()]).unwrap_err();
    assert!(matches!(err, AssemblyError::StackNotFound(id) if id == "nope"));
  }
}
