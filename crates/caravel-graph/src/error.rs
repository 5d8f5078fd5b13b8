use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GraphError {
  /// A stack declares a dependency that is neither selected nor known.
  #[error("stack '{stack_id}' depends on unknown stack '{dependency}'")]
  UnknownDependency { stack_id: String, dependency: String },

  /// Stack dependencies form a cycle; `cycle` lists the members in the
  /// order they reference one another.
  #[error("dependency cycle detected: {}", cycle.join(" -> "))]
  DependencyCycle { cycle: Vec<String> },
}
