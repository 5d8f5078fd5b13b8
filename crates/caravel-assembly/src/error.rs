use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AssemblyError {
  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("duplicate stack id in manifest: {0}")]
  DuplicateStack(String),

  #[error("stack not found in assembly: {0}")]
  StackNotFound(String),
}
