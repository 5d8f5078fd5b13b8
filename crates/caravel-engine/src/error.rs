use thiserror::Error;

/// Errors from the executor itself. Per-node failures are not errors at
/// this level; they surface in the `ExecutionReport`.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// Execution was cancelled; nodes already running were allowed to
  /// finish, nothing new was started.
  #[error("execution cancelled")]
  Cancelled,

  /// No node is ready and none is running, yet nodes remain non-terminal.
  /// Cannot happen for a graph the builder validated.
  #[error("execution stalled with {remaining} nodes not terminal")]
  Stalled { remaining: usize },

  /// Concurrency limit must be at least 1.
  #[error("invalid concurrency limit: {0}")]
  InvalidConcurrency(usize),
}
