use serde::{Deserialize, Serialize};

/// Opaque error payload a node executor reports on failure. The engine
/// never inspects it; callers may downcast for structured detail.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a successfully completed node did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeOutcome {
  /// An artifact was built.
  Built,
  /// An artifact was published; `uploaded` is false when the destination
  /// already held this fingerprint and the upload was short-circuited.
  Published { uploaded: bool },
  /// A stack node reached a successful terminal outcome.
  Stack(StackOutcome),
}

/// Successful terminal outcome of one stack node. Failure-side outcomes
/// (failed, rolled back, skipped) travel as node failures and statuses,
/// not through this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StackOutcome {
  /// Remote state already matched; no change was submitted.
  NoOp,
  /// A change was applied, in full or via hotswap.
  Deployed {
    hotswapped: bool,
    /// A stuck update-rollback was resolved before the change.
    rolled_back_first: bool,
  },
  /// The stack was destroyed.
  Destroyed,
}
