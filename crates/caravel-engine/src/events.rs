//! Progress events and notifiers.
//!
//! Events are emitted as nodes move through the graph so consumers can
//! render progress, persist history, or stream to a UI. The engine calls
//! `notify` inline from the scheduling loop; implementations decide what
//! to do with each event.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::outcome::NodeOutcome;

/// Events emitted during graph execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// Execution of the graph has started.
  GraphStarted { run_id: String, node_count: usize },

  /// A node's dependencies are satisfied and it is waiting for a worker
  /// slot.
  NodeQueued { run_id: String, node_id: String },

  /// A node has started running.
  NodeStarted { run_id: String, node_id: String },

  /// A node finished successfully.
  NodeSucceeded {
    run_id: String,
    node_id: String,
    outcome: NodeOutcome,
  },

  /// A node ran and failed.
  NodeFailed {
    run_id: String,
    node_id: String,
    error: String,
  },

  /// A node will never run because something upstream of it failed.
  NodeSkipped { run_id: String, node_id: String },

  /// Every node has reached a terminal status.
  GraphCompleted { run_id: String, failed: usize },
}

/// Trait for receiving execution events.
pub trait ProgressNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
///
/// Useful for tests or when progress observation is not needed.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ProgressNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {
    // Intentionally empty
  }
}

/// A notifier that sends events to an unbounded channel.
///
/// Use this when the consumer renders asynchronously (a CLI progress view,
/// a daemon streaming to clients). The channel is unbounded so a slow
/// consumer cannot stall the scheduling loop; event volume is a handful
/// per node, so growth is bounded in practice.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ProgressNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}
