//! Concurrency-bounded topological execution.
//!
//! One scheduling loop owns the graph and its status table. Workers are
//! spawned tasks that report completion over an mpsc channel; readiness is
//! recomputed only on the loop, so "is this dependency satisfied" never
//! races "this dependency just succeeded".

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use caravel_graph::{NodeStatus, WorkGraph, WorkNode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ExecuteError;
use crate::events::{ExecutionEvent, NoopNotifier, ProgressNotifier};
use crate::outcome::{BoxError, NodeOutcome};

/// Executes one node to completion. Implementations hold whatever clients
/// they need (remote service, asset tooling); the engine only sees the
/// outcome or an opaque error.
#[async_trait]
pub trait NodeRunner: Send + Sync + 'static {
  async fn run(&self, node: &WorkNode, cancel: CancellationToken) -> Result<NodeOutcome, BoxError>;
}

/// Options for one execution.
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
  /// Graph-wide cap on simultaneously running nodes, across all node
  /// kinds. 1 means fully sequential.
  pub max_concurrency: usize,
}

impl Default for ExecutorOptions {
  fn default() -> Self {
    Self { max_concurrency: 1 }
  }
}

/// Terminal state of every node after a run.
#[derive(Debug)]
pub struct ExecutionReport {
  pub run_id: String,
  pub statuses: BTreeMap<String, NodeStatus>,
  /// Outcomes of succeeded nodes.
  pub outcomes: BTreeMap<String, NodeOutcome>,
  /// Error payloads of failed nodes.
  pub failures: BTreeMap<String, BoxError>,
}

impl ExecutionReport {
  /// The run succeeded iff no node ended failed. Skipped nodes do not
  /// fail the run on their own; they always accompany a failure.
  pub fn success(&self) -> bool {
    self.failures.is_empty()
  }
}

/// The work graph executor.
///
/// Generic over `N: ProgressNotifier` to allow different progress
/// strategies. Use `GraphExecutor::new()` for no-op progress, or
/// `GraphExecutor::with_notifier()` to observe events.
pub struct GraphExecutor<N: ProgressNotifier = NoopNotifier> {
  options: ExecutorOptions,
  notifier: N,
}

/// A worker's completion report, consumed by the scheduling loop.
struct Completion {
  node_id: String,
  result: Result<NodeOutcome, BoxError>,
}

impl GraphExecutor<NoopNotifier> {
  pub fn new(options: ExecutorOptions) -> Self {
    Self::with_notifier(options, NoopNotifier)
  }
}

impl<N: ProgressNotifier> GraphExecutor<N> {
  pub fn with_notifier(options: ExecutorOptions, notifier: N) -> Self {
    Self { options, notifier }
  }

  /// Drive every node of the graph to a terminal status.
  ///
  /// A node starts only after all its dependencies succeeded; a failure
  /// transitively skips its dependents but lets running siblings finish.
  /// Cancellation stops scheduling immediately and waits for in-flight
  /// nodes to reach a safe terminal state.
  pub async fn execute<R: NodeRunner>(
    &self,
    mut graph: WorkGraph,
    runner: Arc<R>,
    cancel: CancellationToken,
  ) -> Result<ExecutionReport, ExecuteError> {
    let limit = self.options.max_concurrency;
    if limit == 0 {
      return Err(ExecuteError::InvalidConcurrency(0));
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    self.notifier.notify(ExecutionEvent::GraphStarted {
      run_id: run_id.clone(),
      node_count: graph.len(),
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
    let mut running = 0usize;
    let mut outcomes: BTreeMap<String, NodeOutcome> = BTreeMap::new();
    let mut failures: BTreeMap<String, BoxError> = BTreeMap::new();

    loop {
      if !cancel.is_cancelled() {
        while running < limit {
          // Recompute after every start: a just-queued node drops out of
          // the ready set. Tie-break is builder insertion order.
          let ready = graph.ready();
          let Some(node_id) = ready.into_iter().next() else {
            break;
          };

          graph.set_status(&node_id, NodeStatus::Queued);
          self.notifier.notify(ExecutionEvent::NodeQueued {
            run_id: run_id.clone(),
            node_id: node_id.clone(),
          });

          // Ready ids come from the graph's own order list, so the node
          // is always present.
          let node = graph.node(&node_id).cloned().unwrap();
          graph.set_status(&node_id, NodeStatus::Running);
          self.notifier.notify(ExecutionEvent::NodeStarted {
            run_id: run_id.clone(),
            node_id: node_id.clone(),
          });
          debug!(node_id = %node_id, kind = node.kind(), "starting node");

          let tx = tx.clone();
          let runner = runner.clone();
          let cancel = cancel.clone();
          tokio::spawn(async move {
            let node_id = node.id();
            let worker = tokio::spawn(async move { runner.run(&node, cancel).await });
            // A panicked runner must still report, or the loop would wait
            // on the channel forever.
            let result = match worker.await {
              Ok(result) => result,
              Err(join_error) => Err(format!("node task panicked: {join_error}").into()),
            };
            // Ignore send errors - the loop only drops the receiver after
            // every worker has reported.
            let _ = tx.send(Completion { node_id, result });
          });
          running += 1;
        }
      }

      if running == 0 {
        break;
      }

      let Some(completion) = rx.recv().await else {
        break;
      };
      running -= 1;

      match completion.result {
        Ok(outcome) => {
          graph.set_status(&completion.node_id, NodeStatus::Succeeded);
          self.notifier.notify(ExecutionEvent::NodeSucceeded {
            run_id: run_id.clone(),
            node_id: completion.node_id.clone(),
            outcome: outcome.clone(),
          });
          outcomes.insert(completion.node_id, outcome);
        }
        Err(error) => {
          warn!(node_id = %completion.node_id, error = %error, "node failed");
          let skipped = graph.mark_failed(&completion.node_id);
          self.notifier.notify(ExecutionEvent::NodeFailed {
            run_id: run_id.clone(),
            node_id: completion.node_id.clone(),
            error: error.to_string(),
          });
          for node_id in skipped {
            self.notifier.notify(ExecutionEvent::NodeSkipped {
              run_id: run_id.clone(),
              node_id,
            });
          }
          failures.insert(completion.node_id, error);
        }
      }
    }

    let remaining = graph
      .node_ids()
      .iter()
      .filter(|id| !graph.status(id).is_terminal())
      .count();
    if remaining > 0 {
      if cancel.is_cancelled() {
        return Err(ExecuteError::Cancelled);
      }
      return Err(ExecuteError::Stalled { remaining });
    }

    self.notifier.notify(ExecutionEvent::GraphCompleted {
      run_id: run_id.clone(),
      failed: failures.len(),
    });

    let statuses = graph
      .node_ids()
      .iter()
      .map(|id| (id.clone(), graph.status(id)))
      .collect();

    Ok(ExecutionReport {
      run_id,
      statuses,
      outcomes,
      failures,
    })
  }
}
