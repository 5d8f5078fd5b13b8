//! Caravel Executor
//!
//! Drives every node of a `WorkGraph` to a terminal status: ready nodes
//! run concurrently up to a graph-wide limit, completions feed back over a
//! channel to a single scheduling loop that is the sole writer of node
//! status, and a failure skips everything downstream of it without
//! aborting siblings already in flight.
//!
//! The executor knows nothing about deployments; node semantics live
//! behind the `NodeRunner` trait.

mod error;
mod events;
mod executor;
mod outcome;

pub use error::ExecuteError;
pub use events::{ChannelNotifier, ExecutionEvent, NoopNotifier, ProgressNotifier};
pub use executor::{ExecutionReport, ExecutorOptions, GraphExecutor, NodeRunner};
pub use outcome::{BoxError, NodeOutcome, StackOutcome};
