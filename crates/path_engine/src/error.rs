//! Error types.
//!
//! Caller mistakes surface as `Err` from the engine API and never corrupt
//! engine state. Per-path search failures are recorded on the path itself
//! ([`PathError`]) and flow through the normal completion pipeline so the
//! requester's callback always fires.

use thiserror::Error;

/// The path queue has been terminated; no further pops or pushes succeed.
///
/// Workers treat this as the signal to exit their loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("path queue terminated")]
pub struct Terminated;

/// Errors from [`crate::engine::Engine::start_path`].
#[derive(Debug, Error)]
pub enum StartPathError {
  /// The path was already started (or otherwise left the Created state).
  #[error("path {id} is not in the Created state")]
  AlreadyStarted {
    /// The offending path's id (0 if none was assigned yet).
    id: u16,
  },
  /// No graphs exist, so no search could possibly succeed.
  #[error("no graphs have been added to the engine")]
  NoGraphs,
  /// The engine has been terminated and accepts no new paths.
  #[error("engine is shutting down and accepts no new paths")]
  NotAccepting,
}

/// Errors from [`crate::engine::Engine::wait_for_path`].
#[derive(Debug, Error)]
pub enum WaitError {
  /// The path was never handed to `start_path`.
  #[error("cannot wait for a path that has not been started")]
  NotStarted,
  /// The engine is being torn down.
  #[error("cannot wait for a path during engine teardown")]
  Destroyed,
}

/// Per-path search failure, recorded on the path.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum PathError {
  /// No node acceptable to the constraint near the start position.
  #[error("no suitable node near the start position")]
  NoStartNode,
  /// No node acceptable to the constraint near the end position.
  #[error("no suitable node near the end position")]
  NoEndNode,
  /// Start and end lie in different connected areas; no route can exist.
  #[error("start and end are in disconnected areas ({start_area} vs {end_area})")]
  AreaMismatch {
    /// Area of the resolved start node.
    start_area: u32,
    /// Area of the resolved end node.
    end_area: u32,
  },
  /// The open list drained without reaching the target.
  #[error("search space exhausted without reaching the target")]
  NoRoute,
  /// The engine terminated while the search was in flight.
  #[error("engine terminated during the search")]
  EngineTerminated,
  /// Failure reported by a custom search payload.
  #[error("{0}")]
  Other(String),
}

/// Failure applying a single graph update.
///
/// Logged and dropped by the scheduler; later updates still apply.
#[derive(Debug, Error)]
pub enum GraphUpdateError {
  /// The update named a graph index that does not exist.
  #[error("graph index {0} does not exist")]
  UnknownGraph(u8),
  /// The graph rejected the update.
  #[error("graph {graph} rejected update: {message}")]
  Rejected {
    /// Index of the rejecting graph.
    graph: u8,
    /// Graph-provided failure description.
    message: String,
  },
}
