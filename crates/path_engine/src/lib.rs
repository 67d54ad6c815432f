//! Concurrent graph pathfinding engine.
//!
//! A long-lived engine that accepts path requests from many producers, runs
//! them on a pool of worker threads (or one cooperative worker stepped by
//! the host), and interleaves searches with graph mutations that must
//! observe a consistent snapshot. The pieces:
//!
//! - [`queue::PathQueue`] — the control protocol deriving graph-mutation
//!   safety from "every receiver is parked";
//! - the search workers (internal) — the pop/prepare/step/complete machine,
//!   threaded or cooperative;
//! - [`return_stack::ReturnPipeline`] — lock-free completion hand-off with
//!   a per-tick callback budget;
//! - [`work_items::WorkItemRunner`] — deferred host-thread operations that
//!   run only inside the blocked window;
//! - the graph-update scheduler (internal) — batched, rate-limited graph
//!   updates with an async updater thread;
//! - [`flood::FloodFiller`] — connected-area labeling;
//! - [`engine::Engine`] — lifecycle and the per-tick pump.
//!
//! # Example
//!
//! ```
//! use glam::Vec3;
//! use path_engine::{AStarSearch, Engine, EngineConfig, GridCell, GridGraph, Path, ThreadCount};
//!
//! let mut engine = Engine::new(EngineConfig::default().with_threads(ThreadCount::Cooperative));
//! engine.add_graph(Box::new(GridGraph::from_fn(8, 8, 1.0, Vec3::ZERO, |_, _| {
//!   GridCell::walkable()
//! })));
//! engine.scan();
//!
//! let path = Path::new(AStarSearch::new(Vec3::ZERO, Vec3::new(7.0, 7.0, 0.0)));
//! engine.start_path(&path, false).unwrap();
//! engine.wait_for_path(&path).unwrap();
//! assert!(!path.is_errored());
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod flood;
pub mod graph;
pub mod handler;
pub mod heuristic;
pub mod hooks;
pub mod node;
pub mod path;
pub mod queue;
pub mod return_stack;
pub mod search;
pub mod work_items;

mod update;
mod worker;

#[cfg(test)]
mod test_util;

pub use config::{EngineConfig, ThreadCount};
pub use engine::Engine;
pub use error::{GraphUpdateError, PathError, StartPathError, Terminated, WaitError};
pub use flood::{FloodFiller, FloodStats};
pub use graph::grid::{GridCell, GridGraph, GridSampler};
pub use graph::{
  Bounds, GraphSet, GraphUpdate, NavGraph, NearestConstraint, NearestInfo, NearestParams,
  NodeView, ThreadingClass, ThreadingHint,
};
pub use handler::{PathHandler, PathNodeState};
pub use heuristic::HeuristicEmbedding;
pub use hooks::{HookList, HookRegistry, ScanProgress};
pub use node::{NodeIndex, NodeIndexAllocator, NodeTable};
pub use path::{Path, PathCallback, PathIdGenerator, PathSearch, PathState, SearchContext};
pub use queue::PathQueue;
pub use return_stack::{MIN_RETURNED_PER_DRAIN, RETURN_TIME_BUDGET, ReturnPipeline, ReturnStack};
pub use search::AStarSearch;
pub use work_items::{PendingFlags, WorkContext, WorkItem, WorkItemRunner};
