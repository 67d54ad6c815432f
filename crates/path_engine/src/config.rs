//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::graph::NearestParams;

/// How many search workers to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreadCount {
  /// Derive from the machine: one worker per logical core, minus one core
  /// reserved for the host thread, clamped to [1, 8].
  Auto,
  /// No threads; one cooperative worker stepped by the host tick.
  Cooperative,
  /// Exactly this many worker threads (0 behaves like `Cooperative`).
  Fixed(usize),
}

impl ThreadCount {
  /// Resolves to a concrete worker-thread count.
  pub fn resolve(self) -> usize {
    match self {
      ThreadCount::Auto => std::thread::available_parallelism()
        .map(|cores| cores.get().saturating_sub(1))
        .unwrap_or(1)
        .clamp(1, 8),
      ThreadCount::Cooperative => 0,
      ThreadCount::Fixed(count) => count,
    }
  }
}

/// Engine tuning knobs.
///
/// Plain data with builder-style setters:
///
/// ```
/// use path_engine::config::{EngineConfig, ThreadCount};
///
/// let config = EngineConfig::default()
///   .with_threads(ThreadCount::Fixed(2))
///   .with_slice_budget_ms(0.5);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
  /// Worker threading mode.
  pub thread_count: ThreadCount,
  /// Per-slice search budget in milliseconds. Workers re-read this between
  /// slices, so changes apply to searches already in flight.
  pub slice_budget_ms: f32,
  /// Rate-limit graph-update flushes.
  pub limit_graph_updates: bool,
  /// Minimum seconds between flushes when rate-limited.
  pub graph_update_interval: f32,
  /// Nearest-node results farther than this are rejected.
  pub max_nearest_node_distance: f32,
  /// Stop nearest-node scans at the first graph answering within
  /// `prioritize_graphs_limit`.
  pub prioritize_graphs: bool,
  /// Distance threshold for `prioritize_graphs`.
  pub prioritize_graphs_limit: f32,
  /// Flood-fill components smaller than this may be collapsed when area
  /// ids run out.
  pub min_area_size: usize,
  /// Reserved upper bound of the area-id space.
  pub max_area_index: u32,
  /// Maintain the pivot-distance heuristic embedding.
  pub heuristic_embedding: bool,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      thread_count: ThreadCount::Auto,
      slice_budget_ms: 1.0,
      limit_graph_updates: false,
      graph_update_interval: 0.2,
      max_nearest_node_distance: 100.0,
      prioritize_graphs: false,
      prioritize_graphs_limit: 1.0,
      min_area_size: 10,
      // Area ids are bit-packed into 17 bits of node state.
      max_area_index: (1 << 17) - 1,
      heuristic_embedding: false,
    }
  }
}

impl EngineConfig {
  /// Sets the threading mode.
  pub fn with_threads(mut self, thread_count: ThreadCount) -> Self {
    self.thread_count = thread_count;
    self
  }

  /// Sets the per-slice search budget.
  pub fn with_slice_budget_ms(mut self, milliseconds: f32) -> Self {
    self.slice_budget_ms = milliseconds;
    self
  }

  /// Enables rate-limited graph updates with the given interval.
  pub fn with_update_rate_limit(mut self, interval_seconds: f32) -> Self {
    self.limit_graph_updates = true;
    self.graph_update_interval = interval_seconds;
    self
  }

  /// Enables graph prioritization for nearest queries.
  pub fn with_graph_prioritization(mut self, limit: f32) -> Self {
    self.prioritize_graphs = true;
    self.prioritize_graphs_limit = limit;
    self
  }

  /// Sets the maximum accepted nearest-node distance.
  pub fn with_max_nearest_node_distance(mut self, distance: f32) -> Self {
    self.max_nearest_node_distance = distance;
    self
  }

  /// Enables the heuristic embedding.
  pub fn with_heuristic_embedding(mut self) -> Self {
    self.heuristic_embedding = true;
    self
  }

  /// The nearest-query parameters this configuration implies.
  pub fn nearest_params(&self) -> NearestParams {
    NearestParams {
      max_distance: self.max_nearest_node_distance,
      prioritize_graphs: self.prioritize_graphs,
      prioritize_limit: self.prioritize_graphs_limit,
    }
  }

  /// The slice budget in nanoseconds, floored at 10 microseconds.
  pub(crate) fn slice_budget_nanos(&self) -> u64 {
    ((self.slice_budget_ms.max(0.01)) * 1_000_000.0) as u64
  }
}
