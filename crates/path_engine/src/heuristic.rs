//! Pivot-distance heuristic embedding.
//!
//! Precomputed per-node distances from a handful of pivot nodes. For any
//! two nodes `a`, `b` and pivot `p`, `|d(p,a) - d(p,b)|` is a lower bound
//! on the true cost between `a` and `b`, so searches can take the max of
//! this bound and the geometric heuristic to tighten their estimates.
//!
//! The table is graph-derived data and follows the same discipline as the
//! graphs themselves: it is recomputed only inside the blocked window, when
//! its dirty flag is set (after scans, flood fills and connectivity
//! updates), before the queue unblocks.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::graph::NavGraph;
use crate::node::{NodeIndex, NodeTable};

/// Marker for "pivot cannot reach this node".
const UNREACHED: u32 = u32::MAX;

/// Upper bound on elected pivots.
const MAX_PIVOTS: usize = 4;

/// Per-node pivot-distance table.
pub struct HeuristicEmbedding {
  enabled: bool,
  dirty: bool,
  pivots: Vec<NodeIndex>,
  /// Pivot-major distance table: `costs[pivot * range + node]`.
  costs: Vec<u32>,
  range: usize,
}

impl HeuristicEmbedding {
  /// Creates a disabled, empty embedding.
  pub fn new() -> Self {
    Self {
      enabled: false,
      dirty: false,
      pivots: Vec::new(),
      costs: Vec::new(),
      range: 0,
    }
  }

  /// Enables or disables the embedding. Enabling marks it dirty so the next
  /// blocked window computes it.
  pub fn set_enabled(&mut self, enabled: bool) {
    self.enabled = enabled;
    self.dirty = enabled;
    if !enabled {
      self.pivots.clear();
      self.costs.clear();
    }
  }

  /// Whether the embedding participates in heuristics at all.
  pub fn is_enabled(&self) -> bool {
    self.enabled
  }

  /// Flags the table stale; graph topology changed.
  pub fn mark_dirty(&mut self) {
    if self.enabled {
      self.dirty = true;
    }
  }

  /// True when a recompute is owed before the next unblock.
  pub fn is_dirty(&self) -> bool {
    self.enabled && self.dirty
  }

  /// Lower bound on the cost between `a` and `b`, in milli-units.
  ///
  /// Returns 0 when the embedding is disabled, stale, or either node lies
  /// outside the computed range, so callers can always take
  /// `max(geometric, embedding)` unconditionally.
  pub fn estimate(&self, a: NodeIndex, b: NodeIndex) -> u32 {
    if !self.enabled || self.dirty || a.as_usize() >= self.range || b.as_usize() >= self.range {
      return 0;
    }
    let mut bound = 0u32;
    for pivot in 0..self.pivots.len() {
      let base = pivot * self.range;
      let da = self.costs[base + a.as_usize()];
      let db = self.costs[base + b.as_usize()];
      if da == UNREACHED || db == UNREACHED {
        continue;
      }
      bound = bound.max(da.abs_diff(db));
    }
    bound
  }

  /// Recomputes the table: elects pivots (the first walkable node of each
  /// distinct area, capped) and runs a uniform-cost sweep from each.
  pub fn recalculate(&mut self, graphs: &[Box<dyn NavGraph>], nodes: &NodeTable) {
    self.range = nodes.index_range();
    self.pivots.clear();

    let mut seen_areas = Vec::new();
    for graph in graphs {
      graph.get_nodes(&mut |node| {
        if node.walkable && !seen_areas.contains(&node.area) {
          seen_areas.push(node.area);
          self.pivots.push(node.index);
        }
        self.pivots.len() < MAX_PIVOTS
      });
      if self.pivots.len() >= MAX_PIVOTS {
        break;
      }
    }

    self.costs.clear();
    self.costs.resize(self.pivots.len() * self.range, UNREACHED);

    let mut open: BinaryHeap<Reverse<(u32, NodeIndex)>> = BinaryHeap::new();
    let mut scratch = Vec::new();
    for (pivot_slot, &pivot) in self.pivots.iter().enumerate() {
      let base = pivot_slot * self.range;
      self.costs[base + pivot.as_usize()] = 0;
      open.clear();
      open.push(Reverse((0, pivot)));

      while let Some(Reverse((cost, index))) = open.pop() {
        if cost > self.costs[base + index.as_usize()] {
          continue;
        }
        let Some(node) = node_on_owner(graphs, nodes, index) else {
          continue;
        };
        scratch.clear();
        neighbours_on_owner(graphs, nodes, index, &mut scratch);
        for &next in &scratch {
          let Some(next_node) = node_on_owner(graphs, nodes, next) else {
            continue;
          };
          if !next_node.walkable {
            continue;
          }
          let edge = (node.position.distance(next_node.position) * 1000.0) as u32
            + next_node.penalty;
          let candidate = cost.saturating_add(edge);
          let slot = &mut self.costs[base + next.as_usize()];
          if candidate < *slot {
            *slot = candidate;
            open.push(Reverse((candidate, next)));
          }
        }
      }
    }

    self.dirty = false;
  }
}

impl Default for HeuristicEmbedding {
  fn default() -> Self {
    Self::new()
  }
}

fn node_on_owner(
  graphs: &[Box<dyn NavGraph>],
  nodes: &NodeTable,
  index: NodeIndex,
) -> Option<crate::graph::NodeView> {
  let owner = nodes.owner(index)?;
  graphs.get(owner as usize)?.node(index)
}

fn neighbours_on_owner(
  graphs: &[Box<dyn NavGraph>],
  nodes: &NodeTable,
  index: NodeIndex,
  out: &mut Vec<NodeIndex>,
) {
  if let Some(owner) = nodes.owner(index)
    && let Some(graph) = graphs.get(owner as usize)
  {
    graph.neighbours(index, out);
  }
}
