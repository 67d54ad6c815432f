//! The graph collaborator contract and the engine-owned graph set.
//!
//! Graph generators are external collaborators: the engine drives them
//! through the narrow [`NavGraph`] trait (scan, node iteration, nearest
//! queries, area updates) and never reaches into their storage. Node data
//! is addressed by dense [`NodeIndex`] handles; [`GraphSet`] dispatches an
//! index to its owning graph through the [`NodeTable`].
//!
//! Everything behind [`GraphSet`] is mutated only inside the blocked window
//! (see [`crate::queue`]); workers read it freely between windows.

pub mod grid;

use std::sync::atomic::{AtomicBool, Ordering};

use glam::Vec3;

use crate::error::GraphUpdateError;
use crate::heuristic::HeuristicEmbedding;
use crate::node::{NodeIndex, NodeTable};

/// A copied-out snapshot of one node's public attributes.
#[derive(Clone, Copy, Debug)]
pub struct NodeView {
  /// Dense handle for this node.
  pub index: NodeIndex,
  /// Index of the owning graph.
  pub graph: u8,
  /// Whether searches may traverse this node.
  pub walkable: bool,
  /// Connected-area id assigned by the flood filler. 0 means unwalkable or
  /// not yet filled.
  pub area: u32,
  /// Additional traversal cost in milli-units.
  pub penalty: u32,
  /// World-space position.
  pub position: Vec3,
}

/// Acceptance predicate for nearest-node queries, modeled as data.
///
/// The graph mask supports up to 32 graphs, far beyond the u8 graph-index
/// space the engine actually exercises.
#[derive(Clone, Copy, Debug)]
pub struct NearestConstraint {
  /// Reject unwalkable nodes.
  pub require_walkable: bool,
  /// Pin results to one connected area.
  pub area: Option<u32>,
  /// Bitmask of graph indices to consult.
  pub graph_mask: u32,
  /// When the cheap query's answer fails this constraint, re-query the same
  /// graph exhaustively instead of giving up.
  pub exhaustive_fallback: bool,
}

impl Default for NearestConstraint {
  fn default() -> Self {
    Self {
      require_walkable: true,
      area: None,
      graph_mask: u32::MAX,
      exhaustive_fallback: true,
    }
  }
}

impl NearestConstraint {
  /// A constraint accepting any node at all.
  pub fn none() -> Self {
    Self {
      require_walkable: false,
      ..Self::default()
    }
  }

  /// Pins results to the given connected area.
  pub fn in_area(mut self, area: u32) -> Self {
    self.area = Some(area);
    self
  }

  /// True if `node` satisfies this constraint.
  pub fn suitable(&self, node: &NodeView) -> bool {
    if self.require_walkable && !node.walkable {
      return false;
    }
    if let Some(area) = self.area
      && node.area != area
    {
      return false;
    }
    true
  }

  /// True if the constraint allows consulting graph `graph`.
  pub fn graph_allowed(&self, graph: u8) -> bool {
    (graph as u32) < 32 && self.graph_mask & (1 << graph as u32) != 0
  }
}

/// Engine-level nearest-query parameters, sourced from the configuration.
#[derive(Clone, Copy, Debug)]
pub struct NearestParams {
  /// Results farther than this from the query position are rejected.
  pub max_distance: f32,
  /// Stop scanning graphs once one answers within `prioritize_limit`.
  pub prioritize_graphs: bool,
  /// Distance threshold for `prioritize_graphs`.
  pub prioritize_limit: f32,
}

impl Default for NearestParams {
  fn default() -> Self {
    Self {
      max_distance: 100.0,
      prioritize_graphs: false,
      prioritize_limit: 1.0,
    }
  }
}

/// Result of a nearest-node query.
#[derive(Clone, Copy, Debug)]
pub struct NearestInfo {
  /// The found node.
  pub node: NodeView,
  /// Query position clamped onto the node's surface.
  pub clamped_position: Vec3,
}

/// Where the two halves of a graph update are allowed to run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadingClass {
  /// Entirely on the host thread, inside the blocked window.
  MainThread,
  /// `update_area_init` on the host thread, `update_area` on the async
  /// graph-update thread.
  MainInitAsyncApply,
  /// Entirely on the async graph-update thread.
  AsyncThread,
}

/// Caller-supplied threading preference carried by an update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ThreadingHint {
  /// Let the target graph classify the update.
  #[default]
  Auto,
  /// Force host-thread execution.
  MainThread,
  /// Force the split init/apply shape.
  MainInitAsyncApply,
  /// Force async execution.
  AsyncThread,
}

/// Axis-aligned world-space bounds targeted by a graph update.
#[derive(Clone, Copy, Debug)]
pub struct Bounds {
  /// Minimum corner.
  pub min: Vec3,
  /// Maximum corner.
  pub max: Vec3,
}

impl Bounds {
  /// Creates bounds from two corners, normalizing the min/max order.
  pub fn new(a: Vec3, b: Vec3) -> Self {
    Self {
      min: a.min(b),
      max: a.max(b),
    }
  }

  /// True if `point` lies inside (inclusive).
  pub fn contains(&self, point: Vec3) -> bool {
    point.cmpge(self.min).all() && point.cmple(self.max).all()
  }
}

/// A graph mutation request. Immutable once enqueued, except for the
/// init-stage marker maintained by the update machinery itself.
#[derive(Debug)]
pub struct GraphUpdate {
  /// Nodes whose position falls inside these bounds are affected.
  pub bounds: Bounds,
  /// Overrides walkability of affected nodes.
  pub set_walkable: Option<bool>,
  /// Added to (or, negative, subtracted from) affected nodes' penalty.
  pub penalty_delta: i32,
  /// Force a flood fill after this update even if the graph reports no
  /// connectivity change.
  pub requires_flood_fill: bool,
  /// Caller threading preference.
  pub threading_hint: ThreadingHint,
  init_done: AtomicBool,
}

impl GraphUpdate {
  /// Creates an update over `bounds` with no mutation payload.
  pub fn new(bounds: Bounds) -> Self {
    Self {
      bounds,
      set_walkable: None,
      penalty_delta: 0,
      requires_flood_fill: false,
      threading_hint: ThreadingHint::Auto,
      init_done: AtomicBool::new(false),
    }
  }

  /// Sets the walkability override.
  pub fn with_walkable(mut self, walkable: bool) -> Self {
    self.set_walkable = Some(walkable);
    // Walkability edits change connectivity by definition.
    self.requires_flood_fill = true;
    self
  }

  /// Sets the penalty delta.
  pub fn with_penalty_delta(mut self, delta: i32) -> Self {
    self.penalty_delta = delta;
    self
  }

  /// Sets the threading preference.
  pub fn with_threading(mut self, hint: ThreadingHint) -> Self {
    self.threading_hint = hint;
    self
  }

  /// Marks the host-thread init stage as completed.
  pub fn mark_init_done(&self) {
    self.init_done.store(true, Ordering::Release);
  }

  /// Whether the host-thread init stage ran.
  pub fn init_done(&self) -> bool {
    self.init_done.load(Ordering::Acquire)
  }
}

/// The contract between the engine and a graph generator.
///
/// `scan` and both `update_area` halves run only while the path queue is
/// blocked; every `&self` method may be called concurrently from workers
/// between blocked windows.
pub trait NavGraph: Send + Sync {
  /// Index of this graph within the engine's graph set.
  fn graph_index(&self) -> u8;

  /// Assigns the graph's index. Called when the graph is added and when
  /// indices are reassigned after a scan.
  fn set_graph_index(&mut self, index: u8);

  /// Rebuilds the graph from its source data, allocating nodes through
  /// `nodes`. May take long; reports progress in [0, 1].
  fn scan(&mut self, nodes: &mut NodeTable, progress: &mut dyn FnMut(f32));

  /// Destroys every node, returning the indices to the allocator.
  fn destroy_nodes(&mut self, nodes: &mut NodeTable);

  /// Number of live nodes.
  fn node_count(&self) -> usize;

  /// Visits every node. The visitor returns false to stop early.
  fn get_nodes(&self, visitor: &mut dyn FnMut(NodeView) -> bool);

  /// Snapshot of one node, or `None` if this graph does not own `index`.
  fn node(&self, index: NodeIndex) -> Option<NodeView>;

  /// Appends the walkable-agnostic neighbours of `index` to `out`.
  fn neighbours(&self, index: NodeIndex, out: &mut Vec<NodeIndex>);

  /// Writes a node's connected-area id.
  fn set_area(&mut self, index: NodeIndex, area: u32);

  /// Zeroes every node's area ahead of a flood fill.
  fn clear_areas(&mut self);

  /// Cheap nearest-node query. May return a node that fails `constraint`;
  /// callers fall back to [`NavGraph::nearest_force`].
  fn nearest(&self, position: Vec3, constraint: &NearestConstraint) -> Option<NearestInfo>;

  /// Exhaustive nearest-node query honoring `constraint` strictly.
  fn nearest_force(&self, position: Vec3, constraint: &NearestConstraint) -> Option<NearestInfo>;

  /// Classifies where `update` must run against this graph.
  fn threading_class(&self, update: &GraphUpdate) -> ThreadingClass;

  /// Host-thread half of a split update. Must be cheap.
  fn update_area_init(&mut self, update: &GraphUpdate);

  /// Applies `update`. Returns whether connectivity may have changed.
  fn update_area(
    &mut self,
    update: &GraphUpdate,
    nodes: &mut NodeTable,
  ) -> Result<bool, GraphUpdateError>;
}

/// The engine's graph collection plus the shared node table and the
/// heuristic embedding, all guarded by one quiescence-disciplined lock at
/// the engine level.
pub struct GraphSet {
  graphs: Vec<Box<dyn NavGraph>>,
  nodes: NodeTable,
  embedding: HeuristicEmbedding,
}

impl GraphSet {
  /// Creates an empty set.
  pub fn new() -> Self {
    Self {
      graphs: Vec::new(),
      nodes: NodeTable::new(),
      embedding: HeuristicEmbedding::new(),
    }
  }

  /// Adds a graph and assigns its index.
  pub fn add_graph(&mut self, mut graph: Box<dyn NavGraph>) -> u8 {
    let index = self.graphs.len() as u8;
    graph.set_graph_index(index);
    self.graphs.push(graph);
    index
  }

  /// Number of graphs.
  pub fn graph_count(&self) -> usize {
    self.graphs.len()
  }

  /// The graph at `index`.
  pub fn graph(&self, index: u8) -> Option<&dyn NavGraph> {
    self.graphs.get(index as usize).map(|g| g.as_ref())
  }

  /// Mutable access to the graph at `index`.
  pub fn graph_mut(&mut self, index: u8) -> Option<&mut dyn NavGraph> {
    match self.graphs.get_mut(index as usize) {
      Some(g) => Some(g.as_mut()),
      None => None,
    }
  }

  /// The shared node table.
  pub fn nodes(&self) -> &NodeTable {
    &self.nodes
  }

  /// The heuristic embedding.
  pub fn embedding(&self) -> &HeuristicEmbedding {
    &self.embedding
  }

  /// Mutable access to the heuristic embedding.
  pub fn embedding_mut(&mut self) -> &mut HeuristicEmbedding {
    &mut self.embedding
  }

  /// Scans one graph, routing progress to `progress`.
  pub fn scan_graph(&mut self, index: u8, progress: &mut dyn FnMut(f32)) {
    let Self { graphs, nodes, .. } = self;
    if let Some(graph) = graphs.get_mut(index as usize) {
      graph.scan(nodes, progress);
    }
  }

  /// Destroys every node of every graph, returning all indices.
  pub fn destroy_all_nodes(&mut self) {
    let Self { graphs, nodes, .. } = self;
    for graph in graphs.iter_mut() {
      graph.destroy_nodes(nodes);
    }
  }

  /// Reassigns graph indices to match vector order.
  pub fn reassign_graph_indices(&mut self) {
    for (index, graph) in self.graphs.iter_mut().enumerate() {
      graph.set_graph_index(index as u8);
    }
  }

  /// Applies one update to one graph.
  pub fn apply_update(
    &mut self,
    graph: u8,
    update: &GraphUpdate,
  ) -> Result<bool, GraphUpdateError> {
    let Self { graphs, nodes, .. } = self;
    let target = graphs
      .get_mut(graph as usize)
      .ok_or(GraphUpdateError::UnknownGraph(graph))?;
    target.update_area(update, nodes)
  }

  /// Runs the host-thread init half of a split update.
  pub fn apply_update_init(&mut self, graph: u8, update: &GraphUpdate) {
    if let Some(target) = self.graphs.get_mut(graph as usize) {
      target.update_area_init(update);
    }
  }

  /// Snapshot of the node owning `index`, dispatched via the owner table.
  pub fn node(&self, index: NodeIndex) -> Option<NodeView> {
    let owner = self.nodes.owner(index)?;
    self.graphs.get(owner as usize)?.node(index)
  }

  /// Appends the neighbours of `index` to `out`.
  pub fn neighbours(&self, index: NodeIndex, out: &mut Vec<NodeIndex>) {
    if let Some(owner) = self.nodes.owner(index)
      && let Some(graph) = self.graphs.get(owner as usize)
    {
      graph.neighbours(index, out);
    }
  }

  /// Nearest suitable node across all graphs.
  ///
  /// Graphs are consulted in index order and ties go to the earlier graph.
  /// With `params.prioritize_graphs`, scanning stops at the first graph
  /// whose answer lies within `params.prioritize_limit`. An answer failing
  /// the constraint triggers one exhaustive re-query against the same graph
  /// when the constraint allows it. Results beyond `params.max_distance`
  /// are rejected.
  pub fn nearest(
    &self,
    position: Vec3,
    constraint: &NearestConstraint,
    params: &NearestParams,
  ) -> Option<NearestInfo> {
    let mut best: Option<(NearestInfo, f32, u8)> = None;

    for (index, graph) in self.graphs.iter().enumerate() {
      let graph_index = index as u8;
      if !constraint.graph_allowed(graph_index) {
        continue;
      }
      let Some(info) = graph.nearest(position, constraint) else {
        continue;
      };
      let dist_sq = info.clamped_position.distance_squared(position);
      if best.as_ref().is_none_or(|(_, best_sq, _)| dist_sq < *best_sq) {
        best = Some((info, dist_sq, graph_index));
      }
      if params.prioritize_graphs && dist_sq <= params.prioritize_limit * params.prioritize_limit {
        break;
      }
    }

    let (mut info, mut dist_sq, graph_index) = best?;

    if !constraint.suitable(&info.node) {
      if !constraint.exhaustive_fallback {
        return None;
      }
      info = self.graphs[graph_index as usize].nearest_force(position, constraint)?;
      dist_sq = info.clamped_position.distance_squared(position);
    }

    if dist_sq > params.max_distance * params.max_distance {
      return None;
    }
    Some(info)
  }

  /// Total live nodes across all graphs.
  pub fn live_node_count(&self) -> usize {
    self.nodes.live_count()
  }

  /// Writes one node's area, dispatched via the owner table.
  pub fn write_area(&mut self, index: NodeIndex, area: u32) {
    let Self { graphs, nodes, .. } = self;
    if let Some(owner) = nodes.owner(index)
      && let Some(graph) = graphs.get_mut(owner as usize)
    {
      graph.set_area(index, area);
    }
  }

  /// Recomputes the heuristic embedding from current graph data.
  ///
  /// Runs inside the blocked window, before unblocking, whenever the
  /// embedding is dirty.
  pub fn recompute_embedding(&mut self) {
    let Self {
      graphs,
      nodes,
      embedding,
    } = self;
    embedding.recalculate(graphs, nodes);
  }
}

impl Default for GraphSet {
  fn default() -> Self {
    Self::new()
  }
}
