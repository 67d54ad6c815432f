//! Point-to-point A* search payload.
//!
//! The engine core never depends on this type — it drives any
//! [`PathSearch`] — but tests, benches and examples need a real search, and
//! library users get a ready-made one. Endpoints are resolved through the
//! engine's nearest-node query; start and end must share a connected area
//! or the search fails without expanding a single node.

use std::any::Any;

use glam::Vec3;
use web_time::Instant;

use crate::error::PathError;
use crate::graph::{NearestConstraint, NodeView};
use crate::node::NodeIndex;
use crate::path::{PathSearch, SearchContext};

/// Deadline polling stride, in expanded nodes.
const DEADLINE_CHECK_STRIDE: u32 = 64;

/// Converts a world-space distance to cost milli-units.
#[inline]
fn distance_cost(a: Vec3, b: Vec3) -> u32 {
  (a.distance(b) * 1000.0) as u32
}

/// A* search between two world positions.
pub struct AStarSearch {
  start: Vec3,
  end: Vec3,
  constraint: NearestConstraint,
  heuristic_scale: f32,

  start_node: NodeIndex,
  end_node: NodeIndex,
  /// End position clamped onto the graph.
  target: Vec3,

  done: bool,
  found: bool,
  nodes_searched: u32,
  scratch: Vec<NodeIndex>,

  node_path: Vec<NodeIndex>,
  vector_path: Vec<Vec3>,
  total_cost: u32,
}

impl AStarSearch {
  /// Creates a search from `start` to `end`.
  pub fn new(start: Vec3, end: Vec3) -> Self {
    Self {
      start,
      end,
      constraint: NearestConstraint::default(),
      heuristic_scale: 1.0,
      start_node: NodeIndex::NONE,
      end_node: NodeIndex::NONE,
      target: end,
      done: false,
      found: false,
      nodes_searched: 0,
      scratch: Vec::new(),
      node_path: Vec::new(),
      vector_path: Vec::new(),
      total_cost: 0,
    }
  }

  /// Restricts endpoint resolution.
  pub fn with_constraint(mut self, constraint: NearestConstraint) -> Self {
    self.constraint = constraint;
    self
  }

  /// Scales the geometric heuristic. Values above 1 trade optimality for
  /// speed.
  pub fn with_heuristic_scale(mut self, scale: f32) -> Self {
    self.heuristic_scale = scale;
    self
  }

  /// The found path as node handles, start to end.
  pub fn node_path(&self) -> &[NodeIndex] {
    &self.node_path
  }

  /// The found path as world positions, start to end.
  pub fn vector_path(&self) -> &[Vec3] {
    &self.vector_path
  }

  /// Total traversal cost of the found path, in milli-units.
  pub fn total_cost(&self) -> u32 {
    self.total_cost
  }

  /// Number of nodes expanded.
  pub fn nodes_searched(&self) -> u32 {
    self.nodes_searched
  }

  /// True if a route was found.
  pub fn found(&self) -> bool {
    self.found
  }

  fn heuristic(&self, ctx: &SearchContext<'_>, node: &NodeView) -> u32 {
    let geometric = (distance_cost(node.position, self.target) as f32 * self.heuristic_scale) as u32;
    let embedded = ctx.graphs.embedding().estimate(node.index, self.end_node);
    geometric.max(embedded)
  }

  fn trace(&mut self, ctx: &SearchContext<'_>) {
    self.node_path.clear();
    self.vector_path.clear();

    let mut current = self.end_node;
    // The parent chain cannot be longer than the index range.
    let mut remaining = ctx.handler.index_range();
    while !current.is_none() && remaining > 0 {
      self.node_path.push(current);
      if current == self.start_node {
        break;
      }
      current = ctx.handler.node(current).parent;
      remaining -= 1;
    }
    self.node_path.reverse();

    for &index in &self.node_path {
      if let Some(view) = ctx.graphs.node(index) {
        self.vector_path.push(view.position);
      }
    }
    self.total_cost = ctx.handler.node(self.end_node).g;
  }
}

impl PathSearch for AStarSearch {
  fn prepare(&mut self, ctx: &mut SearchContext<'_>) -> Result<(), PathError> {
    let start = ctx
      .graphs
      .nearest(self.start, &self.constraint, &ctx.nearest)
      .ok_or(PathError::NoStartNode)?;
    let end = ctx
      .graphs
      .nearest(self.end, &self.constraint, &ctx.nearest)
      .ok_or(PathError::NoEndNode)?;

    if start.node.area != end.node.area {
      return Err(PathError::AreaMismatch {
        start_area: start.node.area,
        end_area: end.node.area,
      });
    }

    self.start_node = start.node.index;
    self.end_node = end.node.index;
    self.target = end.clamped_position;

    if self.start_node == self.end_node {
      // Degenerate request; complete without touching the open list.
      self.node_path.push(self.start_node);
      self.vector_path.push(start.clamped_position);
      self.total_cost = 0;
      self.found = true;
      self.done = true;
    }
    Ok(())
  }

  fn initialize(&mut self, ctx: &mut SearchContext<'_>) -> Result<(), PathError> {
    let start = ctx
      .graphs
      .node(self.start_node)
      .ok_or(PathError::NoStartNode)?;
    let h = self.heuristic(ctx, &start);

    let state = ctx.handler.node_mut(self.start_node);
    state.g = 0;
    state.h = h;
    state.parent = NodeIndex::NONE;
    state.path_id = ctx.path_id;

    ctx.handler.clear_open();
    ctx.handler.push_open(h, self.start_node);
    Ok(())
  }

  fn step(&mut self, ctx: &mut SearchContext<'_>, deadline: Instant) -> Result<(), PathError> {
    let mut since_deadline_check = 0u32;

    loop {
      let Some((f, current)) = ctx.handler.pop_open() else {
        self.done = true;
        return Err(PathError::NoRoute);
      };

      let state = *ctx.handler.node(current);
      if state.path_id != ctx.path_id || f > state.f() {
        // Stale entry superseded by a cheaper push.
        continue;
      }

      if current == self.end_node {
        self.trace(ctx);
        self.found = true;
        self.done = true;
        return Ok(());
      }

      self.nodes_searched += 1;

      self.scratch.clear();
      ctx.graphs.neighbours(current, &mut self.scratch);
      for i in 0..self.scratch.len() {
        let next = self.scratch[i];
        let Some(view) = ctx.graphs.node(next) else {
          continue;
        };
        if !view.walkable {
          continue;
        }

        let tentative = state
          .g
          .saturating_add(distance_cost(state_position(ctx, current), view.position))
          .saturating_add(view.penalty);

        let visited = ctx.handler.is_visited(next, ctx.path_id);
        if !visited || tentative < ctx.handler.node(next).g {
          let h = self.heuristic(ctx, &view);
          let next_state = ctx.handler.node_mut(next);
          next_state.g = tentative;
          next_state.h = h;
          next_state.parent = current;
          next_state.path_id = ctx.path_id;
          ctx.handler.push_open(tentative.saturating_add(h), next);
        }
      }

      since_deadline_check += 1;
      if since_deadline_check >= DEADLINE_CHECK_STRIDE {
        since_deadline_check = 0;
        if Instant::now() >= deadline {
          return Ok(());
        }
      }
    }
  }

  fn is_done(&self) -> bool {
    self.done
  }

  fn cleanup(&mut self) {
    self.scratch = Vec::new();
  }

  fn as_any(&self) -> &dyn Any {
    self
  }
}

/// Position of a node already known to be live.
fn state_position(ctx: &SearchContext<'_>, index: NodeIndex) -> Vec3 {
  ctx
    .graphs
    .node(index)
    .map(|view| view.position)
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use super::*;
  use crate::flood::FloodFiller;
  use crate::graph::GraphSet;
  use crate::graph::grid::{GridCell, GridGraph};
  use crate::graph::NearestParams;
  use crate::handler::PathHandler;

  fn flooded_set(graph: GridGraph) -> GraphSet {
    let mut set = GraphSet::new();
    set.add_graph(Box::new(graph));
    set.scan_graph(0, &mut |_| {});
    FloodFiller::new(u32::MAX - 1, 1).flood(&mut set);
    set
  }

  fn run(search: &mut AStarSearch, set: &GraphSet) -> Result<(), PathError> {
    let mut handler = PathHandler::new(0, set.nodes().index_range());
    let mut ctx = SearchContext {
      graphs: set,
      handler: &mut handler,
      path_id: 1,
      nearest: NearestParams::default(),
    };
    search.prepare(&mut ctx)?;
    if !search.is_done() {
      search.initialize(&mut ctx)?;
    }
    while !search.is_done() {
      search.step(&mut ctx, Instant::now() + Duration::from_millis(20))?;
    }
    Ok(())
  }

  #[test]
  fn straight_line_on_an_open_grid() {
    let set = flooded_set(GridGraph::from_fn(5, 5, 1.0, Vec3::ZERO, |_, _| {
      GridCell::walkable()
    }));
    let mut search = AStarSearch::new(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0));
    run(&mut search, &set).unwrap();

    assert!(search.found());
    assert_eq!(search.node_path().len(), 5);
    assert_eq!(search.total_cost(), 4000, "four unit edges at 1000 milli-units");
    assert_eq!(search.vector_path().first(), Some(&Vec3::ZERO));
    assert_eq!(search.vector_path().last(), Some(&Vec3::new(4.0, 0.0, 0.0)));
  }

  #[test]
  fn routes_around_a_wall() {
    // Wall on column 2 with a gap at the top row.
    let set = flooded_set(GridGraph::from_fn(5, 5, 1.0, Vec3::ZERO, |x, y| {
      if x == 2 && y < 4 {
        GridCell::blocked()
      } else {
        GridCell::walkable()
      }
    }));
    let mut search = AStarSearch::new(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0));
    run(&mut search, &set).unwrap();

    assert!(search.found());
    // Detour through (2, 4): up four, across, down four.
    assert_eq!(search.total_cost(), 12_000);
  }

  #[test]
  fn penalties_steer_the_route() {
    // Two corridors; the short one carries a prohibitive penalty.
    let set = flooded_set(GridGraph::from_fn(5, 3, 1.0, Vec3::ZERO, |x, y| {
      match y {
        0 => GridCell::walkable(),
        1 => {
          if x == 0 || x == 4 {
            GridCell::walkable()
          } else {
            GridCell::blocked()
          }
        }
        _ => GridCell::with_penalty(10_000),
      }
    }));
    let mut search = AStarSearch::new(Vec3::new(0.0, 1.0, 0.0), Vec3::new(4.0, 1.0, 0.0));
    run(&mut search, &set).unwrap();

    assert!(search.found());
    let through_penalty_row = search
      .vector_path()
      .iter()
      .any(|position| position.y == 2.0);
    assert!(
      !through_penalty_row,
      "the penalty corridor must lose to the free one"
    );
  }

  #[test]
  fn disconnected_areas_fail_in_prepare() {
    let set = flooded_set(GridGraph::from_fn(5, 1, 1.0, Vec3::ZERO, |x, _| {
      if x == 2 { GridCell::blocked() } else { GridCell::walkable() }
    }));
    let mut search = AStarSearch::new(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0));
    let error = run(&mut search, &set).unwrap_err();
    assert!(matches!(error, PathError::AreaMismatch { .. }));
    assert_eq!(search.nodes_searched(), 0, "no expansion happened");
  }

  #[test]
  fn empty_graph_set_has_no_start_node() {
    let set = GraphSet::new();
    let mut search = AStarSearch::new(Vec3::ZERO, Vec3::ONE);
    assert!(matches!(run(&mut search, &set), Err(PathError::NoStartNode)));
  }

  #[test]
  fn same_cell_request_short_circuits() {
    let set = flooded_set(GridGraph::from_fn(3, 3, 1.0, Vec3::ZERO, |_, _| {
      GridCell::walkable()
    }));
    let mut search = AStarSearch::new(Vec3::ZERO, Vec3::new(0.2, 0.1, 0.0));
    run(&mut search, &set).unwrap();
    assert!(search.found());
    assert_eq!(search.node_path().len(), 1);
    assert_eq!(search.total_cost(), 0);
  }
}
