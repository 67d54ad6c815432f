//! Layered 2D grid graph.
//!
//! One node per cell, positions on the X/Y plane, 4- or 8-connectivity.
//! Cell data (walkability, penalty) comes from a [`GridSampler`], sampled
//! in parallel during scan; the node-allocation pass that follows is
//! sequential because it talks to the shared [`NodeTable`].

use std::collections::HashMap;
use std::sync::Arc;

use glam::Vec3;
use rayon::prelude::*;

use crate::error::GraphUpdateError;
use crate::graph::{
  GraphUpdate, NavGraph, NearestConstraint, NearestInfo, NodeView, ThreadingClass, ThreadingHint,
};
use crate::node::{NodeIndex, NodeTable};

/// Source data for one cell.
#[derive(Clone, Copy, Debug)]
pub struct GridCell {
  /// Whether searches may traverse the cell.
  pub walkable: bool,
  /// Additional traversal cost in milli-units.
  pub penalty: u32,
}

impl GridCell {
  /// A plain walkable cell.
  pub fn walkable() -> Self {
    Self {
      walkable: true,
      penalty: 0,
    }
  }

  /// An unwalkable cell.
  pub fn blocked() -> Self {
    Self {
      walkable: false,
      penalty: 0,
    }
  }

  /// A walkable cell with a traversal penalty.
  pub fn with_penalty(penalty: u32) -> Self {
    Self {
      walkable: true,
      penalty,
    }
  }
}

/// Supplies per-cell source data during scan.
pub trait GridSampler: Send + Sync {
  /// Samples the cell at `(x, y)`.
  fn sample(&self, x: u32, y: u32) -> GridCell;
}

impl<F> GridSampler for F
where
  F: Fn(u32, u32) -> GridCell + Send + Sync,
{
  fn sample(&self, x: u32, y: u32) -> GridCell {
    self(x, y)
  }
}

#[derive(Clone, Copy, Debug)]
struct GridNode {
  index: NodeIndex,
  walkable: bool,
  penalty: u32,
  area: u32,
}

/// A 2D grid graph.
pub struct GridGraph {
  graph_index: u8,
  width: u32,
  height: u32,
  /// World-space distance between neighbouring cell centers.
  node_size: f32,
  origin: Vec3,
  sampler: Arc<dyn GridSampler>,
  eight_connected: bool,
  /// Row-major cell storage; empty until the first scan.
  cells: Vec<GridNode>,
  /// Reverse map from node index to cell offset.
  active: HashMap<NodeIndex, usize>,
}

impl GridGraph {
  /// Creates an unscanned grid over `width * height` cells.
  pub fn new(
    width: u32,
    height: u32,
    node_size: f32,
    origin: Vec3,
    sampler: Arc<dyn GridSampler>,
  ) -> Self {
    Self {
      graph_index: 0,
      width,
      height,
      node_size,
      origin,
      sampler,
      eight_connected: false,
      cells: Vec::new(),
      active: HashMap::new(),
    }
  }

  /// Creates a grid sampled by a closure.
  pub fn from_fn(
    width: u32,
    height: u32,
    node_size: f32,
    origin: Vec3,
    sample: impl Fn(u32, u32) -> GridCell + Send + Sync + 'static,
  ) -> Self {
    Self::new(width, height, node_size, origin, Arc::new(sample))
  }

  /// Enables diagonal neighbours.
  pub fn with_eight_connectivity(mut self) -> Self {
    self.eight_connected = true;
    self
  }

  /// Grid width in cells.
  pub fn width(&self) -> u32 {
    self.width
  }

  /// Grid height in cells.
  pub fn height(&self) -> u32 {
    self.height
  }

  #[inline]
  fn cell_offset(&self, x: u32, y: u32) -> usize {
    (y * self.width + x) as usize
  }

  #[inline]
  fn cell_position(&self, x: u32, y: u32) -> Vec3 {
    self.origin + Vec3::new(x as f32 * self.node_size, y as f32 * self.node_size, 0.0)
  }

  /// Nearest in-bounds cell to a world position.
  fn cell_of_position(&self, position: Vec3) -> (u32, u32) {
    let local = (position - self.origin) / self.node_size;
    let x = (local.x.round() as i64).clamp(0, self.width as i64 - 1) as u32;
    let y = (local.y.round() as i64).clamp(0, self.height as i64 - 1) as u32;
    (x, y)
  }

  fn view(&self, x: u32, y: u32) -> NodeView {
    let node = &self.cells[self.cell_offset(x, y)];
    NodeView {
      index: node.index,
      graph: self.graph_index,
      walkable: node.walkable,
      area: node.area,
      penalty: node.penalty,
      position: self.cell_position(x, y),
    }
  }

  fn info(&self, x: u32, y: u32) -> NearestInfo {
    let node = self.view(x, y);
    NearestInfo {
      clamped_position: node.position,
      node,
    }
  }

  /// The node at cell `(x, y)`, once scanned.
  pub fn node_at_cell(&self, x: u32, y: u32) -> Option<NodeIndex> {
    if self.cells.is_empty() || x >= self.width || y >= self.height {
      return None;
    }
    Some(self.cells[self.cell_offset(x, y)].index)
  }
}

impl NavGraph for GridGraph {
  fn graph_index(&self) -> u8 {
    self.graph_index
  }

  fn set_graph_index(&mut self, index: u8) {
    self.graph_index = index;
  }

  fn scan(&mut self, nodes: &mut NodeTable, progress: &mut dyn FnMut(f32)) {
    if !self.cells.is_empty() {
      self.destroy_nodes(nodes);
    }

    // Sample every cell in parallel; rayon's collect keeps row-major order.
    let (width, sampler) = (self.width, self.sampler.clone());
    let sampled: Vec<GridCell> = (0..self.height)
      .into_par_iter()
      .flat_map_iter(|y| {
        let sampler = sampler.clone();
        (0..width).map(move |x| sampler.sample(x, y))
      })
      .collect();

    // Allocation is sequential: the node table is shared with every graph.
    self.cells.reserve(sampled.len());
    for (offset, cell) in sampled.into_iter().enumerate() {
      let index = nodes.allocate(self.graph_index);
      self.cells.push(GridNode {
        index,
        walkable: cell.walkable,
        penalty: cell.penalty,
        area: 0,
      });
      self.active.insert(index, offset);

      if offset % self.width as usize == 0 {
        progress(offset as f32 / (self.width * self.height) as f32);
      }
    }
    progress(1.0);
  }

  fn destroy_nodes(&mut self, nodes: &mut NodeTable) {
    for node in self.cells.drain(..) {
      nodes.destroy(node.index);
    }
    self.active.clear();
  }

  fn node_count(&self) -> usize {
    self.cells.len()
  }

  fn get_nodes(&self, visitor: &mut dyn FnMut(NodeView) -> bool) {
    if self.cells.is_empty() {
      return;
    }
    for y in 0..self.height {
      for x in 0..self.width {
        if !visitor(self.view(x, y)) {
          return;
        }
      }
    }
  }

  fn node(&self, index: NodeIndex) -> Option<NodeView> {
    let offset = *self.active.get(&index)?;
    let x = offset as u32 % self.width;
    let y = offset as u32 / self.width;
    Some(self.view(x, y))
  }

  fn neighbours(&self, index: NodeIndex, out: &mut Vec<NodeIndex>) {
    let Some(&offset) = self.active.get(&index) else {
      return;
    };
    let x = offset as u32 % self.width;
    let y = offset as u32 / self.width;

    const CARDINAL: [(i64, i64); 4] = [(1, 0), (-1, 0), (0, 1), (0, -1)];
    const DIAGONAL: [(i64, i64); 4] = [(1, 1), (1, -1), (-1, 1), (-1, -1)];

    let push = |dx: i64, dy: i64, out: &mut Vec<NodeIndex>| {
      let nx = x as i64 + dx;
      let ny = y as i64 + dy;
      if nx >= 0 && ny >= 0 && (nx as u32) < self.width && (ny as u32) < self.height {
        out.push(self.cells[self.cell_offset(nx as u32, ny as u32)].index);
      }
    };

    for (dx, dy) in CARDINAL {
      push(dx, dy, out);
    }
    if self.eight_connected {
      for (dx, dy) in DIAGONAL {
        push(dx, dy, out);
      }
    }
  }

  fn set_area(&mut self, index: NodeIndex, area: u32) {
    if let Some(&offset) = self.active.get(&index) {
      self.cells[offset].area = area;
    }
  }

  fn clear_areas(&mut self) {
    for node in self.cells.iter_mut() {
      node.area = 0;
    }
  }

  fn nearest(&self, position: Vec3, constraint: &NearestConstraint) -> Option<NearestInfo> {
    if self.cells.is_empty() {
      return None;
    }
    let (cx, cy) = self.cell_of_position(position);
    if constraint.suitable(&self.view(cx, cy)) {
      return Some(self.info(cx, cy));
    }

    // Check a small ring around the clamped cell before giving the caller
    // an unsuitable answer it will have to force-requery.
    for radius in 1..=2i64 {
      let mut best: Option<(f32, u32, u32)> = None;
      for dy in -radius..=radius {
        for dx in -radius..=radius {
          if dx.abs() != radius && dy.abs() != radius {
            continue;
          }
          let nx = cx as i64 + dx;
          let ny = cy as i64 + dy;
          if nx < 0 || ny < 0 || nx as u32 >= self.width || ny as u32 >= self.height {
            continue;
          }
          let (nx, ny) = (nx as u32, ny as u32);
          if !constraint.suitable(&self.view(nx, ny)) {
            continue;
          }
          let dist_sq = self.cell_position(nx, ny).distance_squared(position);
          if best.is_none_or(|(best_sq, _, _)| dist_sq < best_sq) {
            best = Some((dist_sq, nx, ny));
          }
        }
      }
      if let Some((_, nx, ny)) = best {
        return Some(self.info(nx, ny));
      }
    }

    Some(self.info(cx, cy))
  }

  fn nearest_force(&self, position: Vec3, constraint: &NearestConstraint) -> Option<NearestInfo> {
    if self.cells.is_empty() {
      return None;
    }
    let mut best: Option<(f32, u32, u32)> = None;
    for y in 0..self.height {
      for x in 0..self.width {
        if !constraint.suitable(&self.view(x, y)) {
          continue;
        }
        let dist_sq = self.cell_position(x, y).distance_squared(position);
        if best.is_none_or(|(best_sq, _, _)| dist_sq < best_sq) {
          best = Some((dist_sq, x, y));
        }
      }
    }
    best.map(|(_, x, y)| self.info(x, y))
  }

  fn threading_class(&self, update: &GraphUpdate) -> ThreadingClass {
    match update.threading_hint {
      // Grid updates are cheap cell edits; the host thread is the default.
      ThreadingHint::Auto | ThreadingHint::MainThread => ThreadingClass::MainThread,
      ThreadingHint::MainInitAsyncApply => ThreadingClass::MainInitAsyncApply,
      ThreadingHint::AsyncThread => ThreadingClass::AsyncThread,
    }
  }

  fn update_area_init(&mut self, update: &GraphUpdate) {
    update.mark_init_done();
  }

  fn update_area(
    &mut self,
    update: &GraphUpdate,
    _nodes: &mut NodeTable,
  ) -> Result<bool, GraphUpdateError> {
    if self.threading_class(update) == ThreadingClass::MainInitAsyncApply && !update.init_done() {
      return Err(GraphUpdateError::Rejected {
        graph: self.graph_index,
        message: "split update applied before its init stage".to_string(),
      });
    }

    let mut walkability_changed = false;
    for y in 0..self.height {
      for x in 0..self.width {
        if !update.bounds.contains(self.cell_position(x, y)) {
          continue;
        }
        let offset = self.cell_offset(x, y);
        let node = &mut self.cells[offset];
        if let Some(walkable) = update.set_walkable
          && node.walkable != walkable
        {
          node.walkable = walkable;
          walkability_changed = true;
        }
        if update.penalty_delta != 0 {
          node.penalty = node.penalty.saturating_add_signed(update.penalty_delta);
        }
      }
    }
    Ok(walkability_changed)
  }
}
