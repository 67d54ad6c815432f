//! Connected-area assignment.
//!
//! Walks every walkable node with an explicit work stack (no recursion) and
//! labels connected components with area ids starting at 1. Unwalkable
//! nodes keep area 0. Area ids live in bit-packed node state, so the id
//! space is bounded by `max_area_index`; when it runs out, the most recent
//! component smaller than `min_area_size` is collapsed onto the reserved
//! `max_area_index` label and its id is reissued.
//!
//! Runs only inside the blocked window.

use crate::graph::GraphSet;
use crate::node::NodeIndex;

/// Outcome of one flood fill.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FloodStats {
  /// Number of distinct non-collapsed area ids in use.
  pub area_count: u32,
  /// Small components collapsed onto the reserved max label.
  pub collapsed: usize,
  /// True when even collapsing could not save an id and two large
  /// components now share one.
  pub id_space_exhausted: bool,
}

/// Assigns connected-area ids to walkable nodes.
pub struct FloodFiller {
  max_area_index: u32,
  min_area_size: usize,
  /// Reusable work stack.
  stack: Vec<NodeIndex>,
  /// Reusable neighbour buffer.
  scratch: Vec<NodeIndex>,
}

impl FloodFiller {
  /// Creates a filler with the given id-space bound and small-component
  /// threshold.
  pub fn new(max_area_index: u32, min_area_size: usize) -> Self {
    Self {
      max_area_index,
      min_area_size,
      stack: Vec::new(),
      scratch: Vec::new(),
    }
  }

  /// Labels every node of every graph.
  ///
  /// Deterministic: graphs are visited in index order, nodes in each
  /// graph's own iteration order, so repeated runs over unchanged graphs
  /// produce identical assignments.
  pub fn flood(&mut self, set: &mut GraphSet) -> FloodStats {
    let range = set.nodes().index_range();
    let mut areas = vec![0u32; range];
    // Most recent small components, as (id, member nodes).
    let mut small_components: Vec<(u32, Vec<NodeIndex>)> = Vec::new();
    let mut area_counter: u32 = 0;
    let mut stats = FloodStats::default();

    // Phase 1: label into the dense scratch using immutable graph access.
    let mut seeds = Vec::new();
    for graph_index in 0..set.graph_count() as u8 {
      let graph = set.graph(graph_index).expect("graph index in range");
      graph.get_nodes(&mut |node| {
        if node.walkable {
          seeds.push(node.index);
        }
        true
      });
    }

    for seed in seeds {
      if areas[seed.as_usize()] != 0 {
        continue;
      }

      area_counter += 1;
      let mut id = area_counter;
      // Ordinary ids stop at max_area_index - 1; the max itself is the
      // reserved label collapsed small components are parked on.
      if id >= self.max_area_index {
        if let Some((reissued, members)) = small_components.pop() {
          // Collapse the small component onto the reserved label and hand
          // its id to the current component.
          for member in members {
            areas[member.as_usize()] = self.max_area_index;
          }
          stats.collapsed += 1;
          id = reissued;
          area_counter -= 1;
        } else {
          log::error!(
            "flood fill ran out of area ids (max {}); two components now share id {}",
            self.max_area_index,
            self.max_area_index
          );
          stats.id_space_exhausted = true;
          area_counter -= 1;
          id = area_counter;
        }
      }

      let mut members = vec![seed];
      areas[seed.as_usize()] = id;
      self.stack.clear();
      self.stack.push(seed);

      while let Some(current) = self.stack.pop() {
        self.scratch.clear();
        set.neighbours(current, &mut self.scratch);
        for &next in &self.scratch {
          if areas[next.as_usize()] != 0 {
            continue;
          }
          let Some(view) = set.node(next) else {
            continue;
          };
          if !view.walkable {
            continue;
          }
          areas[next.as_usize()] = id;
          self.stack.push(next);
          members.push(next);
        }
      }

      if members.len() < self.min_area_size {
        small_components.push((id, members));
      }
    }

    // Phase 2: write the labels back through the owner table.
    for graph_index in 0..set.graph_count() as u8 {
      if let Some(graph) = set.graph_mut(graph_index) {
        graph.clear_areas();
      }
    }
    for offset in 1..range {
      if areas[offset] != 0 {
        set.write_area(NodeIndex(offset as i32), areas[offset]);
      }
    }

    set.embedding_mut().mark_dirty();
    stats.area_count = area_counter;
    stats
  }
}

#[cfg(test)]
mod tests {
  use glam::Vec3;

  use super::*;
  use crate::graph::GraphSet;
  use crate::graph::grid::{GridCell, GridGraph};

  /// One row of cells; `blocked` marks separator columns.
  fn strip(blocked: &'static [u32]) -> GraphSet {
    let mut set = GraphSet::new();
    set.add_graph(Box::new(GridGraph::from_fn(
      11,
      1,
      1.0,
      Vec3::ZERO,
      move |x, _| {
        if blocked.contains(&x) {
          GridCell::blocked()
        } else {
          GridCell::walkable()
        }
      },
    )));
    set.scan_graph(0, &mut |_| {});
    set
  }

  fn collect_areas(set: &GraphSet) -> Vec<(bool, u32)> {
    let mut out = Vec::new();
    set
      .graph(0)
      .unwrap()
      .get_nodes(&mut |node| {
        out.push((node.walkable, node.area));
        true
      });
    out
  }

  #[test]
  fn walkable_nodes_get_positive_areas() {
    let mut set = strip(&[4, 6]);
    let stats = FloodFiller::new(u32::MAX - 1, 1).flood(&mut set);
    assert_eq!(stats.area_count, 3);
    assert_eq!(stats.collapsed, 0);

    for (walkable, area) in collect_areas(&set) {
      if walkable {
        assert!(area > 0, "every walkable node carries an area");
      } else {
        assert_eq!(area, 0, "unwalkable nodes stay at area 0");
      }
    }
  }

  #[test]
  fn connectivity_matches_area_equality() {
    let mut set = strip(&[4, 6]);
    FloodFiller::new(u32::MAX - 1, 1).flood(&mut set);
    let areas = collect_areas(&set);

    // Cells 0..=3 are one component, 5 its own, 7..=10 the third.
    assert!(areas[0..4].iter().all(|&(_, a)| a == areas[0].1));
    assert_ne!(areas[5].1, areas[0].1);
    assert_ne!(areas[7].1, areas[5].1);
    assert!(areas[7..11].iter().all(|&(_, a)| a == areas[7].1));
  }

  #[test]
  fn flood_fill_is_idempotent() {
    let mut set = strip(&[4, 6]);
    let mut filler = FloodFiller::new(u32::MAX - 1, 1);
    filler.flood(&mut set);
    let first = collect_areas(&set);
    filler.flood(&mut set);
    assert_eq!(first, collect_areas(&set), "no mutation between runs");
  }

  #[test]
  fn small_component_is_collapsed_when_ids_run_out() {
    // Components: cells 0..=3 (size 4), cell 5 (size 1), cells 7..=10
    // (size 4). With three ids needed but only ids 1..=3 available and the
    // singleton counted small, the third component reuses the singleton's
    // id and the singleton moves to the reserved max label.
    let mut set = strip(&[4, 6]);
    let stats = FloodFiller::new(3, 3).flood(&mut set);
    let areas = collect_areas(&set);

    assert_eq!(stats.collapsed, 1);
    assert!(!stats.id_space_exhausted);
    assert_eq!(areas[5].1, 3, "the singleton carries the reserved max label");
    assert_eq!(areas[0].1, 1);
    assert_eq!(areas[7].1, 2, "the reclaimed id goes to the new component");
  }

  #[test]
  fn exhaustion_without_small_components_shares_an_id() {
    // Three components of size >= 3, only two ids: nothing can be
    // collapsed, so the warning path shares the last id.
    let mut set = strip(&[3, 7]);
    let stats = FloodFiller::new(3, 2).flood(&mut set);
    let areas = collect_areas(&set);

    assert!(stats.id_space_exhausted);
    assert_eq!(stats.area_count, 2);
    assert_eq!(areas[8].1, 2, "the overflow component shares the last id");
    for (walkable, area) in collect_areas(&set) {
      if walkable {
        assert!(area > 0, "the partition stays total even after exhaustion");
      }
    }
  }
}
