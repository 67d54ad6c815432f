//! A* throughput over grid graphs of a few sizes.

use std::time::Duration;

use criterion::{Criterion, criterion_group, criterion_main};
use glam::Vec3;
use path_engine::{
  AStarSearch, FloodFiller, GraphSet, GridCell, GridGraph, NearestParams, PathHandler, PathSearch,
  SearchContext,
};
use web_time::Instant;

/// Builds a scanned, flooded grid with a diagonal lattice of obstacles.
fn lattice(size: u32) -> GraphSet {
  let mut set = GraphSet::new();
  set.add_graph(Box::new(GridGraph::from_fn(
    size,
    size,
    1.0,
    Vec3::ZERO,
    |x, y| {
      if x % 7 == 3 && y % 5 != 0 {
        GridCell::blocked()
      } else {
        GridCell::walkable()
      }
    },
  )));
  set.scan_graph(0, &mut |_| {});
  FloodFiller::new((1 << 17) - 1, 10).flood(&mut set);
  set
}

fn run_search(set: &GraphSet, handler: &mut PathHandler, size: u32, path_id: u16) -> u32 {
  let mut search = AStarSearch::new(Vec3::ZERO, Vec3::new(size as f32 - 1.0, size as f32 - 1.0, 0.0));
  let mut ctx = SearchContext {
    graphs: set,
    handler,
    path_id,
    nearest: NearestParams::default(),
  };
  search.prepare(&mut ctx).expect("endpoints resolve");
  search.initialize(&mut ctx).expect("seeded");
  while !search.is_done() {
    search
      .step(&mut ctx, Instant::now() + Duration::from_millis(50))
      .expect("route exists");
  }
  search.total_cost()
}

fn bench_grid_search(c: &mut Criterion) {
  for size in [32u32, 128] {
    let set = lattice(size);
    let mut handler = PathHandler::new(0, set.nodes().index_range());

    // Each run needs a fresh visit-marker id, exactly as the engine would
    // assign one per path.
    let mut path_id: u16 = 0;
    c.bench_function(&format!("astar_corner_to_corner_{size}x{size}"), |b| {
      b.iter(|| {
        path_id = path_id.checked_add(1).unwrap_or_else(|| {
          handler.reset_visits();
          1
        });
        run_search(&set, &mut handler, size, path_id)
      });
    });
  }
}

criterion_group!(benches, bench_grid_search);
criterion_main!(benches);
