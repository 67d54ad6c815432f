//! Seek Demo - concurrent searches over a maze grid.
//!
//! Builds a grid with a diagonal lattice of walls, starts a batch of path
//! requests against the threaded engine, mutates the graph mid-flight and
//! prints what every search found.
//!
//! Run with: `cargo run -p path_engine --example seek`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use glam::Vec3;
use path_engine::{
  AStarSearch, Bounds, Engine, EngineConfig, GraphUpdate, GridCell, GridGraph, Path, ThreadCount,
};

const GRID_SIZE: u32 = 64;
const REQUESTS: usize = 16;

fn main() {
  env_logger::init();

  let mut engine = Engine::new(EngineConfig::default().with_threads(ThreadCount::Auto));
  engine.add_graph(Box::new(GridGraph::from_fn(
    GRID_SIZE,
    GRID_SIZE,
    1.0,
    Vec3::ZERO,
    |x, y| {
      if x % 9 == 4 && y % 6 != 0 {
        GridCell::blocked()
      } else {
        GridCell::walkable()
      }
    },
  )));
  engine.scan();
  println!(
    "scanned {} nodes on {} worker threads",
    engine.graph_data().read().unwrap().live_node_count(),
    engine.worker_thread_count()
  );

  let completed = Arc::new(AtomicUsize::new(0));
  let mut paths = Vec::new();
  for i in 0..REQUESTS {
    let goal = Vec3::new(
      (GRID_SIZE - 1) as f32,
      (i as u32 * GRID_SIZE / REQUESTS as u32) as f32,
      0.0,
    );
    let completed = completed.clone();
    let path = Path::with_callback(AStarSearch::new(Vec3::ZERO, goal), move |_| {
      completed.fetch_add(1, Ordering::SeqCst);
    });
    engine.start_path(&path, false).unwrap();
    paths.push((goal, path));
  }

  // Carve a hole through one wall column while searches are in flight.
  engine.update_graphs(
    GraphUpdate::new(Bounds::new(
      Vec3::new(3.5, 30.5, -1.0),
      Vec3::new(4.5, 33.5, 1.0),
    ))
    .with_walkable(true),
  );
  engine.flush_graph_updates();

  while completed.load(Ordering::SeqCst) < REQUESTS {
    engine.tick();
    std::thread::sleep(std::time::Duration::from_millis(1));
  }

  for (goal, path) in &paths {
    let summary = path
      .result(|search: &AStarSearch| {
        format!(
          "cost {:>6} milli-units, {} nodes expanded",
          search.total_cost(),
          search.nodes_searched()
        )
      })
      .unwrap_or_else(|| "no result".to_string());
    match path.error() {
      None => println!("-> {goal}: {summary} ({:?})", path.duration()),
      Some(error) => println!("-> {goal}: failed: {error}"),
    }
  }
}
