use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use glam::Vec3;
use web_time::Instant;

use super::*;
use crate::config::ThreadCount;
use crate::error::PathError;
use crate::graph::grid::{GridCell, GridGraph};
use crate::graph::{Bounds, NearestConstraint, ThreadingHint};
use crate::path::{PathSearch, SearchContext};
use crate::search::AStarSearch;
use crate::test_util::NoopSearch;

fn cooperative_engine() -> Engine {
  Engine::new(EngineConfig::default().with_threads(ThreadCount::Cooperative))
}

fn threaded_engine(workers: usize) -> Engine {
  Engine::new(EngineConfig::default().with_threads(ThreadCount::Fixed(workers)))
}

fn open_grid(width: u32, height: u32) -> Box<GridGraph> {
  Box::new(GridGraph::from_fn(width, height, 1.0, Vec3::ZERO, |_, _| {
    GridCell::walkable()
  }))
}

fn eventually(predicate: impl Fn() -> bool) -> bool {
  for _ in 0..5000 {
    if predicate() {
      return true;
    }
    thread::sleep(Duration::from_millis(1));
  }
  false
}

fn tick_until(engine: &mut Engine, predicate: impl Fn() -> bool) {
  for _ in 0..5000 {
    engine.tick();
    if predicate() {
      return;
    }
    thread::sleep(Duration::from_millis(1));
  }
  panic!("engine never reached the expected state");
}

/// Search that flags while its step is on a worker, for quiescence probes.
struct ProbeSearch {
  executing: Arc<AtomicBool>,
  remaining: u32,
}

impl PathSearch for ProbeSearch {
  fn prepare(&mut self, _: &mut SearchContext<'_>) -> Result<(), PathError> {
    Ok(())
  }
  fn initialize(&mut self, _: &mut SearchContext<'_>) -> Result<(), PathError> {
    Ok(())
  }
  fn step(&mut self, _: &mut SearchContext<'_>, _: Instant) -> Result<(), PathError> {
    self.executing.store(true, Ordering::SeqCst);
    thread::sleep(Duration::from_millis(1));
    self.remaining = self.remaining.saturating_sub(1);
    self.executing.store(false, Ordering::SeqCst);
    Ok(())
  }
  fn is_done(&self) -> bool {
    self.remaining == 0
  }
  fn as_any(&self) -> &dyn Any {
    self
  }
}

#[test]
fn start_path_requires_graphs() {
  let engine = cooperative_engine();
  let path = Path::new(NoopSearch);
  assert!(matches!(
    engine.start_path(&path, false),
    Err(StartPathError::NoGraphs)
  ));
}

#[test]
fn start_path_rejects_double_start() {
  let mut engine = cooperative_engine();
  engine.add_graph(open_grid(2, 2));
  engine.scan();

  let path = Path::new(NoopSearch);
  engine.start_path(&path, false).unwrap();
  assert!(matches!(
    engine.start_path(&path, false),
    Err(StartPathError::AlreadyStarted { .. })
  ));
}

#[test]
fn wait_for_path_rejects_unstarted_paths() {
  let mut engine = cooperative_engine();
  let path = Path::new(NoopSearch);
  assert!(matches!(
    engine.wait_for_path(&path),
    Err(WaitError::NotStarted)
  ));
}

#[test]
fn cooperative_engine_completes_a_search() {
  let mut engine = cooperative_engine();
  engine.add_graph(open_grid(6, 6));
  engine.scan();

  let fired = Arc::new(AtomicUsize::new(0));
  let path = {
    let fired = fired.clone();
    Path::with_callback(
      AStarSearch::new(Vec3::ZERO, Vec3::new(5.0, 5.0, 0.0)),
      move |path| {
        assert!(!path.is_errored());
        fired.fetch_add(1, Ordering::SeqCst);
      },
    )
  };

  engine.start_path(&path, false).unwrap();
  tick_until(&mut engine, || path.state() == PathState::Returned);

  assert_eq!(fired.load(Ordering::SeqCst), 1, "callback fires exactly once");
  let cost = path.result(|search: &AStarSearch| search.total_cost()).unwrap();
  assert_eq!(cost, 10_000, "5 right + 5 up on a unit grid");
}

#[test]
fn threaded_engine_completes_searches() {
  let mut engine = threaded_engine(2);
  engine.add_graph(open_grid(16, 16));
  engine.scan();

  let mut paths = Vec::new();
  for i in 0..8 {
    let path = Path::new(AStarSearch::new(
      Vec3::ZERO,
      Vec3::new(15.0, (i % 16) as f32, 0.0),
    ));
    engine.start_path(&path, false).unwrap();
    paths.push(path);
  }
  for path in &paths {
    engine.wait_for_path(path).unwrap();
    assert_eq!(path.state(), PathState::Returned);
    assert!(!path.is_errored());
  }
}

#[test]
fn wait_for_path_matches_tick_until_returned() {
  let mut engine = threaded_engine(1);
  engine.add_graph(open_grid(8, 8));
  engine.scan();

  let waited = Path::new(AStarSearch::new(Vec3::ZERO, Vec3::new(7.0, 7.0, 0.0)));
  engine.start_path(&waited, false).unwrap();
  engine.wait_for_path(&waited).unwrap();

  let ticked = Path::new(AStarSearch::new(Vec3::ZERO, Vec3::new(7.0, 7.0, 0.0)));
  engine.start_path(&ticked, false).unwrap();
  tick_until(&mut engine, || ticked.state() == PathState::Returned);

  let waited_cost = waited.result(|s: &AStarSearch| s.total_cost()).unwrap();
  let ticked_cost = ticked.result(|s: &AStarSearch| s.total_cost()).unwrap();
  assert_eq!(waited_cost, ticked_cost);
}

#[test]
fn fifo_order_with_front_push() {
  let mut engine = cooperative_engine();
  engine.add_graph(open_grid(2, 2));
  engine.scan();

  let order = Arc::new(Mutex::new(Vec::new()));
  let make = |tag: &'static str| {
    let order = order.clone();
    let path = Path::new(NoopSearch);
    path.set_immediate_callback(Box::new(move |_| {
      order.lock().unwrap().push(tag);
    }));
    path
  };

  let (p1, p2, p3, p4) = (make("p1"), make("p2"), make("p3"), make("p4"));
  engine.start_path(&p1, false).unwrap();
  engine.start_path(&p2, false).unwrap();
  engine.start_path(&p3, true).unwrap();
  engine.start_path(&p4, false).unwrap();

  tick_until(&mut engine, || p4.state() == PathState::Returned);
  assert_eq!(*order.lock().unwrap(), vec!["p3", "p1", "p2", "p4"]);
}

#[test]
fn safe_update_runs_only_while_no_search_executes() {
  let mut engine = Engine::new(
    EngineConfig::default()
      .with_threads(ThreadCount::Fixed(1))
      .with_slice_budget_ms(0.2),
  );
  engine.add_graph(open_grid(4, 4));
  engine.scan();

  let executing = Arc::new(AtomicBool::new(false));
  let path = Path::new(ProbeSearch {
    executing: executing.clone(),
    remaining: 100,
  });
  engine.start_path(&path, false).unwrap();
  assert!(eventually(|| path.state() >= PathState::Processing));

  let observed = Arc::new(Mutex::new(None));
  {
    let observed = observed.clone();
    let executing = executing.clone();
    engine.register_safe_update(move |_| {
      *observed.lock().unwrap() = Some(executing.load(Ordering::SeqCst));
    });
  }

  tick_until(&mut engine, || observed.lock().unwrap().is_some());
  assert_eq!(
    *observed.lock().unwrap(),
    Some(false),
    "the blocked window must never overlap a search step"
  );
}

#[test]
fn graph_updates_apply_between_searches() {
  let mut engine = threaded_engine(1);
  engine.add_graph(open_grid(5, 1));
  engine.scan();

  let before = Path::new(AStarSearch::new(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0)));
  engine.start_path(&before, false).unwrap();
  engine.wait_for_path(&before).unwrap();
  assert!(!before.is_errored());

  // Sever the corridor at x = 2 and force the flush through.
  engine.update_graphs(
    GraphUpdate::new(Bounds::new(
      Vec3::new(1.5, -0.5, -1.0),
      Vec3::new(2.5, 0.5, 1.0),
    ))
    .with_walkable(false),
  );
  engine.flush_graph_updates();

  let after = Path::new(AStarSearch::new(Vec3::ZERO, Vec3::new(4.0, 0.0, 0.0)));
  engine.start_path(&after, false).unwrap();
  engine.wait_for_path(&after).unwrap();

  assert!(after.is_errored(), "the corridor is now split in two areas");
  assert!(matches!(after.error(), Some(PathError::AreaMismatch { .. })));
}

#[test]
fn graphs_updated_hook_fires_once_per_flush() {
  let mut engine = threaded_engine(1);
  engine.add_graph(open_grid(4, 4));
  engine.scan();

  let fires = Arc::new(AtomicUsize::new(0));
  {
    let fires = fires.clone();
    engine.hooks().on_graphs_updated.add(move |_| {
      fires.fetch_add(1, Ordering::SeqCst);
    });
  }

  engine.update_graphs(
    GraphUpdate::new(Bounds::new(Vec3::ZERO, Vec3::ONE)).with_penalty_delta(50),
  );
  engine.flush_graph_updates();
  assert_eq!(fires.load(Ordering::SeqCst), 1);

  // Nothing queued: the second flush is a no-op.
  engine.flush_graph_updates();
  assert_eq!(fires.load(Ordering::SeqCst), 1);
}

#[test]
fn async_hinted_updates_flow_through_the_updater_thread() {
  let mut engine = threaded_engine(1);
  engine.add_graph(open_grid(4, 4));
  engine.scan();

  engine.update_graphs(
    GraphUpdate::new(Bounds::new(
      Vec3::new(-0.5, -0.5, -1.0),
      Vec3::new(4.5, 4.5, 1.0),
    ))
    .with_penalty_delta(75)
    .with_threading(ThreadingHint::AsyncThread),
  );
  engine.flush_graph_updates();

  let data = engine.graph_data();
  let set = data.read().unwrap();
  let mut penalty = None;
  set.graph(0).unwrap().get_nodes(&mut |node| {
    penalty = Some(node.penalty);
    false
  });
  assert_eq!(penalty, Some(75));
}

#[test]
fn termination_errors_queued_paths_within_a_tick() {
  let mut engine = cooperative_engine();
  engine.add_graph(open_grid(2, 2));
  engine.scan();

  let errored = Arc::new(AtomicUsize::new(0));
  let mut paths = Vec::new();
  for _ in 0..5 {
    let errored = errored.clone();
    let path = Path::with_callback(NoopSearch, move |path| {
      assert!(path.is_errored());
      errored.fetch_add(1, Ordering::SeqCst);
    });
    engine.start_path(&path, false).unwrap();
    paths.push(path);
  }

  engine.terminate();
  engine.tick();

  assert_eq!(errored.load(Ordering::SeqCst), 5);
  for path in &paths {
    assert_eq!(path.state(), PathState::Returned);
  }
  assert!(matches!(
    engine.start_path(&Path::new(NoopSearch), false),
    Err(StartPathError::NotAccepting)
  ));
}

#[test]
fn path_ids_wrap_and_fire_the_overflow_hook_once() {
  let mut engine = cooperative_engine();
  engine.add_graph(open_grid(2, 2));
  engine.scan();

  let overflows = Arc::new(AtomicUsize::new(0));
  {
    let overflows = overflows.clone();
    engine.hooks().set_overflow_callback(move || {
      overflows.fetch_add(1, Ordering::SeqCst);
    });
  }

  let mut first_wrapped_id = None;
  for request in 0..65_536u32 {
    let path = Path::new(NoopSearch);
    engine.start_path(&path, false).unwrap();
    assert_ne!(path.id(), 0, "id 0 must never be issued (request {request})");
    if overflows.load(Ordering::SeqCst) == 1 && first_wrapped_id.is_none() {
      first_wrapped_id = Some(path.id());
    }
    // Keep the queue from holding 65k paths alive at once.
    if request % 4096 == 0 {
      engine.tick();
    }
  }

  assert_eq!(overflows.load(Ordering::SeqCst), 1, "one overflow per wrap");
  assert_eq!(first_wrapped_id, Some(1), "ids restart at 1 after the wrap");
}

#[test]
fn nearest_prefers_earlier_graph_within_prioritize_limit() {
  let mut engine = Engine::new(
    EngineConfig::default()
      .with_threads(ThreadCount::Cooperative)
      .with_graph_prioritization(1.0),
  );
  // Graph 0's node sits at 0.9 from the query, graph 1's at 0.5.
  engine.add_graph(Box::new(GridGraph::from_fn(
    1,
    1,
    1.0,
    Vec3::new(0.9, 0.0, 0.0),
    |_, _| GridCell::walkable(),
  )));
  engine.add_graph(Box::new(GridGraph::from_fn(
    1,
    1,
    1.0,
    Vec3::new(0.5, 0.0, 0.0),
    |_, _| GridCell::walkable(),
  )));
  engine.scan();

  let info = engine
    .get_nearest(Vec3::ZERO, &NearestConstraint::default())
    .expect("both graphs have nodes");
  assert_eq!(
    info.node.graph, 0,
    "graph 0 answered within the limit, so graph 1 is never consulted"
  );
}

#[test]
fn nearest_rejects_results_beyond_max_distance() {
  let mut engine = Engine::new(
    EngineConfig::default()
      .with_threads(ThreadCount::Cooperative)
      .with_max_nearest_node_distance(0.5),
  );
  engine.add_graph(Box::new(GridGraph::from_fn(
    1,
    1,
    1.0,
    Vec3::new(0.9, 0.0, 0.0),
    |_, _| GridCell::walkable(),
  )));
  engine.scan();

  assert!(
    engine
      .get_nearest(Vec3::ZERO, &NearestConstraint::default())
      .is_none()
  );
}

#[test]
fn flood_fill_via_engine_assigns_areas() {
  let mut engine = cooperative_engine();
  engine.add_graph(Box::new(GridGraph::from_fn(
    5,
    1,
    1.0,
    Vec3::ZERO,
    |x, _| {
      if x == 2 { GridCell::blocked() } else { GridCell::walkable() }
    },
  )));
  engine.scan();

  let stats = engine.flood_fill();
  assert_eq!(stats.area_count, 2);

  let info = engine
    .get_nearest(Vec3::new(4.0, 0.0, 0.0), &NearestConstraint::default())
    .unwrap();
  assert!(info.node.area > 0);
}

#[test]
fn destroy_is_idempotent_and_drains_everything() {
  let mut engine = threaded_engine(2);
  engine.add_graph(open_grid(8, 8));
  engine.scan();

  let path = Path::new(AStarSearch::new(Vec3::ZERO, Vec3::new(7.0, 0.0, 0.0)));
  engine.start_path(&path, false).unwrap();

  engine.destroy();
  engine.destroy();

  assert!(engine.is_terminating());
  assert_eq!(
    path.state(),
    PathState::Returned,
    "in-flight and queued paths both resolve during destroy"
  );
}
