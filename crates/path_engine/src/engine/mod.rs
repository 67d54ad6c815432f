//! Engine lifecycle and the per-tick pump.
//!
//! The [`Engine`] owns every subsystem: the path queue, the workers (threads
//! or one cooperative instance), the return pipeline, the work-item runner,
//! the graph-update scheduler and the graph data itself. The host drives it
//! with [`Engine::tick`] once per frame:
//!
//! 1. advance the cooperative worker, if any;
//! 2. opportunistically perform blocking: when deferred work exists and
//!    every receiver is parked, drain returns, run safe callbacks, execute
//!    work items to a yield point, honor the flood-fill and
//!    heuristic-embedding flags, then unblock;
//! 3. drain completed paths under the return-time budget.
//!
//! An engine is not restartable: after termination a new engine must be
//! constructed.

#[cfg(test)]
mod tests;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use glam::Vec3;

use crate::config::EngineConfig;
use crate::error::{PathError, StartPathError, WaitError};
use crate::flood::{FloodFiller, FloodStats};
use crate::graph::{GraphSet, GraphUpdate, NavGraph, NearestConstraint, NearestInfo};
use crate::handler::PathHandler;
use crate::hooks::{HookRegistry, ScanProgress};
use crate::path::{Path, PathIdGenerator, PathState};
use crate::queue::PathQueue;
use crate::return_stack::{ReturnPipeline, ReturnStack};
use crate::update::{AsyncGraphUpdater, GraphUpdateScheduler};
use crate::work_items::{PendingFlags, WorkContext, WorkItem, WorkItemRunner};
use crate::worker::{CooperativeWorker, EngineShared, SearchWorker, run_worker_thread};

/// Waiting this deep in `wait_for_path` draws a warning.
const WAIT_DEPTH_WARNING: usize = 5;

/// The pathfinding engine.
pub struct Engine {
  config: EngineConfig,
  shared: Arc<EngineShared>,
  pipeline: ReturnPipeline,
  handlers: Vec<Arc<Mutex<PathHandler>>>,
  workers: Vec<JoinHandle<()>>,
  coop: Option<CooperativeWorker>,
  work_items: Arc<WorkItemRunner>,
  scheduler: GraphUpdateScheduler,
  updater: Option<AsyncGraphUpdater>,
  id_gen: Mutex<PathIdGenerator>,
  /// Safe callbacks awaiting the next blocked window. The mutex makes
  /// registration from producer threads race-free with the host drain.
  safe_callbacks: Mutex<Vec<Box<dyn FnOnce(&mut WorkContext<'_>) + Send>>>,
  flags: PendingFlags,
  flood: FloodFiller,
  wait_depth: AtomicUsize,
  destroyed: bool,
}

impl Engine {
  /// Creates an engine with a fresh hook registry.
  pub fn new(config: EngineConfig) -> Self {
    Self::with_hooks(config, Arc::new(HookRegistry::new()))
  }

  /// Creates an engine firing `on_awake_settings` against pre-registered
  /// listeners once construction completes.
  pub fn with_hooks(config: EngineConfig, hooks: Arc<HookRegistry>) -> Self {
    let worker_threads = config.thread_count.resolve();
    let receiver_count = worker_threads.max(1);

    let mut graph_set = GraphSet::new();
    graph_set
      .embedding_mut()
      .set_enabled(config.heuristic_embedding);

    let shared = Arc::new(EngineShared {
      queue: Arc::new(PathQueue::new(receiver_count)),
      returns: Arc::new(ReturnStack::new()),
      graphs: Arc::new(RwLock::new(graph_set)),
      hooks,
      slice_budget_nanos: AtomicU64::new(config.slice_budget_nanos()),
      terminating: AtomicBool::new(false),
      nearest: config.nearest_params(),
    });

    let mut handlers = Vec::new();
    let mut workers = Vec::new();
    let mut coop = None;

    if worker_threads == 0 {
      let handler = Arc::new(Mutex::new(PathHandler::new(0, 1)));
      handlers.push(handler.clone());
      coop = Some(CooperativeWorker::new(SearchWorker::new(
        0,
        shared.clone(),
        handler,
      )));
    } else {
      for index in 0..worker_threads {
        let handler = Arc::new(Mutex::new(PathHandler::new(index, 1)));
        handlers.push(handler.clone());
        let worker = SearchWorker::new(index, shared.clone(), handler);
        let handle = thread::Builder::new()
          .name(format!("path-worker-{index}"))
          .spawn(move || run_worker_thread(worker))
          .expect("failed to spawn a search worker thread");
        workers.push(handle);
      }
    }

    // No async update thread without worker threads: the host runs
    // everything in cooperative mode.
    let updater = if worker_threads > 0 {
      Some(AsyncGraphUpdater::new(shared.graphs.clone()))
    } else {
      None
    };

    let engine = Self {
      scheduler: GraphUpdateScheduler::new(
        config.limit_graph_updates,
        Duration::from_secs_f32(config.graph_update_interval.max(0.0)),
      ),
      flood: FloodFiller::new(config.max_area_index, config.min_area_size),
      config,
      pipeline: ReturnPipeline::new(shared.returns.clone()),
      shared,
      handlers,
      workers,
      coop,
      work_items: Arc::new(WorkItemRunner::new()),
      updater,
      id_gen: Mutex::new(PathIdGenerator::new()),
      safe_callbacks: Mutex::new(Vec::new()),
      flags: PendingFlags::default(),
      wait_depth: AtomicUsize::new(0),
      destroyed: false,
    };

    engine.shared.hooks.on_awake_settings.fire(&());
    engine
  }

  /// The active configuration.
  pub fn config(&self) -> &EngineConfig {
    &self.config
  }

  /// The engine's hook registry.
  pub fn hooks(&self) -> &HookRegistry {
    &self.shared.hooks
  }

  /// Shared handle to the graph data. Readers must not hold guards across
  /// ticks.
  pub fn graph_data(&self) -> Arc<RwLock<GraphSet>> {
    self.shared.graphs.clone()
  }

  /// Number of graphs.
  pub fn graph_count(&self) -> usize {
    self.shared.graphs.read().unwrap().graph_count()
  }

  /// Number of worker threads (0 in cooperative mode).
  pub fn worker_thread_count(&self) -> usize {
    self.workers.len()
  }

  /// True once the engine stopped accepting paths.
  pub fn is_terminating(&self) -> bool {
    self.shared.queue.is_terminating()
  }

  /// Adds a graph inside a blocked window. Returns its index.
  pub fn add_graph(&mut self, graph: Box<dyn NavGraph>) -> u8 {
    self.blocked_window(|engine| engine.shared.graphs.write().unwrap().add_graph(graph))
  }

  /// Retunes the per-slice search budget. Applies to searches in flight.
  pub fn set_slice_budget_ms(&self, milliseconds: f32) {
    let nanos = ((milliseconds.max(0.01)) * 1_000_000.0) as u64;
    self.shared.slice_budget_nanos.store(nanos, Ordering::Release);
  }

  /// Rebuilds every graph: quiesce, destroy all nodes, scan each graph in
  /// index order, grow worker scratch, flood fill, recompute the embedding,
  /// unblock.
  pub fn scan(&mut self) {
    self.shared.hooks.on_pre_scan.fire(&());
    self.blocked_window(|engine| {
      let hooks = engine.shared.hooks.clone();
      let graph_count = {
        let mut set = engine.shared.graphs.write().unwrap();
        set.destroy_all_nodes();
        set.reassign_graph_indices();
        set.graph_count() as u8
      };

      for graph in 0..graph_count {
        hooks.on_graph_pre_scan.fire(&graph);
        let mut set = engine.shared.graphs.write().unwrap();
        set.scan_graph(graph, &mut |progress| {
          hooks.on_scan_progress.fire(&ScanProgress { graph, progress });
        });
        drop(set);
        hooks.on_graph_post_scan.fire(&graph);
      }

      engine.ensure_handler_capacity();
      hooks.on_post_scan.fire(&());
      engine.run_flood_fill();
      engine.recompute_embedding_if_dirty();
      hooks.on_late_post_scan.fire(&());
    });
  }

  /// Hands a path to the engine.
  ///
  /// With `push_to_front`, the path takes the head of the queue (one
  /// slot's worth of priority).
  pub fn start_path(&self, path: &Arc<Path>, push_to_front: bool) -> Result<(), StartPathError> {
    if self.destroyed || self.shared.queue.is_terminating() {
      return Err(StartPathError::NotAccepting);
    }
    if self.shared.graphs.read().unwrap().graph_count() == 0 {
      return Err(StartPathError::NoGraphs);
    }
    if path.state() != PathState::Created {
      return Err(StartPathError::AlreadyStarted { id: path.id() });
    }

    let (id, wrapped) = self.id_gen.lock().unwrap().next_id();
    if wrapped {
      self.on_path_id_wrap();
    }
    path.assign_id(id);
    path.advance_state(PathState::Queued);

    let pushed = if push_to_front {
      self.shared.queue.push_front(path.clone())
    } else {
      self.shared.queue.push(path.clone())
    };
    if pushed.is_err() {
      path.fail(PathError::EngineTerminated);
      return Err(StartPathError::NotAccepting);
    }
    Ok(())
  }

  /// Ids recycled: fire the one-shot overflow hook and queue the work item
  /// that clears every handler's visit markers before reuse can alias.
  fn on_path_id_wrap(&self) {
    self.shared.hooks.fire_overflow();
    let handlers = self.handlers.clone();
    self.work_items.add(WorkItem::one_shot(move |_| {
      for handler in &handlers {
        handler
          .lock()
          .unwrap_or_else(|poisoned| poisoned.into_inner())
          .reset_visits();
      }
    }));
  }

  /// Queues a graph update for the next flush.
  pub fn update_graphs(&self, update: GraphUpdate) {
    self.scheduler.enqueue(update);
  }

  /// Queues a graph update that becomes eligible after `delay_seconds`.
  pub fn update_graphs_delayed(&self, update: GraphUpdate, delay_seconds: f32) {
    self
      .scheduler
      .enqueue_delayed(update, Duration::from_secs_f32(delay_seconds.max(0.0)));
  }

  /// Flushes queued graph updates now, overriding the rate limit, and
  /// blocks until they are applied. A second call with nothing queued is a
  /// no-op.
  pub fn flush_graph_updates(&mut self) {
    if self.scheduler.should_flush(true) {
      let item = self.scheduler.make_flush_item(self.updater.as_ref());
      self.work_items.add(item);
    }
    if self.work_items.has_pending() || self.flags.flood_fill {
      self.perform_blocking(true);
    }
  }

  /// Registers a callback guaranteed to run during a blocked window exactly
  /// once, then be cleared.
  pub fn register_safe_update(&self, callback: impl FnOnce(&mut WorkContext<'_>) + Send + 'static) {
    self.safe_callbacks.lock().unwrap().push(Box::new(callback));
    // Ask for a window; the next tick (or wait) completes it.
    self.shared.queue.block();
  }

  /// Runs a flood fill inside a blocked window.
  pub fn flood_fill(&mut self) -> FloodStats {
    self.blocked_window(|engine| engine.run_flood_fill())
  }

  /// Nearest node to `position` under the engine's configured limits.
  pub fn get_nearest(&self, position: Vec3, constraint: &NearestConstraint) -> Option<NearestInfo> {
    self
      .shared
      .graphs
      .read()
      .unwrap()
      .nearest(position, constraint, &self.shared.nearest)
  }

  /// Per-frame pump.
  pub fn tick(&mut self) {
    if self.destroyed {
      return;
    }

    if let Some(coop) = &mut self.coop {
      let _ = coop.tick();
    }

    if self.shared.queue.is_terminating() {
      self.drain_terminated_queue();
    } else {
      self.perform_blocking(false);
    }

    self.pipeline.drain(true);
  }

  /// Blocks the host until `path` completes, pumping the engine meanwhile,
  /// then drains returns so the callback has fired on return.
  pub fn wait_for_path(&mut self, path: &Arc<Path>) -> Result<(), WaitError> {
    if self.destroyed {
      return Err(WaitError::Destroyed);
    }
    if path.state() == PathState::Created {
      return Err(WaitError::NotStarted);
    }

    let depth = self.wait_depth.fetch_add(1, Ordering::AcqRel) + 1;
    if depth >= WAIT_DEPTH_WARNING {
      log::warn!("wait_for_path is {depth} levels deep; prefer callbacks over nested waits");
    }

    while path.state() < PathState::ReturnQueue {
      if self.shared.queue.is_terminating() {
        // Workers are gone; queued paths drain as errored completions.
        self.drain_terminated_queue();
      }
      if let Some(coop) = &mut self.coop {
        let _ = coop.tick();
      } else {
        thread::sleep(Duration::from_millis(1));
      }
      if !self.shared.queue.is_terminating() {
        self.perform_blocking(false);
      }
      self.pipeline.drain(false);
    }
    self.pipeline.drain(false);

    self.wait_depth.fetch_sub(1, Ordering::AcqRel);
    Ok(())
  }

  /// One-way shutdown of path acceptance. In-flight searches error at
  /// their next slice; queued paths drain as errored on the next tick.
  pub fn terminate(&mut self) {
    self.shared.terminating.store(true, Ordering::Release);
    self.shared.queue.terminate();
  }

  /// Full teardown: terminate, stop the async updater, join workers, drain
  /// every remaining path as errored, clear hook registries.
  pub fn destroy(&mut self) {
    if self.destroyed {
      return;
    }
    self.terminate();

    if let Some(mut updater) = self.updater.take() {
      updater.shutdown();
    }
    for handle in self.workers.drain(..) {
      let _ = handle.join();
    }
    if let Some(coop) = &mut self.coop {
      // Lets a mid-flight cooperative search error out and return.
      let _ = coop.tick();
    }
    self.coop = None;

    self.drain_terminated_queue();
    self.pipeline.drain(false);
    self.shared.hooks.clear_all();
    self.destroyed = true;
  }

  /// Opportunistic blocked window. Returns true when no window remains in
  /// progress afterwards.
  fn perform_blocking(&mut self, force: bool) -> bool {
    if self.scheduler.should_flush(false) {
      let item = self.scheduler.make_flush_item(self.updater.as_ref());
      self.work_items.add(item);
    }

    let wants = self.work_items.has_pending()
      || !self.safe_callbacks.lock().unwrap().is_empty()
      || self.flags.flood_fill
      || self.shared.queue.is_blocking();
    if !wants {
      return true;
    }

    self.shared.queue.block();
    if force {
      self.block_until_queue_blocked();
    }
    if !self.shared.queue.all_receivers_blocked() {
      // Receivers still finishing their current paths; the queue stays
      // blocking and a later tick completes the window.
      return false;
    }

    self.pipeline.drain(false);

    let callbacks: Vec<_> = self.safe_callbacks.lock().unwrap().drain(..).collect();
    let done = {
      let Engine {
        shared,
        work_items,
        flags,
        ..
      } = self;
      let mut ctx = WorkContext {
        graphs: &*shared.graphs,
        flags,
      };
      for callback in callbacks {
        callback(&mut ctx);
      }
      match work_items.process(&mut ctx, force) {
        Ok(done) => done,
        Err(error) => {
          log::error!("{error}");
          true
        }
      }
    };

    if !done && !force {
      // A resumable item yielded; stay blocked and continue next tick.
      return false;
    }

    self.ensure_handler_capacity();
    if self.flags.flood_fill {
      self.run_flood_fill();
    }
    self.recompute_embedding_if_dirty();

    let graphs_updated = std::mem::take(&mut self.flags.graphs_updated);
    self.shared.queue.unblock();
    if graphs_updated {
      self.shared.hooks.on_graphs_updated.fire(&());
    }
    true
  }

  /// Runs `body` with every receiver parked, then unblocks.
  fn blocked_window<R>(&mut self, body: impl FnOnce(&mut Self) -> R) -> R {
    self.shared.queue.block();
    self.block_until_queue_blocked();
    let result = body(self);
    self.shared.queue.unblock();
    result
  }

  /// Spin-waits (1 ms naps) until every receiver is parked, stepping the
  /// cooperative worker so it can finish its in-flight path.
  fn block_until_queue_blocked(&mut self) {
    loop {
      if self.shared.queue.all_receivers_blocked() {
        return;
      }
      match &mut self.coop {
        Some(coop) => {
          let _ = coop.tick();
        }
        None => thread::sleep(Duration::from_millis(1)),
      }
    }
  }

  /// Grows every worker's scratch table to the current node-index range.
  /// Blocked-window only.
  fn ensure_handler_capacity(&self) {
    let range = self.shared.graphs.read().unwrap().nodes().index_range();
    for handler in &self.handlers {
      handler
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .grow(range);
    }
  }

  /// Flood fills now and clears the pending flag. Blocked-window only.
  fn run_flood_fill(&mut self) -> FloodStats {
    let Engine { shared, flood, .. } = self;
    let mut set = shared.graphs.write().unwrap();
    let stats = flood.flood(&mut set);
    drop(set);
    self.flags.flood_fill = false;
    stats
  }

  fn recompute_embedding_if_dirty(&self) {
    let mut set = self.shared.graphs.write().unwrap();
    if set.embedding().is_dirty() {
      set.recompute_embedding();
    }
  }

  /// Fails and returns every path still sitting in the terminated queue,
  /// plus anything workers pushed on their way out.
  fn drain_terminated_queue(&mut self) {
    for path in self.shared.queue.drain_remaining() {
      path.fail(PathError::EngineTerminated);
      path.advance_state(PathState::Processing);
      self.shared.returns.push(path.clone());
      path.advance_state(PathState::ReturnQueue);
    }
    self.pipeline.drain(false);
  }
}

impl Drop for Engine {
  fn drop(&mut self) {
    self.destroy();
  }
}
