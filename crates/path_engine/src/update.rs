//! Graph-update scheduling.
//!
//! Updates arrive from callers at any time (immediately or delayed), are
//! coalesced under an optional rate limit, and are applied inside a blocked
//! window by a single resumable work item. Each update is classified per
//! target graph:
//!
//! - main-thread updates apply directly under the graph write lock;
//! - split updates run their init half on the host, then ship the body to
//!   the async graph-update thread;
//! - async updates ship entirely to that thread.
//!
//! The async thread consumes commands over a channel and reports an outcome
//! per update. Whenever async work is outstanding, main-thread updates from
//! the same flush wait for it to drain, so any single graph observes its
//! updates in enqueue order.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use async_channel::{Receiver, Sender};
use web_time::Instant;

use crate::graph::{GraphSet, GraphUpdate, ThreadingClass};
use crate::work_items::WorkItem;

/// Commands consumed by the async graph-update thread.
enum UpdateCommand {
  /// Apply one update to one graph.
  Apply { graph: u8, update: Arc<GraphUpdate> },
  /// Exit the worker loop.
  Shutdown,
}

/// Per-update report from the async thread.
enum UpdateOutcome {
  Applied { connectivity_changed: bool },
  /// Failure; already logged on the updater thread. The update is dropped.
  Failed,
}

/// Handle to the dedicated async graph-update thread.
pub(crate) struct AsyncGraphUpdater {
  cmd_tx: Sender<UpdateCommand>,
  result_rx: Receiver<UpdateOutcome>,
  handle: Option<JoinHandle<()>>,
}

impl AsyncGraphUpdater {
  /// Spawns the updater thread against the engine's graph data.
  pub fn new(graphs: Arc<RwLock<GraphSet>>) -> Self {
    let (cmd_tx, cmd_rx) = async_channel::unbounded::<UpdateCommand>();
    let (result_tx, result_rx) = async_channel::unbounded::<UpdateOutcome>();

    let handle = thread::Builder::new()
      .name("graph-updater".into())
      .spawn(move || worker_loop(graphs, cmd_rx, result_tx))
      .expect("failed to spawn the graph-updater thread");

    Self {
      cmd_tx,
      result_rx,
      handle: Some(handle),
    }
  }

  fn channels(&self) -> (Sender<UpdateCommand>, Receiver<UpdateOutcome>) {
    (self.cmd_tx.clone(), self.result_rx.clone())
  }

  /// Signals the thread and joins it.
  pub fn shutdown(&mut self) {
    let _ = self.cmd_tx.send_blocking(UpdateCommand::Shutdown);
    if let Some(handle) = self.handle.take() {
      let _ = handle.join();
    }
  }
}

impl Drop for AsyncGraphUpdater {
  fn drop(&mut self) {
    self.shutdown();
  }
}

/// Async updater main loop. Runs until told to shut down or until every
/// sender disappears.
fn worker_loop(
  graphs: Arc<RwLock<GraphSet>>,
  cmd_rx: Receiver<UpdateCommand>,
  result_tx: Sender<UpdateOutcome>,
) {
  while let Ok(command) = cmd_rx.recv_blocking() {
    match command {
      UpdateCommand::Shutdown => break,
      UpdateCommand::Apply { graph, update } => {
        let outcome = {
          let mut set = graphs.write().unwrap();
          match set.apply_update(graph, &update) {
            Ok(changed) => UpdateOutcome::Applied {
              connectivity_changed: changed,
            },
            Err(error) => {
              log::warn!("async graph update on graph {graph} failed: {error}");
              UpdateOutcome::Failed
            }
          }
        };
        let _ = result_tx.send_blocking(outcome);
      }
    }
  }
}

struct QueuedUpdate {
  update: Arc<GraphUpdate>,
  /// Earliest flush allowed to take this update. `None` means immediately.
  due: Option<Instant>,
}

/// Batches, rate-limits and dispatches graph updates.
pub(crate) struct GraphUpdateScheduler {
  pending: Arc<Mutex<Vec<QueuedUpdate>>>,
  /// Set while a flush work item is queued or running.
  flush_in_flight: Arc<AtomicBool>,
  limit_updates: bool,
  min_interval: Duration,
  last_flush: Option<Instant>,
}

impl GraphUpdateScheduler {
  pub fn new(limit_updates: bool, min_interval: Duration) -> Self {
    Self {
      pending: Arc::new(Mutex::new(Vec::new())),
      flush_in_flight: Arc::new(AtomicBool::new(false)),
      limit_updates,
      min_interval,
      last_flush: None,
    }
  }

  /// Queues an update for the next flush.
  pub fn enqueue(&self, update: GraphUpdate) {
    self.pending.lock().unwrap().push(QueuedUpdate {
      update: Arc::new(update),
      due: None,
    });
  }

  /// Queues an update that becomes eligible after `delay`.
  pub fn enqueue_delayed(&self, update: GraphUpdate, delay: Duration) {
    self.pending.lock().unwrap().push(QueuedUpdate {
      update: Arc::new(update),
      due: Some(Instant::now() + delay),
    });
  }

  /// True if any queued update is eligible now.
  pub fn has_due(&self) -> bool {
    let now = Instant::now();
    self
      .pending
      .lock()
      .unwrap()
      .iter()
      .any(|queued| queued.due.is_none_or(|due| due <= now))
  }

  /// Whether a flush work item should be enqueued now. `force` overrides
  /// the rate limit but never double-queues a flush.
  pub fn should_flush(&self, force: bool) -> bool {
    if self.flush_in_flight.load(Ordering::Acquire) || !self.has_due() {
      return false;
    }
    if force {
      return true;
    }
    if self.limit_updates
      && let Some(last) = self.last_flush
      && last.elapsed() < self.min_interval
    {
      // Coalesce: enqueues within the window ride the next eligible flush.
      return false;
    }
    true
  }

  /// Builds the resumable work item that performs one flush.
  ///
  /// `updater` is `None` when the engine runs without threads; async-class
  /// updates then run on the host thread (after their init half).
  pub fn make_flush_item(&mut self, updater: Option<&AsyncGraphUpdater>) -> WorkItem {
    self.flush_in_flight.store(true, Ordering::Release);
    self.last_flush = Some(Instant::now());

    let pending = self.pending.clone();
    let in_flight = self.flush_in_flight.clone();
    let channels = updater.map(|u| u.channels());

    let mut tasks: VecDeque<(u8, Arc<GraphUpdate>)> = VecDeque::new();
    let mut started = false;
    let mut outstanding: usize = 0;
    let mut any_flood = false;

    WorkItem::stepped(move |ctx, force| {
      if !started {
        started = true;
        let now = Instant::now();
        let mut queue = pending.lock().unwrap();
        let mut not_due = Vec::new();
        let graph_count = ctx.graphs.read().unwrap().graph_count() as u8;
        for queued in queue.drain(..) {
          if queued.due.is_none_or(|due| due <= now) {
            any_flood |= queued.update.requires_flood_fill;
            for graph in 0..graph_count {
              tasks.push_back((graph, queued.update.clone()));
            }
          } else {
            not_due.push(queued);
          }
        }
        *queue = not_due;
      }

      loop {
        // Fold in finished async updates.
        if let Some((_, result_rx)) = &channels {
          while let Ok(outcome) = result_rx.try_recv() {
            outstanding = outstanding.saturating_sub(1);
            if let UpdateOutcome::Applied {
              connectivity_changed: true,
            } = outcome
            {
              any_flood = true;
            }
          }
        }

        let Some((graph, update)) = tasks.front().cloned() else {
          // Everything dispatched; the flush completes once async work
          // drains.
          if outstanding > 0 {
            let Some((_, result_rx)) = &channels else {
              unreachable!("outstanding async updates without an updater");
            };
            if !force {
              return false;
            }
            while outstanding > 0 {
              match result_rx.recv_blocking() {
                Ok(outcome) => {
                  outstanding -= 1;
                  if let UpdateOutcome::Applied {
                    connectivity_changed: true,
                  } = outcome
                  {
                    any_flood = true;
                  }
                }
                Err(_) => break,
              }
            }
          }
          if any_flood {
            ctx.flags.flood_fill = true;
          }
          ctx.flags.graphs_updated = true;
          in_flight.store(false, Ordering::Release);
          return true;
        };

        let class = ctx
          .graphs
          .read()
          .unwrap()
          .graph(graph)
          .map(|g| g.threading_class(&update));
        let Some(class) = class else {
          tasks.pop_front();
          continue;
        };

        match class {
          ThreadingClass::MainThread => {
            if outstanding > 0 {
              // Async updates from this flush must land first so each
              // graph sees enqueue order.
              if !force {
                return false;
              }
              let Some((_, result_rx)) = &channels else {
                unreachable!("outstanding async updates without an updater");
              };
              if let Ok(outcome) = result_rx.recv_blocking() {
                outstanding -= 1;
                if let UpdateOutcome::Applied {
                  connectivity_changed: true,
                } = outcome
                {
                  any_flood = true;
                }
              }
              continue;
            }
            match ctx.graphs.write().unwrap().apply_update(graph, &update) {
              Ok(changed) => any_flood |= changed,
              Err(error) => log::warn!("graph update on graph {graph} failed: {error}"),
            }
            tasks.pop_front();
          }
          ThreadingClass::MainInitAsyncApply => {
            ctx.graphs.write().unwrap().apply_update_init(graph, &update);
            match &channels {
              Some((cmd_tx, _)) => {
                let _ = cmd_tx.send_blocking(UpdateCommand::Apply {
                  graph,
                  update: update.clone(),
                });
                outstanding += 1;
              }
              None => apply_inline(ctx.graphs, graph, &update, &mut any_flood),
            }
            tasks.pop_front();
          }
          ThreadingClass::AsyncThread => {
            match &channels {
              Some((cmd_tx, _)) => {
                let _ = cmd_tx.send_blocking(UpdateCommand::Apply {
                  graph,
                  update: update.clone(),
                });
                outstanding += 1;
              }
              None => {
                // No async thread exists in cooperative mode; honor the
                // init protocol and apply on the host.
                ctx.graphs.write().unwrap().apply_update_init(graph, &update);
                apply_inline(ctx.graphs, graph, &update, &mut any_flood);
              }
            }
            tasks.pop_front();
          }
        }
      }
    })
  }
}

fn apply_inline(graphs: &RwLock<GraphSet>, graph: u8, update: &GraphUpdate, any_flood: &mut bool) {
  match graphs.write().unwrap().apply_update(graph, update) {
    Ok(changed) => *any_flood |= changed,
    Err(error) => log::warn!("graph update on graph {graph} failed: {error}"),
  }
}
