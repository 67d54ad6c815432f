//! Deferred main-thread work.
//!
//! Anything that must observe (or mutate) a consistent graph snapshot is
//! expressed as a [`WorkItem`] and executed by the [`WorkItemRunner`] — on
//! the host thread, strictly in enqueue order, and only while every search
//! worker is parked on the path queue. Items may enqueue further items;
//! re-entrant processing is a logic error and is rejected.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use thiserror::Error;

use crate::graph::GraphSet;

/// `process` was called from inside a work item.
#[derive(Clone, Copy, Debug, Error)]
#[error("work items processed recursively")]
pub struct NestedExecution;

/// Flags work items raise for the engine to honor before unblocking.
#[derive(Debug, Default)]
pub struct PendingFlags {
  /// Some item changed connectivity; flood fill before unblocking.
  pub flood_fill: bool,
  /// A graph-update flush completed; fire the graphs-updated hook.
  pub graphs_updated: bool,
}

/// What a work item sees while it runs.
pub struct WorkContext<'a> {
  /// The engine's graph data. Items lock it as needed rather than holding a
  /// guard, so long-running items can interleave with the async updater.
  pub graphs: &'a RwLock<GraphSet>,
  /// Completion flags read by the engine after the queue drains.
  pub flags: &'a mut PendingFlags,
}

/// A deferred operation.
pub enum WorkItem {
  /// Runs to completion in one call.
  OneShot(Box<dyn FnOnce(&mut WorkContext<'_>) + Send>),
  /// Long-running: `init` runs exactly once, then `step` runs every
  /// blocked window (returning true when complete).
  Resumable {
    /// One-time setup, consumed on first execution.
    init: Option<Box<dyn FnOnce(&mut WorkContext<'_>) + Send>>,
    /// Incremental work; returns whether the item is finished. The bool
    /// argument is the force flag: when set, the item must finish now.
    step: Box<dyn FnMut(&mut WorkContext<'_>, bool) -> bool + Send>,
  },
}

impl WorkItem {
  /// Creates a one-shot item.
  pub fn one_shot(run: impl FnOnce(&mut WorkContext<'_>) + Send + 'static) -> Self {
    WorkItem::OneShot(Box::new(run))
  }

  /// Creates a resumable item.
  pub fn resumable(
    init: impl FnOnce(&mut WorkContext<'_>) + Send + 'static,
    step: impl FnMut(&mut WorkContext<'_>, bool) -> bool + Send + 'static,
  ) -> Self {
    WorkItem::Resumable {
      init: Some(Box::new(init)),
      step: Box::new(step),
    }
  }

  /// Creates a resumable item with no init stage.
  pub fn stepped(step: impl FnMut(&mut WorkContext<'_>, bool) -> bool + Send + 'static) -> Self {
    WorkItem::Resumable {
      init: None,
      step: Box::new(step),
    }
  }
}

/// Serialized executor of [`WorkItem`]s.
pub struct WorkItemRunner {
  queue: Mutex<VecDeque<WorkItem>>,
  executing: AtomicBool,
}

impl WorkItemRunner {
  /// Creates an empty runner.
  pub fn new() -> Self {
    Self {
      queue: Mutex::new(VecDeque::new()),
      executing: AtomicBool::new(false),
    }
  }

  /// Enqueues an item. Callable from any thread, including while workers
  /// are running; execution waits for the next blocked window.
  pub fn add(&self, item: WorkItem) {
    self.queue.lock().unwrap().push_back(item);
  }

  /// True if any item is waiting.
  pub fn has_pending(&self) -> bool {
    !self.queue.lock().unwrap().is_empty()
  }

  /// Executes queued items in order. Only call while every receiver is
  /// blocked.
  ///
  /// Returns `Ok(true)` when the queue drained, `Ok(false)` when a
  /// resumable item yielded (it stays at the head for the next window).
  ///
  /// # Panics
  /// With `force`, an item that still reports incomplete is a fatal logic
  /// error and panics.
  pub fn process(&self, ctx: &mut WorkContext<'_>, force: bool) -> Result<bool, NestedExecution> {
    if self.executing.swap(true, Ordering::AcqRel) {
      log::error!("work item attempted to process work items recursively");
      return Err(NestedExecution);
    }

    loop {
      // The lock is not held across execution so items can enqueue more.
      let item = self.queue.lock().unwrap().pop_front();
      let Some(item) = item else {
        break;
      };

      match item {
        WorkItem::OneShot(run) => run(ctx),
        WorkItem::Resumable { mut init, mut step } => {
          if let Some(init) = init.take() {
            init(ctx);
          }
          let done = step(ctx, force);
          if !done {
            if force {
              self.executing.store(false, Ordering::Release);
              panic!("forced work item did not complete");
            }
            // Yield: the item keeps its place at the head of the queue.
            self
              .queue
              .lock()
              .unwrap()
              .push_front(WorkItem::Resumable { init: None, step });
            self.executing.store(false, Ordering::Release);
            return Ok(false);
          }
        }
      }
    }

    self.executing.store(false, Ordering::Release);
    Ok(true)
  }
}

impl Default for WorkItemRunner {
  fn default() -> Self {
    Self::new()
  }
}
