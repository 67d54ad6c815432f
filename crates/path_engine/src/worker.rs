//! Search workers.
//!
//! One [`SearchWorker`] is the pop → prepare → initialize → step-slices →
//! complete state machine. A dedicated thread wraps it with a blocking pop
//! ([`run_worker_thread`]); the cooperative variant steps the same machine
//! from the host tick with a non-blocking pop and identical semantics.
//!
//! Workers re-read the engine's slice budget on every yield, so live tuning
//! applies mid-search. An unhandled panic inside a search terminates the
//! whole queue: every worker drains and exits, and the engine stops
//! accepting paths.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread;
use std::time::Duration;

use web_time::Instant;

use crate::error::PathError;
use crate::graph::{GraphSet, NearestParams};
use crate::handler::PathHandler;
use crate::hooks::HookRegistry;
use crate::path::{Path, PathState, SearchContext};
use crate::queue::PathQueue;
use crate::return_stack::ReturnStack;

/// State shared between the engine and every worker.
pub(crate) struct EngineShared {
  pub queue: Arc<PathQueue>,
  pub returns: Arc<ReturnStack>,
  pub graphs: Arc<RwLock<GraphSet>>,
  pub hooks: Arc<HookRegistry>,
  /// Per-slice search budget in nanoseconds. Read on every yield.
  pub slice_budget_nanos: AtomicU64,
  /// Engine-wide termination flag; searches short-circuit at the next
  /// slice boundary.
  pub terminating: AtomicBool,
  /// Nearest-query parameters handed to searches.
  pub nearest: NearestParams,
}

impl EngineShared {
  pub fn slice_budget(&self) -> Duration {
    Duration::from_nanos(self.slice_budget_nanos.load(Ordering::Acquire))
  }
}

/// How a worker pops from the queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PopMode {
  /// Park until a path, a block or termination arrives.
  Blocking,
  /// Return immediately; the caller (the host tick) retries later.
  Cooperative,
}

/// Result of one worker step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StepOutcome {
  /// Nothing to do (cooperative only; the worker reported itself blocked).
  Idle,
  /// A search is mid-flight and used up its slice.
  Yielded,
  /// A path completed and was pushed for return.
  Completed,
  /// The queue terminated; the worker must exit.
  Terminated,
}

struct InFlight {
  path: Arc<Path>,
  started: Instant,
}

/// The per-worker search execution state machine.
pub(crate) struct SearchWorker {
  index: usize,
  shared: Arc<EngineShared>,
  handler: Arc<Mutex<PathHandler>>,
  current: Option<InFlight>,
  /// Cooperative bookkeeping for [`PathQueue::pop_non_blocking`].
  reported_blocked: bool,
}

impl SearchWorker {
  pub fn new(index: usize, shared: Arc<EngineShared>, handler: Arc<Mutex<PathHandler>>) -> Self {
    Self {
      index,
      shared,
      handler,
      current: None,
      reported_blocked: false,
    }
  }

  pub fn index(&self) -> usize {
    self.index
  }

  pub fn shared(&self) -> &Arc<EngineShared> {
    &self.shared
  }

  /// Advances the machine: pops a path if idle, otherwise runs one slice of
  /// the in-flight search.
  pub fn step(&mut self, mode: PopMode) -> StepOutcome {
    if self.current.is_none() {
      let path = match mode {
        PopMode::Blocking => match self.shared.queue.pop_blocking() {
          Ok(path) => path,
          Err(_) => return StepOutcome::Terminated,
        },
        PopMode::Cooperative => match self.shared.queue.pop_non_blocking(self.reported_blocked) {
          Ok(Some(path)) => {
            self.reported_blocked = false;
            path
          }
          Ok(None) => {
            self.reported_blocked = true;
            return StepOutcome::Idle;
          }
          Err(_) => return StepOutcome::Terminated,
        },
      };
      self.begin(path);
    }
    self.run_slice()
  }

  /// Runs prepare (and, unless it short-circuited, initialize).
  fn begin(&mut self, path: Arc<Path>) {
    path.advance_state(PathState::Processing);
    self.shared.hooks.on_path_pre_search.fire(&path);
    let started = Instant::now();

    {
      let graphs = self.shared.graphs.read().unwrap();
      let mut handler = self.handler.lock().unwrap();
      let mut search = path.search();
      let mut ctx = SearchContext {
        graphs: &graphs,
        handler: &mut handler,
        path_id: path.id(),
        nearest: self.shared.nearest,
      };

      match search.prepare(&mut ctx) {
        Err(error) => path.fail(error),
        Ok(()) => {
          // A prepare that completed the search skips initialize entirely.
          if !search.is_done()
            && let Err(error) = search.initialize(&mut ctx)
          {
            path.fail(error);
          }
        }
      }
    }

    self.current = Some(InFlight { path, started });
  }

  fn run_slice(&mut self) -> StepOutcome {
    let path = self
      .current
      .as_ref()
      .expect("run_slice requires an in-flight path")
      .path
      .clone();

    if self.shared.terminating.load(Ordering::Acquire) || self.shared.queue.is_terminating() {
      path.fail(PathError::EngineTerminated);
      self.finish();
      return StepOutcome::Completed;
    }

    let mut finished = path.is_errored() || path.search().is_done();

    if !finished {
      // Re-read the budget every slice so live tuning applies.
      let deadline = Instant::now() + self.shared.slice_budget();
      let graphs = self.shared.graphs.read().unwrap();
      let mut handler = self.handler.lock().unwrap();
      let mut search = path.search();
      let mut ctx = SearchContext {
        graphs: &graphs,
        handler: &mut handler,
        path_id: path.id(),
        nearest: self.shared.nearest,
      };

      if let Err(error) = search.step(&mut ctx, deadline) {
        path.fail(error);
      }
      finished = search.is_done() || path.is_errored();
    }

    if finished {
      self.finish();
      StepOutcome::Completed
    } else {
      StepOutcome::Yielded
    }
  }

  /// Completion path: cleanup, duration, post-search hook, immediate
  /// callback, hand-off to the return pipeline.
  fn finish(&mut self) {
    let InFlight { path, started } = self.current.take().expect("finish requires an in-flight path");

    path.search().cleanup();
    path.set_duration(started.elapsed());
    self.shared.hooks.on_path_post_search.fire(&path);
    if let Some(callback) = path.take_immediate_callback() {
      callback(&path);
    }

    self.shared.returns.push(path.clone());
    path.advance_state(PathState::ReturnQueue);
  }

  /// Fails and returns the in-flight path without touching its (possibly
  /// poisoned) search payload. Used after a panic.
  fn abandon_current(&mut self) {
    if let Some(InFlight { path, started }) = self.current.take() {
      path.fail(PathError::Other("search panicked".to_string()));
      path.set_duration(started.elapsed());
      self.shared.returns.push(path.clone());
      path.advance_state(PathState::ReturnQueue);
    }
  }
}

/// Thread body for one parallel worker.
pub(crate) fn run_worker_thread(mut worker: SearchWorker) {
  loop {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.step(PopMode::Blocking)));
    match outcome {
      Ok(StepOutcome::Terminated) => break,
      Ok(StepOutcome::Completed) | Ok(StepOutcome::Idle) => {}
      Ok(StepOutcome::Yielded) => {
        // Give the scheduler a chance between slices of a long search.
        thread::yield_now();
      }
      Err(_) => {
        log::error!(
          "search worker {} panicked; terminating the path queue",
          worker.index()
        );
        worker.shared().queue.terminate();
        worker.abandon_current();
        break;
      }
    }
  }
}

/// The cooperative worker stepped by the host tick when no threads exist.
pub(crate) struct CooperativeWorker {
  worker: SearchWorker,
}

impl CooperativeWorker {
  pub fn new(worker: SearchWorker) -> Self {
    Self { worker }
  }

  /// Runs the machine for up to one slice budget, starting new paths as
  /// earlier ones complete within the budget.
  pub fn tick(&mut self) -> StepOutcome {
    let deadline = Instant::now() + self.worker.shared.slice_budget();
    loop {
      match self.worker.step(PopMode::Cooperative) {
        StepOutcome::Completed => {
          if Instant::now() >= deadline {
            return StepOutcome::Completed;
          }
        }
        outcome => return outcome,
      }
    }
  }
}
