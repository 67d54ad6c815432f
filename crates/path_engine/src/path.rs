//! Paths: the unit of work handed to the engine.
//!
//! A [`Path`] is shared between the requester and the engine behind an
//! `Arc`. The engine side drives it through a strictly forward state
//! machine:
//!
//! ```text
//! Created → Queued → Processing → ReturnQueue → Returned
//! ```
//!
//! The actual search algorithm is an opaque payload behind the
//! [`PathSearch`] trait; the engine only prepares, steps and completes it.
//! Search failures are recorded on the path and the path still completes
//! normally, so the requester's callback fires exactly once either way.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use web_time::Instant;

use crate::error::PathError;
use crate::graph::{GraphSet, NearestParams};
use crate::handler::PathHandler;

/// Lifecycle state of a path. Transitions strictly increase.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum PathState {
  /// Constructed, not yet handed to the engine.
  Created = 0,
  /// Accepted by `start_path` and sitting in the path queue.
  Queued = 1,
  /// Popped by a worker; the search is running.
  Processing = 2,
  /// Search finished; waiting on the return pipeline.
  ReturnQueue = 3,
  /// Callback fired; the engine holds no further interest.
  Returned = 4,
}

impl PathState {
  fn from_u8(value: u8) -> PathState {
    match value {
      0 => PathState::Created,
      1 => PathState::Queued,
      2 => PathState::Processing,
      3 => PathState::ReturnQueue,
      _ => PathState::Returned,
    }
  }
}

/// Callback invoked exactly once when a path completes.
pub type PathCallback = Box<dyn FnOnce(&Path) + Send>;

/// Everything a search payload may touch while it runs.
///
/// Borrowed read-only graph data, the owning worker's scratch handler, the
/// path's visit-marker id and the engine's nearest-query parameters.
pub struct SearchContext<'a> {
  /// Graph data, stable for the duration of the borrow.
  pub graphs: &'a GraphSet,
  /// The executing worker's scratch memory.
  pub handler: &'a mut PathHandler,
  /// Id stamped on every node state this search touches.
  pub path_id: u16,
  /// Nearest-node query parameters from the engine configuration.
  pub nearest: NearestParams,
}

/// The opaque search payload carried by a [`Path`].
///
/// Implementations run entirely on a worker; they see graph data only
/// through the [`SearchContext`] borrow, which the worker re-establishes for
/// every slice, so payloads must keep per-search state in `self` (or in the
/// handler, stamped with `path_id`).
pub trait PathSearch: Send {
  /// Resolves endpoints and validates the request. May complete the search
  /// immediately (report done from [`PathSearch::is_done`]), in which case
  /// [`PathSearch::initialize`] is skipped.
  fn prepare(&mut self, ctx: &mut SearchContext<'_>) -> Result<(), PathError>;

  /// Seeds the search (open list etc.). Called once, after a `prepare` that
  /// did not complete the search.
  fn initialize(&mut self, ctx: &mut SearchContext<'_>) -> Result<(), PathError>;

  /// Runs search iterations until done or `deadline` passes.
  fn step(&mut self, ctx: &mut SearchContext<'_>, deadline: Instant) -> Result<(), PathError>;

  /// True once the search has finished (found, failed or short-circuited).
  fn is_done(&self) -> bool;

  /// Releases per-search resources. Called on the worker after the search
  /// finishes, before the path is pushed for return.
  fn cleanup(&mut self) {}

  /// Downcasting access for requesters reading results back.
  fn as_any(&self) -> &dyn Any;
}

/// A path request shared between requester and engine.
pub struct Path {
  /// Rolling 16-bit id, assigned by `start_path`. 0 until assigned.
  id: AtomicU16,
  /// Current [`PathState`], advanced monotonically.
  state: AtomicU8,
  /// Fast error flag; the detail lives in `error`.
  errored: AtomicBool,
  error: Mutex<Option<PathError>>,
  /// Wall-clock search duration in microseconds, measured worker-side.
  duration_micros: AtomicU64,
  callback: Mutex<Option<PathCallback>>,
  /// Fired on the calculating worker immediately after the search finishes,
  /// before the path enters the return pipeline. Must be reentrant-safe.
  immediate_callback: Mutex<Option<PathCallback>>,
  search: Mutex<Box<dyn PathSearch>>,
}

impl std::fmt::Debug for Path {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Path").field("id", &self.id()).finish()
  }
}

impl PartialEq for Path {
  fn eq(&self, other: &Self) -> bool {
    std::ptr::eq(self, other)
  }
}

impl Path {
  /// Creates a path around a search payload.
  pub fn new(search: impl PathSearch + 'static) -> Arc<Path> {
    Arc::new(Path {
      id: AtomicU16::new(0),
      state: AtomicU8::new(PathState::Created as u8),
      errored: AtomicBool::new(false),
      error: Mutex::new(None),
      duration_micros: AtomicU64::new(0),
      callback: Mutex::new(None),
      immediate_callback: Mutex::new(None),
      search: Mutex::new(Box::new(search)),
    })
  }

  /// Creates a path with a completion callback.
  pub fn with_callback(
    search: impl PathSearch + 'static,
    callback: impl FnOnce(&Path) + Send + 'static,
  ) -> Arc<Path> {
    let path = Path::new(search);
    path.set_callback(Box::new(callback));
    path
  }

  /// Sets the completion callback. Replaces any previous one.
  pub fn set_callback(&self, callback: PathCallback) {
    *self.callback.lock().unwrap() = Some(callback);
  }

  /// Sets the worker-side immediate callback.
  pub fn set_immediate_callback(&self, callback: PathCallback) {
    *self.immediate_callback.lock().unwrap() = Some(callback);
  }

  /// The assigned path id, or 0 before `start_path`.
  pub fn id(&self) -> u16 {
    self.id.load(Ordering::Acquire)
  }

  pub(crate) fn assign_id(&self, id: u16) {
    self.id.store(id, Ordering::Release);
  }

  /// Current lifecycle state.
  pub fn state(&self) -> PathState {
    PathState::from_u8(self.state.load(Ordering::Acquire))
  }

  /// Advances the state machine. Backward transitions are ignored, so the
  /// observable chain is always monotonic.
  pub(crate) fn advance_state(&self, to: PathState) {
    self.state.fetch_max(to as u8, Ordering::AcqRel);
  }

  /// True if the search recorded an error.
  pub fn is_errored(&self) -> bool {
    self.errored.load(Ordering::Acquire)
  }

  /// The recorded error, if any.
  pub fn error(&self) -> Option<PathError> {
    self.error.lock().unwrap().clone()
  }

  /// Records a search failure. The first error wins.
  pub(crate) fn fail(&self, error: PathError) {
    let mut slot = self.error.lock().unwrap();
    if slot.is_none() {
      *slot = Some(error);
    }
    self.errored.store(true, Ordering::Release);
  }

  /// Wall-clock duration of the search, as measured on the worker.
  pub fn duration(&self) -> Duration {
    Duration::from_micros(self.duration_micros.load(Ordering::Acquire))
  }

  pub(crate) fn set_duration(&self, duration: Duration) {
    self
      .duration_micros
      .store(duration.as_micros() as u64, Ordering::Release);
  }

  /// Locked access to the search payload.
  ///
  /// Uncontended in practice: the worker holds it while processing, the
  /// requester only after `Returned`. A payload poisoned by a worker panic
  /// is still readable; the path carries the error.
  pub fn search(&self) -> MutexGuard<'_, Box<dyn PathSearch>> {
    self
      .search
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  /// Reads the search payload back as a concrete type.
  ///
  /// Returns `None` if the payload is of a different type.
  pub fn result<T: 'static, R>(&self, read: impl FnOnce(&T) -> R) -> Option<R> {
    let guard = self.search();
    guard.as_any().downcast_ref::<T>().map(read)
  }

  pub(crate) fn take_callback(&self) -> Option<PathCallback> {
    self.callback.lock().unwrap().take()
  }

  pub(crate) fn take_immediate_callback(&self) -> Option<PathCallback> {
    self.immediate_callback.lock().unwrap().take()
  }
}

/// Rolling 16-bit path id source.
///
/// Ids run 1..=65535; 0 is reserved as the "never visited" marker in the
/// per-node scratch tables, which is also why the id is 16 bits: one id is
/// stored per node per handler. On wrap the caller is told so it can fire
/// the overflow hook and enqueue the visit-marker reset work item.
#[derive(Debug)]
pub struct PathIdGenerator {
  next: u16,
}

impl PathIdGenerator {
  /// Creates a generator whose first id is 1.
  pub fn new() -> Self {
    Self { next: 1 }
  }

  /// Issues the next id. The boolean is true when the id space wrapped on
  /// this call (the returned id restarts at 1).
  pub fn next_id(&mut self) -> (u16, bool) {
    let mut wrapped = false;
    if self.next == 0 {
      // Skip the reserved sentinel; this is the wrap moment.
      self.next = 1;
      wrapped = true;
    }
    let id = self.next;
    self.next = self.next.wrapping_add(1);
    (id, wrapped)
  }
}

impl Default for PathIdGenerator {
  fn default() -> Self {
    Self::new()
  }
}
