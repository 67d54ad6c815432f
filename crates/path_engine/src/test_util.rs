//! Scripted search payloads shared by the unit tests.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use web_time::Instant;

use crate::error::PathError;
use crate::path::{Path, PathSearch, SearchContext};

/// Search that completes during prepare (the short-circuit case).
pub(crate) struct NoopSearch;

impl PathSearch for NoopSearch {
  fn prepare(&mut self, _: &mut SearchContext<'_>) -> Result<(), PathError> {
    Ok(())
  }
  fn initialize(&mut self, _: &mut SearchContext<'_>) -> Result<(), PathError> {
    Ok(())
  }
  fn step(&mut self, _: &mut SearchContext<'_>, _: Instant) -> Result<(), PathError> {
    Ok(())
  }
  fn is_done(&self) -> bool {
    true
  }
  fn as_any(&self) -> &dyn Any {
    self
  }
}

/// Search that needs a fixed number of step calls, optionally sleeping in
/// each to emulate a long-running search.
pub(crate) struct CountdownSearch {
  pub remaining: u32,
  pub sleep_per_step: Duration,
  initialized: bool,
}

impl CountdownSearch {
  pub fn new(steps: u32, sleep_per_step: Duration) -> Self {
    Self {
      remaining: steps,
      sleep_per_step,
      initialized: false,
    }
  }
}

impl PathSearch for CountdownSearch {
  fn prepare(&mut self, _: &mut SearchContext<'_>) -> Result<(), PathError> {
    Ok(())
  }
  fn initialize(&mut self, _: &mut SearchContext<'_>) -> Result<(), PathError> {
    self.initialized = true;
    Ok(())
  }
  fn step(&mut self, _: &mut SearchContext<'_>, _: Instant) -> Result<(), PathError> {
    assert!(self.initialized, "step before initialize");
    if !self.sleep_per_step.is_zero() {
      std::thread::sleep(self.sleep_per_step);
    }
    self.remaining = self.remaining.saturating_sub(1);
    Ok(())
  }
  fn is_done(&self) -> bool {
    self.remaining == 0
  }
  fn as_any(&self) -> &dyn Any {
    self
  }
}

/// Search whose prepare fails.
pub(crate) struct PrepareFailSearch;

impl PathSearch for PrepareFailSearch {
  fn prepare(&mut self, _: &mut SearchContext<'_>) -> Result<(), PathError> {
    Err(PathError::NoStartNode)
  }
  fn initialize(&mut self, _: &mut SearchContext<'_>) -> Result<(), PathError> {
    unreachable!("initialize must be skipped after a failed prepare")
  }
  fn step(&mut self, _: &mut SearchContext<'_>, _: Instant) -> Result<(), PathError> {
    unreachable!("step must be skipped after a failed prepare")
  }
  fn is_done(&self) -> bool {
    true
  }
  fn as_any(&self) -> &dyn Any {
    self
  }
}

/// Search that panics mid-step, for the fatal-worker-error path.
pub(crate) struct PanicSearch;

impl PathSearch for PanicSearch {
  fn prepare(&mut self, _: &mut SearchContext<'_>) -> Result<(), PathError> {
    Ok(())
  }
  fn initialize(&mut self, _: &mut SearchContext<'_>) -> Result<(), PathError> {
    Ok(())
  }
  fn step(&mut self, _: &mut SearchContext<'_>, _: Instant) -> Result<(), PathError> {
    panic!("scripted search panic");
  }
  fn is_done(&self) -> bool {
    false
  }
  fn as_any(&self) -> &dyn Any {
    self
  }
}

pub(crate) fn noop_path() -> Arc<Path> {
  Path::new(NoopSearch)
}

pub(crate) fn noop_path_with_callback(callback: impl FnOnce(&Path) + Send + 'static) -> Arc<Path> {
  Path::with_callback(NoopSearch, callback)
}
