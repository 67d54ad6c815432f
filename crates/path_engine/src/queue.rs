//! The path queue and its control protocol.
//!
//! This queue is the *only* synchronization primitive between the host
//! thread and the search workers. It has three control states:
//!
//! - **open** — receivers pop paths FIFO (with a head-insert slot for
//!   priority pushes);
//! - **blocking** — receivers park instead of popping; once every receiver
//!   is parked the host owns a quiescent window and may mutate graph data;
//! - **terminating** — one-way; every parked receiver wakes with
//!   [`Terminated`] and exits.
//!
//! Graph mutation safety is derived entirely from
//! [`PathQueue::all_receivers_blocked`] being observable by the host.
//! Threaded receivers use [`PathQueue::pop_blocking`]; the cooperative
//! receiver uses [`PathQueue::pop_non_blocking`] and reports its own blocked
//! state through the `already_reported_blocked` argument.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::Terminated;
use crate::path::Path;

#[derive(Default)]
struct QueueState {
  items: VecDeque<Arc<Path>>,
  blocked: bool,
  terminating: bool,
  receiver_count: usize,
  blocked_receivers: usize,
}

/// Multi-producer multi-consumer queue of pending paths.
pub struct PathQueue {
  state: Mutex<QueueState>,
  signal: Condvar,
}

impl PathQueue {
  /// Creates a queue serving `receiver_count` receivers (threaded workers
  /// plus the cooperative worker, if any).
  pub fn new(receiver_count: usize) -> Self {
    Self {
      state: Mutex::new(QueueState {
        receiver_count,
        ..QueueState::default()
      }),
      signal: Condvar::new(),
    }
  }

  /// Appends a path. Fails once the queue is terminating.
  pub fn push(&self, path: Arc<Path>) -> Result<(), Terminated> {
    let mut state = self.state.lock().unwrap();
    if state.terminating {
      return Err(Terminated);
    }
    state.items.push_back(path);
    drop(state);
    self.signal.notify_one();
    Ok(())
  }

  /// Inserts a path at the head: one slot's worth of priority.
  pub fn push_front(&self, path: Arc<Path>) -> Result<(), Terminated> {
    let mut state = self.state.lock().unwrap();
    if state.terminating {
      return Err(Terminated);
    }
    state.items.push_front(path);
    drop(state);
    self.signal.notify_one();
    Ok(())
  }

  /// Pops a path, parking while the queue is empty or blocking.
  ///
  /// While parked the caller counts toward the blocked-receiver total. On
  /// termination every parked receiver wakes with `Err(Terminated)` and
  /// stays counted as blocked forever (it is expected to exit).
  pub fn pop_blocking(&self) -> Result<Arc<Path>, Terminated> {
    let mut state = self.state.lock().unwrap();
    loop {
      if state.terminating {
        state.blocked_receivers += 1;
        return Err(Terminated);
      }
      if !state.blocked
        && let Some(path) = state.items.pop_front()
      {
        return Ok(path);
      }
      state.blocked_receivers += 1;
      state = self.signal.wait(state).unwrap();
      state.blocked_receivers -= 1;
    }
  }

  /// Non-parking pop for the cooperative receiver.
  ///
  /// Returns `Ok(None)` while the queue is empty or blocking. The first
  /// such call must pass `already_reported_blocked = false` so the caller
  /// is counted as blocked; subsequent calls pass `true`. A successful pop
  /// clears the caller's blocked accounting.
  pub fn pop_non_blocking(
    &self,
    already_reported_blocked: bool,
  ) -> Result<Option<Arc<Path>>, Terminated> {
    let mut state = self.state.lock().unwrap();
    if state.terminating {
      if !already_reported_blocked {
        state.blocked_receivers += 1;
      }
      return Err(Terminated);
    }
    if state.blocked || state.items.is_empty() {
      if !already_reported_blocked {
        state.blocked_receivers += 1;
      }
      return Ok(None);
    }
    let path = state.items.pop_front().expect("checked non-empty");
    if already_reported_blocked {
      state.blocked_receivers -= 1;
    }
    Ok(Some(path))
  }

  /// Requests quiescence: receivers park on their next pop. Paths already
  /// being processed run to completion first.
  pub fn block(&self) {
    let mut state = self.state.lock().unwrap();
    state.blocked = true;
  }

  /// Ends the quiescent window and wakes every parked receiver.
  pub fn unblock(&self) {
    let mut state = self.state.lock().unwrap();
    state.blocked = false;
    drop(state);
    self.signal.notify_all();
  }

  /// True while quiescence is requested (whether or not it is reached yet).
  pub fn is_blocking(&self) -> bool {
    self.state.lock().unwrap().blocked
  }

  /// True iff every receiver is parked (or there are no receivers at all).
  ///
  /// This is the predicate the quiescent window is built on.
  pub fn all_receivers_blocked(&self) -> bool {
    let state = self.state.lock().unwrap();
    state.receiver_count == 0 || state.blocked_receivers >= state.receiver_count
  }

  /// Number of receivers this queue was built for.
  pub fn receiver_count(&self) -> usize {
    self.state.lock().unwrap().receiver_count
  }

  /// Marks the queue terminating and wakes every parked receiver. One-way.
  pub fn terminate(&self) {
    let mut state = self.state.lock().unwrap();
    state.terminating = true;
    drop(state);
    self.signal.notify_all();
  }

  /// True once [`PathQueue::terminate`] has been called.
  pub fn is_terminating(&self) -> bool {
    self.state.lock().unwrap().terminating
  }

  /// Removes and returns every queued path. Used during teardown to fail
  /// paths that never reached a worker.
  pub fn drain_remaining(&self) -> Vec<Arc<Path>> {
    let mut state = self.state.lock().unwrap();
    state.items.drain(..).collect()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;
  use std::thread;
  use std::time::Duration;

  use super::*;
  use crate::test_util::noop_path;

  /// Polls `predicate` for up to two seconds.
  fn eventually(predicate: impl Fn() -> bool) -> bool {
    for _ in 0..2000 {
      if predicate() {
        return true;
      }
      thread::sleep(Duration::from_millis(1));
    }
    false
  }

  #[test]
  fn fifo_with_head_insert_priority() {
    let queue = PathQueue::new(1);
    let (p1, p2, p3, p4) = (noop_path(), noop_path(), noop_path(), noop_path());

    queue.push(p1.clone()).unwrap();
    queue.push(p2.clone()).unwrap();
    queue.push_front(p3.clone()).unwrap();
    queue.push(p4.clone()).unwrap();

    let order: Vec<_> = (0..4)
      .map(|_| queue.pop_blocking().unwrap())
      .collect();
    assert!(Arc::ptr_eq(&order[0], &p3), "head-insert pops first");
    assert!(Arc::ptr_eq(&order[1], &p1));
    assert!(Arc::ptr_eq(&order[2], &p2));
    assert!(Arc::ptr_eq(&order[3], &p4));
  }

  #[test]
  fn parked_receivers_are_counted_blocked() {
    let queue = Arc::new(PathQueue::new(2));
    let mut receivers = Vec::new();
    for _ in 0..2 {
      let queue = queue.clone();
      receivers.push(thread::spawn(move || queue.pop_blocking()));
    }

    assert!(
      eventually(|| queue.all_receivers_blocked()),
      "both receivers should park on the empty queue"
    );

    queue.terminate();
    for receiver in receivers {
      assert_eq!(receiver.join().unwrap(), Err(Terminated));
    }
  }

  #[test]
  fn blocking_withholds_available_paths() {
    let queue = Arc::new(PathQueue::new(1));
    queue.push(noop_path()).unwrap();
    queue.block();

    let popper = {
      let queue = queue.clone();
      thread::spawn(move || queue.pop_blocking())
    };

    assert!(
      eventually(|| queue.all_receivers_blocked()),
      "receiver must park even though a path is queued"
    );

    queue.unblock();
    assert!(popper.join().unwrap().is_ok(), "unblock hands the path over");
  }

  #[test]
  fn cooperative_blocked_reporting() {
    let queue = PathQueue::new(1);

    // First empty pop reports the block; later ones must not double-count.
    assert_eq!(queue.pop_non_blocking(false).unwrap(), None);
    assert!(queue.all_receivers_blocked());
    assert_eq!(queue.pop_non_blocking(true).unwrap(), None);
    assert!(queue.all_receivers_blocked());

    queue.push(noop_path()).unwrap();
    let popped = queue.pop_non_blocking(true).unwrap();
    assert!(popped.is_some());
    assert!(!queue.all_receivers_blocked(), "successful pop clears the report");
  }

  #[test]
  fn terminate_is_one_way() {
    let queue = PathQueue::new(1);
    queue.push(noop_path()).unwrap();
    queue.terminate();

    assert_eq!(queue.push(noop_path()), Err(Terminated));
    assert_eq!(queue.push_front(noop_path()), Err(Terminated));
    assert_eq!(queue.pop_blocking().map(|_| ()), Err(Terminated));
    assert_eq!(queue.drain_remaining().len(), 1, "queued paths drain for teardown");
  }
}
