//! Per-engine listener registries.
//!
//! Every hook is an engine-owned list rather than process-global state, so
//! two engines never observe each other's listeners. Firing snapshots the
//! list first, which makes registration from inside a listener (or from
//! another thread) safe. The search hooks run on worker threads; listeners
//! registered there must be reentrant.

use std::sync::{Arc, Mutex};

use crate::path::Path;

/// Scan progress report forwarded from a graph's scanner.
#[derive(Clone, Copy, Debug)]
pub struct ScanProgress {
  /// Graph being scanned.
  pub graph: u8,
  /// Completion fraction in [0, 1].
  pub progress: f32,
}

/// A list of listeners for one event.
pub struct HookList<T> {
  listeners: Mutex<Vec<Arc<dyn Fn(&T) + Send + Sync>>>,
}

impl<T> HookList<T> {
  fn new() -> Self {
    Self {
      listeners: Mutex::new(Vec::new()),
    }
  }

  /// Registers a listener.
  pub fn add(&self, listener: impl Fn(&T) + Send + Sync + 'static) {
    self.listeners.lock().unwrap().push(Arc::new(listener));
  }

  /// Fires every listener registered at the moment of the call.
  pub fn fire(&self, event: &T) {
    // Snapshot so listeners may register further listeners without
    // deadlocking, and concurrent registration never invalidates iteration.
    let snapshot: Vec<_> = self.listeners.lock().unwrap().clone();
    for listener in snapshot {
      listener(event);
    }
  }

  /// Drops every listener.
  pub fn clear(&self) {
    self.listeners.lock().unwrap().clear();
  }

  /// Number of registered listeners.
  pub fn len(&self) -> usize {
    self.listeners.lock().unwrap().len()
  }

  /// True when no listeners are registered.
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// All hooks exposed by one engine.
///
/// Threading per hook: scan/update hooks fire on the host thread inside
/// their documented phase; the path search hooks fire on workers.
pub struct HookRegistry {
  /// Host thread, once, during engine construction.
  pub on_awake_settings: HookList<()>,
  /// Host thread, before any graph scans.
  pub on_pre_scan: HookList<()>,
  /// Host thread, before one graph's scan. Payload is the graph index.
  pub on_graph_pre_scan: HookList<u8>,
  /// Host thread, after one graph's scan. Payload is the graph index.
  pub on_graph_post_scan: HookList<u8>,
  /// Host thread, progress from a graph's scanner.
  pub on_scan_progress: HookList<ScanProgress>,
  /// Host thread, after all scans but before flood fill.
  pub on_post_scan: HookList<()>,
  /// Host thread, after flood fill, last step of a scan.
  pub on_late_post_scan: HookList<()>,
  /// Worker thread, before a search runs. Listeners must be reentrant.
  pub on_path_pre_search: HookList<Arc<Path>>,
  /// Worker thread, after a search finishes. Listeners must be reentrant.
  pub on_path_post_search: HookList<Arc<Path>>,
  /// Host thread, after a graph-update flush completes.
  pub on_graphs_updated: HookList<()>,
  /// Host thread, one-shot: fired and cleared when path ids wrap.
  overflow_callback: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl HookRegistry {
  /// Creates an empty registry.
  pub fn new() -> Self {
    Self {
      on_awake_settings: HookList::new(),
      on_pre_scan: HookList::new(),
      on_graph_pre_scan: HookList::new(),
      on_graph_post_scan: HookList::new(),
      on_scan_progress: HookList::new(),
      on_post_scan: HookList::new(),
      on_late_post_scan: HookList::new(),
      on_path_pre_search: HookList::new(),
      on_path_post_search: HookList::new(),
      on_graphs_updated: HookList::new(),
      overflow_callback: Mutex::new(None),
    }
  }

  /// Installs the one-shot 65k-overflow callback, replacing any previous
  /// one. The callback is cleared when fired; subscribers re-register from
  /// inside it if they want the next wrap too.
  pub fn set_overflow_callback(&self, callback: impl FnOnce() + Send + 'static) {
    *self.overflow_callback.lock().unwrap() = Some(Box::new(callback));
  }

  /// Fires and clears the overflow callback. Returns whether one ran.
  pub fn fire_overflow(&self) -> bool {
    let callback = self.overflow_callback.lock().unwrap().take();
    match callback {
      Some(callback) => {
        callback();
        true
      }
      None => false,
    }
  }

  /// Drops every listener. Called during engine teardown.
  pub fn clear_all(&self) {
    self.on_awake_settings.clear();
    self.on_pre_scan.clear();
    self.on_graph_pre_scan.clear();
    self.on_graph_post_scan.clear();
    self.on_scan_progress.clear();
    self.on_post_scan.clear();
    self.on_late_post_scan.clear();
    self.on_path_pre_search.clear();
    self.on_path_post_search.clear();
    self.on_graphs_updated.clear();
    *self.overflow_callback.lock().unwrap() = None;
  }
}

impl Default for HookRegistry {
  fn default() -> Self {
    Self::new()
  }
}
