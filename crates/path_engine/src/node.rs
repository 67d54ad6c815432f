//! Node handles and their allocation.
//!
//! Graphs never hand out references to node storage. Every node is addressed
//! by a dense [`NodeIndex`] issued by the [`NodeIndexAllocator`], and the
//! [`NodeTable`] remembers which graph owns each live index. Per-worker
//! search scratch ([`crate::handler::PathHandler`]) is keyed by the same
//! index, which is why density matters: the allocator reuses destroyed
//! indices before growing the range.
//!
//! Allocation and destruction only happen while the path queue is blocked,
//! so no search can observe an index being recycled.

/// Dense handle for a graph node.
///
/// Index 0 is reserved as the "no node" sentinel; the allocator starts
/// issuing at 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub i32);

impl NodeIndex {
  /// The reserved sentinel ("no node").
  pub const NONE: NodeIndex = NodeIndex(0);

  /// Returns true if this is the reserved sentinel.
  #[inline]
  pub fn is_none(self) -> bool {
    self.0 == 0
  }

  /// The index as a table offset.
  #[inline]
  pub fn as_usize(self) -> usize {
    self.0 as usize
  }
}

/// Monotonic allocator of dense node indices with a LIFO free-list.
///
/// Destroyed indices are reused before the range grows, keeping the
/// per-worker scratch tables compact.
#[derive(Debug, Default)]
pub struct NodeIndexAllocator {
  /// Next never-issued index. Starts at 1; 0 is the sentinel.
  next: i32,
  /// Reclaimed indices, reused LIFO.
  free: Vec<NodeIndex>,
}

impl NodeIndexAllocator {
  /// Creates an empty allocator.
  pub fn new() -> Self {
    Self {
      next: 1,
      free: Vec::new(),
    }
  }

  /// Issues an index, preferring the free-list.
  pub fn allocate(&mut self) -> NodeIndex {
    if let Some(index) = self.free.pop() {
      return index;
    }
    let index = NodeIndex(self.next);
    self.next += 1;
    index
  }

  /// Returns an index to the free-list.
  ///
  /// # Panics
  /// Panics if `index` is the sentinel or was never issued.
  pub fn destroy(&mut self, index: NodeIndex) {
    assert!(!index.is_none(), "cannot destroy the sentinel node index");
    assert!(index.0 < self.next, "destroyed index was never issued");
    debug_assert!(
      !self.free.contains(&index),
      "double destroy of node index {}",
      index.0
    );
    self.free.push(index);
  }

  /// One past the highest index ever issued. Scratch tables sized to this
  /// can be indexed by any live `NodeIndex` without bounds failures.
  pub fn index_range(&self) -> usize {
    self.next as usize
  }

  /// Number of indices currently live (issued and not destroyed).
  pub fn live_count(&self) -> usize {
    (self.next as usize - 1) - self.free.len()
  }
}

/// Marker for an index with no owning graph.
pub const GRAPH_NONE: u8 = u8::MAX;

/// Allocator plus the index → owning-graph registry.
///
/// Graphs allocate their nodes through this table during scan and graph
/// updates; cross-graph queries use [`NodeTable::owner`] to dispatch an
/// index back to the graph that owns it.
#[derive(Debug, Default)]
pub struct NodeTable {
  alloc: NodeIndexAllocator,
  /// `owner[index]` is the owning graph, or [`GRAPH_NONE`] when free.
  owner: Vec<u8>,
}

impl NodeTable {
  /// Creates an empty table.
  pub fn new() -> Self {
    Self {
      alloc: NodeIndexAllocator::new(),
      owner: vec![GRAPH_NONE],
    }
  }

  /// Allocates an index owned by `graph`.
  pub fn allocate(&mut self, graph: u8) -> NodeIndex {
    let index = self.alloc.allocate();
    if index.as_usize() >= self.owner.len() {
      self.owner.resize(index.as_usize() + 1, GRAPH_NONE);
    }
    self.owner[index.as_usize()] = graph;
    index
  }

  /// Destroys an index, returning it to the free-list.
  pub fn destroy(&mut self, index: NodeIndex) {
    self.owner[index.as_usize()] = GRAPH_NONE;
    self.alloc.destroy(index);
  }

  /// The graph owning `index`, or `None` if the index is free.
  pub fn owner(&self, index: NodeIndex) -> Option<u8> {
    match self.owner.get(index.as_usize()) {
      Some(&GRAPH_NONE) | None => None,
      Some(&graph) => Some(graph),
    }
  }

  /// One past the highest index ever issued.
  pub fn index_range(&self) -> usize {
    self.alloc.index_range()
  }

  /// Number of live nodes across all graphs.
  pub fn live_count(&self) -> usize {
    self.alloc.live_count()
  }
}
