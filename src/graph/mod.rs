//! Dependency Graph - execution-order edges between nodes.
//!
//! The graph is a scheduling structure only. It does not own nodes: each
//! vertex remembers the node it stands for, and a vertex whose node has been
//! destroyed is invalidated (kept inert until its last edge is removed)
//! rather than dereferenced.
//!
//! # Responsibilities
//!
//! - Idempotent edge insertion/removal (`producer -> consumer`)
//! - Cached topological order, rebuilt lazily after any topology change
//! - The pending set: vertices scheduled for the next execution pass
//!
//! The pass itself lives in [`Engine::exec`](crate::Engine::exec) because
//! running a vertex needs the whole engine.

mod order;

use std::collections::HashMap;

use indexmap::IndexSet;
use slotmap::SlotMap;

use crate::types::{NodeId, VertexId};

pub(crate) use order::topological_order;

// =============================================================================
// Vertex
// =============================================================================

/// A graph vertex standing for one node.
#[derive(Debug)]
pub struct Vertex {
    pub(crate) node: NodeId,
    pub(crate) alive: bool,
    pub(crate) successors: IndexSet<VertexId>,
    pub(crate) predecessors: IndexSet<VertexId>,
}

impl Vertex {
    fn new(node: NodeId) -> Self {
        Self {
            node,
            alive: true,
            successors: IndexSet::new(),
            predecessors: IndexSet::new(),
        }
    }

    /// The node this vertex stands for. Only meaningful while alive.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    fn is_isolated(&self) -> bool {
        self.successors.is_empty() && self.predecessors.is_empty()
    }
}

// =============================================================================
// Graph
// =============================================================================

/// The registry of execution-order edges.
#[derive(Debug, Default)]
pub struct Graph {
    vertices: SlotMap<VertexId, Vertex>,
    by_node: HashMap<NodeId, VertexId>,
    /// Cached order; `None` when stale.
    order: Option<Vec<VertexId>>,
    pending: IndexSet<VertexId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vertex standing for `node`, if one was created.
    pub fn vertex_of(&self, node: NodeId) -> Option<VertexId> {
        self.by_node.get(&node).copied()
    }

    pub fn vertex(&self, id: VertexId) -> Option<&Vertex> {
        self.vertices.get(id)
    }

    /// Get or create the vertex standing for `node`.
    pub(crate) fn vertex_for(&mut self, node: NodeId) -> VertexId {
        if let Some(&id) = self.by_node.get(&node) {
            return id;
        }
        let id = self.vertices.insert(Vertex::new(node));
        self.by_node.insert(node, id);
        self.order = None;
        id
    }

    /// Add `producer -> consumer`. Returns false if the edge already existed.
    pub(crate) fn add_edge(&mut self, producer: NodeId, consumer: NodeId) -> bool {
        let from = self.vertex_for(producer);
        let to = self.vertex_for(consumer);
        if !self.vertices[from].successors.insert(to) {
            return false;
        }
        self.vertices[to].predecessors.insert(from);
        self.order = None;
        true
    }

    /// Remove `producer -> consumer`. Removing a missing edge is a no-op.
    pub(crate) fn remove_edge(&mut self, producer: NodeId, consumer: NodeId) -> bool {
        let (Some(from), Some(to)) = (self.vertex_of(producer), self.vertex_of(consumer)) else {
            return false;
        };
        if !self.vertices[from].successors.shift_remove(&to) {
            return false;
        }
        self.vertices[to].predecessors.shift_remove(&from);
        self.order = None;
        self.collect(from);
        self.collect(to);
        true
    }

    pub fn has_edge(&self, producer: NodeId, consumer: NodeId) -> bool {
        match (self.vertex_of(producer), self.vertex_of(consumer)) {
            (Some(from), Some(to)) => self.vertices[from].successors.contains(&to),
            _ => false,
        }
    }

    /// Mark the vertex inert: its node is gone.
    ///
    /// Edges stay until their owners remove them; until then the vertex is
    /// skipped by ordering and execution.
    pub(crate) fn invalidate(&mut self, id: VertexId) {
        let Some(vertex) = self.vertices.get_mut(id) else {
            return;
        };
        vertex.alive = false;
        self.pending.shift_remove(&id);
        self.order = None;
        self.collect(id);
    }

    /// Drop a dead vertex once nothing references it any more.
    fn collect(&mut self, id: VertexId) {
        let removable = self
            .vertices
            .get(id)
            .is_some_and(|v| !v.alive && v.is_isolated());
        if removable {
            if let Some(vertex) = self.vertices.remove(id) {
                self.by_node.remove(&vertex.node);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Pending set
    // -------------------------------------------------------------------------

    /// Schedule a vertex for execution. Returns false if it was already pending.
    pub(crate) fn schedule(&mut self, id: VertexId) -> bool {
        self.pending.insert(id)
    }

    /// Consume the pending mark of a vertex.
    pub(crate) fn take_pending(&mut self, id: VertexId) -> bool {
        self.pending.shift_remove(&id)
    }

    pub fn is_pending(&self, id: VertexId) -> bool {
        self.pending.contains(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn pending(&self) -> impl Iterator<Item = VertexId> + '_ {
        self.pending.iter().copied()
    }

    // -------------------------------------------------------------------------
    // Ordering
    // -------------------------------------------------------------------------

    pub fn is_order_stale(&self) -> bool {
        self.order.is_none()
    }

    /// The cached order, rebuilt first if stale.
    ///
    /// Returns the cycle members the order was broken at, if a rebuild
    /// happened.
    pub(crate) fn refresh_order(&mut self) -> Vec<VertexId> {
        if self.order.is_some() {
            return Vec::new();
        }
        let ordering = topological_order(&self.vertices);
        self.order = Some(ordering.order);
        ordering.cyclic
    }

    /// Snapshot of the current order (empty if stale).
    pub(crate) fn order_snapshot(&self) -> Vec<VertexId> {
        self.order.clone().unwrap_or_default()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.vertices.values().map(|v| v.successors.len()).sum()
    }

    /// Consumers of `node`, in insertion order.
    pub fn successors(&self, node: NodeId) -> Vec<NodeId> {
        self.vertex_of(node)
            .map(|id| {
                self.vertices[id]
                    .successors
                    .iter()
                    .map(|succ| self.vertices[*succ].node)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    fn node_ids(n: usize) -> Vec<NodeId> {
        let mut arena: SlotMap<NodeId, ()> = SlotMap::with_key();
        (0..n).map(|_| arena.insert(())).collect()
    }

    #[test]
    fn test_add_edge_is_idempotent() {
        let ids = node_ids(2);
        let mut graph = Graph::new();

        assert!(graph.add_edge(ids[0], ids[1]));
        graph.refresh_order();
        assert!(!graph.is_order_stale());

        assert!(!graph.add_edge(ids[0], ids[1]));
        assert!(!graph.is_order_stale());
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.vertex_count(), 2);
    }

    #[test]
    fn test_remove_missing_edge_is_noop() {
        let ids = node_ids(3);
        let mut graph = Graph::new();
        graph.add_edge(ids[0], ids[1]);
        graph.refresh_order();

        assert!(!graph.remove_edge(ids[1], ids[0]));
        assert!(!graph.remove_edge(ids[0], ids[2]));
        assert!(!graph.is_order_stale());

        assert!(graph.remove_edge(ids[0], ids[1]));
        assert!(graph.is_order_stale());
        assert!(!graph.remove_edge(ids[0], ids[1]));
    }

    #[test]
    fn test_invalidated_vertex_is_collected_after_last_edge() {
        let ids = node_ids(2);
        let mut graph = Graph::new();
        graph.add_edge(ids[0], ids[1]);

        let consumer = graph.vertex_of(ids[1]).unwrap();
        graph.invalidate(consumer);
        assert!(!graph.vertex(consumer).unwrap().is_alive());
        assert_eq!(graph.vertex_count(), 2);

        graph.refresh_order();
        assert_eq!(graph.order_snapshot().len(), 1);

        // The owner removes the stale edge later; the vertex disappears.
        assert!(graph.remove_edge(ids[0], ids[1]));
        assert!(graph.vertex(consumer).is_none());
        assert!(graph.vertex_of(ids[1]).is_none());
    }

    #[test]
    fn test_pending_is_coalesced() {
        let ids = node_ids(1);
        let mut graph = Graph::new();
        let v = graph.vertex_for(ids[0]);

        assert!(graph.schedule(v));
        assert!(!graph.schedule(v));
        assert_eq!(graph.pending_count(), 1);
        assert!(graph.take_pending(v));
        assert!(!graph.take_pending(v));
    }

    #[test]
    fn test_successors_in_insertion_order() {
        let ids = node_ids(3);
        let mut graph = Graph::new();
        graph.add_edge(ids[0], ids[2]);
        graph.add_edge(ids[0], ids[1]);
        assert_eq!(graph.successors(ids[0]), vec![ids[2], ids[1]]);
        assert!(graph.has_edge(ids[0], ids[1]));
        assert!(!graph.has_edge(ids[1], ids[0]));
    }
}
