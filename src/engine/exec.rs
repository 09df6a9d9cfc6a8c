//! Execution pass.
//!
//! One pass walks the cached topological order and runs every pending
//! vertex exactly once:
//!
//! ```text
//! refresh order -> snapshot -> walk ─┬─> pending & not walked? run it
//!                                    └─> marked behind the cursor? next pass
//! ```
//!
//! Vertices created while the pass runs are not in the snapshot. When any
//! of them ends up pending, the order is rebuilt and the walk continues over
//! the vertices not visited yet.

use std::collections::HashSet;

use tracing::{debug, trace, warn};

use super::Engine;
use crate::types::{ActivationFlag, NodeId, VertexId};

impl Engine {
    /// Add a `producer -> consumer` ordering edge. Idempotent.
    ///
    /// Edges touching a destroyed node are refused with a warning.
    pub fn add_edge(&mut self, producer: NodeId, consumer: NodeId) {
        if let Some(stale) = [producer, consumer]
            .into_iter()
            .find(|id| !self.nodes.contains_key(*id))
        {
            warn!(?stale, "edge to a destroyed node ignored");
            return;
        }
        if self.graph.add_edge(producer, consumer) {
            self.sync_vertex(producer);
            self.sync_vertex(consumer);
        }
    }

    /// Remove a `producer -> consumer` edge. Removing a missing edge is a
    /// no-op.
    pub fn remove_edge(&mut self, producer: NodeId, consumer: NodeId) {
        self.graph.remove_edge(producer, consumer);
    }

    /// Order `action` after the structural node its parent depends on.
    ///
    /// Does nothing when the parent has no state dependency.
    pub fn add_state_dependency_edge(&mut self, action: NodeId) {
        let dependency = self.parent(action).and_then(|p| self.state_dependency(p));
        if let Some(dependency) = dependency {
            self.add_edge(dependency, action);
        }
    }

    pub fn remove_state_dependency_edge(&mut self, action: NodeId) {
        let dependency = self.parent(action).and_then(|p| self.state_dependency(p));
        if let Some(dependency) = dependency {
            self.remove_edge(dependency, action);
        }
    }

    fn sync_vertex(&mut self, id: NodeId) {
        let vertex = self.graph.vertex_of(id);
        if let Some(node) = self.nodes.get_mut(id) {
            node.vertex = vertex;
        }
    }

    /// Run one execution pass.
    pub fn exec(&mut self) {
        self.refresh_order();
        let mut order = self.graph.order_snapshot();
        let mut walked: HashSet<VertexId> = HashSet::with_capacity(order.len());
        debug!(
            pass = self.passes + 1,
            pending = self.graph.pending_count(),
            "execution pass start"
        );

        let mut executed = 0usize;
        loop {
            for &vertex in &order {
                if !walked.insert(vertex) {
                    continue;
                }
                if self.graph.take_pending(vertex) {
                    self.run_vertex(vertex);
                    executed += 1;
                }
            }
            // Only vertices missing from the snapshot can still be pending
            // without having been walked.
            let unseen = self.graph.pending().any(|v| !walked.contains(&v));
            if !unseen {
                break;
            }
            self.refresh_order();
            order = self.graph.order_snapshot();
        }

        self.passes += 1;
        debug!(
            pass = self.passes,
            executed,
            deferred = self.graph.pending_count(),
            "execution pass finished"
        );
    }

    fn refresh_order(&mut self) {
        let cyclic = self.graph.refresh_order();
        if !cyclic.is_empty() && self.config().warn_on_cycles {
            let names: Vec<String> = cyclic
                .iter()
                .filter_map(|v| self.graph.vertex(*v))
                .filter_map(|v| self.name(v.node()))
                .collect();
            warn!(?names, "dependency cycle, order broken at these vertices");
        }
    }

    fn run_vertex(&mut self, vertex: VertexId) {
        let Some(node) = self
            .graph
            .vertex(vertex)
            .filter(|v| v.is_alive())
            .map(|v| v.node())
        else {
            return;
        };
        let Some(slot) = self.nodes.get_mut(node) else {
            return;
        };
        // Read and clear first: a reaction may schedule this node again.
        let flag = std::mem::take(&mut slot.activation_flag);
        trace!(name = %slot.name, ?flag, "execute");
        match flag {
            ActivationFlag::Deactivation => self.deactivation(node),
            ActivationFlag::Activation | ActivationFlag::None => self.activation(node),
        }
    }
}
