//! Activation state machine.
//!
//! `activation = pre_activate; activate; post_activate`, and symmetrically
//! for deactivation. The `pre_*` guards make both idempotent: activating an
//! activated (or activating) node does nothing, so its couplings are
//! notified once per real transition.

use std::thread;

use tracing::{trace, warn};

use super::{Body, Engine};
use crate::process::{Lifecycle, Process};
use crate::types::{ActivationFlag, ActivationState, CouplingId, EventKind, NodeFlags, NodeId};

impl Engine {
    /// Activate a node: guard, subtype effect, then notify its couplings.
    pub fn activation(&mut self, id: NodeId) {
        if self.pre_activate(id) {
            self.activate(id);
            self.post_activate(id);
        }
    }

    /// Deactivate a node: guard, subtype effect, then notify its couplings.
    pub fn deactivation(&mut self, id: NodeId) {
        if self.pre_deactivate(id) {
            self.deactivate(id);
            self.post_deactivate(id);
        }
    }

    /// Whether a property change may propagate: no parent, or an activated
    /// parent.
    pub fn is_activable(&self, id: NodeId) -> bool {
        match self.nodes.get(id) {
            Some(node) => match node.parent {
                None => true,
                Some(parent) => self.state(parent) == ActivationState::Activated,
            },
            None => false,
        }
    }

    // =========================================================================
    // Guards
    // =========================================================================

    /// No activation if:
    /// 1. already activated or activating
    /// 2. the node is not a model node and its parent is neither activating
    ///    nor activated
    fn pre_activate(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(id) else {
            warn!(?id, "activation of a destroyed node");
            return false;
        };
        if node.state != ActivationState::Deactivated {
            return false;
        }
        if !node.flags.contains(NodeFlags::MODEL) {
            if let Some(parent) = node.parent {
                if !self.state(parent).is_live() {
                    return false;
                }
            }
        }
        self.nodes[id].state = ActivationState::Activating;
        true
    }

    fn post_activate(&mut self, id: NodeId) {
        self.notify_activation(id);
        let Some(node) = self.nodes.get_mut(id) else {
            return;
        };
        // The effect may already have moved the node on (a timer that
        // ended, a process that deactivated itself).
        if node.state == ActivationState::Activating {
            node.state = match node.lifecycle() {
                Lifecycle::Persistent => ActivationState::Activated,
                Lifecycle::Transient => ActivationState::Deactivated,
            };
        }
    }

    fn pre_deactivate(&mut self, id: NodeId) -> bool {
        match self.nodes.get_mut(id) {
            Some(node) if node.state == ActivationState::Activated => {
                node.state = ActivationState::Deactivating;
                true
            }
            Some(_) => false,
            None => {
                warn!(?id, "deactivation of a destroyed node");
                false
            }
        }
    }

    fn post_deactivate(&mut self, id: NodeId) {
        self.notify_deactivation(id);
        if let Some(node) = self.nodes.get_mut(id) {
            node.state = ActivationState::Deactivated;
            node.activation_flag = ActivationFlag::None;
        }
    }

    // =========================================================================
    // Effects
    // =========================================================================

    fn activate(&mut self, id: NodeId) {
        match self.nodes.get(id).map(|node| &node.body) {
            Some(Body::Container) => {
                for child in self.owned_children(id) {
                    self.activation(child);
                }
            }
            Some(Body::Process(_)) => self.run_process(id, EventKind::Activation),
            _ => {}
        }
    }

    fn deactivate(&mut self, id: NodeId) {
        match self.nodes.get(id).map(|node| &node.body) {
            Some(Body::Container) => {
                for child in self.owned_children(id).into_iter().rev() {
                    self.deactivation(child);
                }
            }
            Some(Body::Process(_)) => self.run_process(id, EventKind::Deactivation),
            _ => {}
        }
    }

    /// Lend the engine to a process for one effect.
    fn run_process(&mut self, id: NodeId, kind: EventKind) {
        let Some(Body::Process(slot)) = self.nodes.get_mut(id).map(|node| &mut node.body) else {
            return;
        };
        let Some(process) = slot.take() else {
            warn!(?id, "process re-entered while running");
            return;
        };
        let mut lent = Lent {
            engine: self,
            id,
            process: Some(process),
        };
        lent.run(kind);
    }

    // =========================================================================
    // Notification
    // =========================================================================

    /// Fire the node's activation couplings, in registration order.
    ///
    /// Iterates a snapshot of the list: couplings registered or removed by
    /// the notification itself do not affect it.
    pub fn notify_activation(&mut self, id: NodeId) {
        let snapshot = self.coupling_snapshot(id, EventKind::Activation);
        self.fire_all(id, &snapshot);
    }

    /// Fire the node's deactivation couplings, in registration order.
    pub fn notify_deactivation(&mut self, id: NodeId) {
        let snapshot = self.coupling_snapshot(id, EventKind::Deactivation);
        self.fire_all(id, &snapshot);
    }

    fn coupling_snapshot(&self, id: NodeId, kind: EventKind) -> Vec<CouplingId> {
        self.nodes
            .get(id)
            .map(|node| match kind {
                EventKind::Activation => node.activation_couplings.clone(),
                EventKind::Deactivation => node.deactivation_couplings.clone(),
            })
            .unwrap_or_default()
    }

    fn fire_all(&mut self, id: NodeId, snapshot: &[CouplingId]) {
        if !snapshot.is_empty() {
            trace!(?id, couplings = snapshot.len(), "notify");
        }
        for coupling in snapshot {
            self.fire_coupling(*coupling);
        }
    }
}

// =============================================================================
// Lent process
// =============================================================================

/// A process taken out of its slot for the duration of one effect.
///
/// Dropping it puts the process back, on unwinding too. A node whose effect
/// panicked mid-transition falls back to `Deactivated`, so it can be
/// activated again.
struct Lent<'a> {
    engine: &'a mut Engine,
    id: NodeId,
    process: Option<Box<dyn Process>>,
}

impl Lent<'_> {
    fn run(&mut self, kind: EventKind) {
        let Some(process) = self.process.as_mut() else {
            return;
        };
        match kind {
            EventKind::Activation => process.activate(self.engine, self.id),
            EventKind::Deactivation => process.deactivate(self.engine, self.id),
        }
    }
}

impl Drop for Lent<'_> {
    fn drop(&mut self) {
        // Destroyed from inside its own effect: the process goes with it.
        let Some(node) = self.engine.nodes.get_mut(self.id) else {
            return;
        };
        if let Some(process) = self.process.take() {
            node.body = Body::Process(Some(process));
        }
        let in_transition = matches!(
            node.state,
            ActivationState::Activating | ActivationState::Deactivating
        );
        if thread::panicking() && in_transition {
            warn!(name = %node.name, state = ?node.state, "process effect panicked, node reset");
            node.state = ActivationState::Deactivated;
            node.activation_flag = ActivationFlag::None;
        }
    }
}
