//! Couplings - enable/disable-able bindings from one node's event to
//! another node's reaction.
//!
//! A coupling never runs its destination directly. Firing marks the
//! destination pending in the graph with the configured event kind; the
//! execution pass runs it once, in topological position.

use tracing::{debug, trace, warn};

use super::Engine;
use crate::error::{Error, Result};
use crate::types::{ActivationFlag, CouplingId, EventKind, NodeId};

/// A registered coupling.
#[derive(Clone, Debug)]
pub struct Coupling {
    pub(crate) src: NodeId,
    pub(crate) src_event: EventKind,
    pub(crate) dst: NodeId,
    pub(crate) dst_event: EventKind,
    pub(crate) enabled: bool,
    /// `(from, to)` properties copied before the destination is scheduled.
    pub(crate) copy: Option<(NodeId, NodeId)>,
    pub(crate) copy_enabled: bool,
    pub(crate) data: Option<NodeId>,
}

impl Coupling {
    pub fn source(&self) -> NodeId {
        self.src
    }

    pub fn source_event(&self) -> EventKind {
        self.src_event
    }

    pub fn destination(&self) -> NodeId {
        self.dst
    }

    pub fn destination_event(&self) -> EventKind {
        self.dst_event
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Engine {
    /// Register a coupling at the end of `src`'s list for `src_event`.
    pub fn add_coupling(
        &mut self,
        src: NodeId,
        src_event: EventKind,
        dst: NodeId,
        dst_event: EventKind,
    ) -> Result<CouplingId> {
        if !self.nodes.contains_key(dst) {
            return Err(Error::StaleNode(dst));
        }
        let source = self.nodes.get_mut(src).ok_or(Error::StaleNode(src))?;
        let id = self.couplings.insert(Coupling {
            src,
            src_event,
            dst,
            dst_event,
            enabled: true,
            copy: None,
            copy_enabled: true,
            data: None,
        });
        match src_event {
            EventKind::Activation => source.activation_couplings.push(id),
            EventKind::Deactivation => source.deactivation_couplings.push(id),
        }
        Ok(id)
    }

    /// Unregister a coupling and free its handle.
    pub fn remove_coupling(&mut self, id: CouplingId) -> Result<()> {
        let coupling = self.couplings.remove(id).ok_or(Error::StaleCoupling(id))?;
        if let Some(source) = self.nodes.get_mut(coupling.src) {
            source.activation_couplings.retain(|c| *c != id);
            source.deactivation_couplings.retain(|c| *c != id);
        }
        Ok(())
    }

    pub fn coupling(&self, id: CouplingId) -> Option<&Coupling> {
        self.couplings.get(id)
    }

    fn coupling_mut(&mut self, id: CouplingId) -> Result<&mut Coupling> {
        self.couplings.get_mut(id).ok_or(Error::StaleCoupling(id))
    }

    /// Resume firing. Missed source events are not replayed.
    pub fn enable(&mut self, id: CouplingId) -> Result<()> {
        self.coupling_mut(id)?.enabled = true;
        Ok(())
    }

    /// Suspend firing without touching registration order or topology.
    pub fn disable(&mut self, id: CouplingId) -> Result<()> {
        self.coupling_mut(id)?.enabled = false;
        Ok(())
    }

    pub fn is_enabled(&self, id: CouplingId) -> bool {
        self.couplings.get(id).is_some_and(|c| c.enabled)
    }

    /// Copy `from`'s value into `to` (silently) each time the coupling fires.
    pub fn set_value_copy(&mut self, id: CouplingId, from: NodeId, to: NodeId) -> Result<()> {
        for node in [from, to] {
            if !self.is_property(node) {
                return Err(if self.contains(node) {
                    Error::NotAProperty(node)
                } else {
                    Error::StaleNode(node)
                });
            }
        }
        self.coupling_mut(id)?.copy = Some((from, to));
        Ok(())
    }

    pub fn set_copy_enabled(&mut self, id: CouplingId, enabled: bool) -> Result<()> {
        self.coupling_mut(id)?.copy_enabled = enabled;
        Ok(())
    }

    /// Node handed to the destination as its associated data when firing.
    pub fn set_coupling_data(&mut self, id: CouplingId, data: Option<NodeId>) -> Result<()> {
        self.coupling_mut(id)?.data = data;
        Ok(())
    }

    pub(crate) fn fire_coupling(&mut self, id: CouplingId) {
        let Some(coupling) = self.couplings.get(id) else {
            trace!(?id, "coupling removed during notification");
            return;
        };
        if !coupling.enabled {
            return;
        }
        let Coupling {
            src,
            dst,
            dst_event,
            copy,
            copy_enabled,
            data,
            ..
        } = coupling.clone();
        if !self.nodes.contains_key(dst) {
            debug!(?id, "coupling destination destroyed, skipped");
            return;
        }

        if let (Some((from, to)), true) = (copy, copy_enabled) {
            match self.value(from) {
                Ok(value) => {
                    if let Err(err) = self.set_value(to, value, false) {
                        warn!(?id, %err, "value copy failed");
                    }
                }
                Err(err) => warn!(?id, %err, "value copy failed"),
            }
        }

        trace!(?src, ?dst, ?dst_event, "coupling fired");
        let node = &mut self.nodes[dst];
        node.activation_source = Some(src);
        node.data = data;
        self.schedule(dst, dst_event);
    }

    /// Mark a node pending for the next execution pass.
    ///
    /// Marking a node that is already pending only updates the event kind
    /// it will run with.
    pub fn schedule(&mut self, id: NodeId, kind: EventKind) {
        let Some(node) = self.nodes.get_mut(id) else {
            warn!(?id, "scheduling a destroyed node");
            return;
        };
        node.activation_flag = ActivationFlag::from(kind);
        let vertex = self.graph.vertex_for(id);
        self.nodes[id].vertex = Some(vertex);
        self.graph.schedule(vertex);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::types::Value;

    fn recorder(engine: &mut Engine, observed: Option<NodeId>) -> (NodeId, Arc<Mutex<Vec<Value>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let seen = log.clone();
        let action = engine.add_action(None, "recorder", move |engine, _| {
            let value = observed
                .and_then(|id| engine.value(id).ok())
                .unwrap_or(Value::Ref(None));
            seen.lock().push(value);
        });
        (action, log)
    }

    #[test]
    fn test_disable_and_reenable() {
        let mut engine = Engine::default();
        let src = engine.add_spike(None, "src");
        let (action, log) = recorder(&mut engine, None);
        let c = engine
            .add_coupling(src, EventKind::Activation, action, EventKind::Activation)
            .unwrap();

        engine.activation(src);
        engine.exec();
        assert_eq!(log.lock().len(), 1);

        engine.disable(c).unwrap();
        assert!(!engine.is_enabled(c));
        engine.activation(src);
        engine.exec();
        engine.activation(src);
        engine.exec();
        assert_eq!(log.lock().len(), 1);

        // No replay of the two missed events.
        engine.enable(c).unwrap();
        engine.exec();
        assert_eq!(log.lock().len(), 1);
        engine.activation(src);
        engine.exec();
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_copy_before_reaction() {
        let mut engine = Engine::default();
        let from = engine.add_int(None, "from", 0);
        let to = engine.add_int(None, "to", -1);
        let (action, log) = recorder(&mut engine, Some(to));
        let c = engine
            .add_coupling(from, EventKind::Activation, action, EventKind::Activation)
            .unwrap();
        engine.set_value_copy(c, from, to).unwrap();

        engine.set_value(from, 9, true).unwrap();
        engine.exec();
        assert_eq!(*log.lock(), vec![Value::Int(9)]);

        engine.set_copy_enabled(c, false).unwrap();
        engine.set_value(from, 10, true).unwrap();
        engine.exec();
        assert_eq!(*log.lock(), vec![Value::Int(9), Value::Int(9)]);
        assert_eq!(engine.int_value(to).unwrap(), 9);
    }

    #[test]
    fn test_copy_is_silent() {
        let mut engine = Engine::default();
        let from = engine.add_int(None, "from", 0);
        let to = engine.add_int(None, "to", 0);
        let sink = engine.add_spike(None, "sink");
        let (downstream, log) = recorder(&mut engine, None);
        engine
            .add_coupling(to, EventKind::Activation, downstream, EventKind::Activation)
            .unwrap();
        let c = engine
            .add_coupling(from, EventKind::Activation, sink, EventKind::Activation)
            .unwrap();
        engine.set_value_copy(c, from, to).unwrap();

        engine.set_value(from, 3, true).unwrap();
        engine.exec();
        assert_eq!(engine.int_value(to).unwrap(), 3);
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_fire_sets_provenance() {
        let mut engine = Engine::default();
        let src = engine.add_spike(None, "src");
        let payload = engine.add_text(None, "payload", "hello");
        let dst = engine.add_spike(None, "dst");
        let c = engine
            .add_coupling(src, EventKind::Activation, dst, EventKind::Activation)
            .unwrap();
        engine.set_coupling_data(c, Some(payload)).unwrap();

        engine.activation(src);
        assert_eq!(engine.activation_source(dst), Some(src));
        assert_eq!(engine.data(dst), Some(payload));
        assert_eq!(engine.activation_flag(dst), ActivationFlag::Activation);
    }

    #[test]
    fn test_registration_order_and_removal() {
        let mut engine = Engine::default();
        let src = engine.add_spike(None, "src");
        let a = engine.add_spike(None, "a");
        let b = engine.add_spike(None, "b");
        let first = engine
            .add_coupling(src, EventKind::Activation, a, EventKind::Activation)
            .unwrap();
        engine
            .add_coupling(src, EventKind::Activation, b, EventKind::Deactivation)
            .unwrap();

        engine.remove_coupling(first).unwrap();
        assert!(matches!(engine.remove_coupling(first), Err(Error::StaleCoupling(_))));
        assert!(matches!(engine.enable(first), Err(Error::StaleCoupling(_))));

        engine.activation(src);
        assert_eq!(engine.activation_flag(a), ActivationFlag::None);
        assert_eq!(engine.activation_flag(b), ActivationFlag::Deactivation);
    }

    #[test]
    fn test_destination_destroyed_is_skipped() {
        let mut engine = Engine::default();
        let src = engine.add_spike(None, "src");
        let dst = engine.add_spike(None, "dst");
        engine
            .add_coupling(src, EventKind::Activation, dst, EventKind::Activation)
            .unwrap();
        engine.destroy(dst).unwrap();

        engine.activation(src);
        engine.exec();
        assert_eq!(engine.graph().pending_count(), 0);
    }
}
