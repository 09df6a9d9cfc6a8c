//! Node Registry - creation, name tables and destruction.
//!
//! Manages the lifecycle of nodes:
//! - Detached creation, then finalization into the parent's name table
//! - Path lookup through name tables
//! - Aliases and merges (extra bindings that do not transfer ownership)
//! - Destroy callbacks, run before a node's slot is freed

use std::panic::Location;

use tracing::{debug, warn};

use super::{Body, DestroyCallback, Engine, Node, NodeKind};
use crate::error::{Error, Result};
use crate::process::{Action, Process};
use crate::types::{ActivationFlag, ActivationState, NodeFlags, NodeId, Value};

impl Engine {
    // =========================================================================
    // Creation
    // =========================================================================

    /// Create a detached node.
    ///
    /// The parent is recorded (and its state dependency inherited) but the
    /// node is not yet bound in the parent's table; see [`Engine::finalize`].
    /// An empty name is replaced by a generated one.
    #[track_caller]
    pub fn create(&mut self, parent: Option<NodeId>, name: &str, kind: NodeKind) -> NodeId {
        let debug_info = Location::caller();
        let name = if name.is_empty() {
            self.next_anonymous_name()
        } else {
            name.to_string()
        };
        let state_dependency = parent
            .and_then(|p| self.nodes.get(p))
            .and_then(|p| p.state_dependency);
        let is_bool = matches!(kind, NodeKind::Property(Value::Bool(_)));
        let is_property = matches!(kind, NodeKind::Property(_));

        let id = self.nodes.insert(Node::new(
            name,
            parent,
            state_dependency,
            Body::from(kind),
            debug_info,
        ));
        if is_property {
            self.nodes[id].flags |= NodeFlags::MODEL;
        }
        if is_bool {
            for trigger in ["true", "false"] {
                let spike = self.add_model_spike(id, trigger, debug_info);
                self.add_edge(id, spike);
            }
        }
        id
    }

    fn add_model_spike(
        &mut self,
        parent: NodeId,
        name: &str,
        debug_info: &'static Location<'static>,
    ) -> NodeId {
        let state_dependency = self.nodes.get(parent).and_then(|p| p.state_dependency);
        let mut node = Node::new(
            name.to_string(),
            Some(parent),
            state_dependency,
            Body::Spike,
            debug_info,
        );
        node.flags |= NodeFlags::MODEL;
        let id = self.nodes.insert(node);
        self.finalize(id);
        id
    }

    /// Bind a created node in its parent's name table.
    ///
    /// A node without a parent is a root and finalizes trivially.
    pub fn finalize(&mut self, id: NodeId) {
        let Some(node) = self.nodes.get_mut(id) else {
            warn!(?id, "finalize on a destroyed node");
            return;
        };
        node.flags |= NodeFlags::FINALIZED;
        let (parent, name) = (node.parent, node.name.clone());
        if let Some(parent) = parent {
            self.add_child(parent, id, &name);
        }
    }

    #[track_caller]
    pub fn add_container(&mut self, parent: Option<NodeId>, name: &str) -> NodeId {
        let id = self.create(parent, name, NodeKind::Container);
        self.finalize(id);
        id
    }

    #[track_caller]
    pub fn add_spike(&mut self, parent: Option<NodeId>, name: &str) -> NodeId {
        let id = self.create(parent, name, NodeKind::Spike);
        self.finalize(id);
        id
    }

    #[track_caller]
    pub fn add_property(
        &mut self,
        parent: Option<NodeId>,
        name: &str,
        value: impl Into<Value>,
    ) -> NodeId {
        let id = self.create(parent, name, NodeKind::Property(value.into()));
        self.finalize(id);
        id
    }

    #[track_caller]
    pub fn add_int(&mut self, parent: Option<NodeId>, name: &str, value: i64) -> NodeId {
        self.add_property(parent, name, Value::Int(value))
    }

    #[track_caller]
    pub fn add_real(&mut self, parent: Option<NodeId>, name: &str, value: f64) -> NodeId {
        self.add_property(parent, name, Value::Real(value))
    }

    #[track_caller]
    pub fn add_bool(&mut self, parent: Option<NodeId>, name: &str, value: bool) -> NodeId {
        self.add_property(parent, name, Value::Bool(value))
    }

    #[track_caller]
    pub fn add_text(&mut self, parent: Option<NodeId>, name: &str, value: &str) -> NodeId {
        self.add_property(parent, name, Value::Text(value.to_string()))
    }

    #[track_caller]
    pub fn add_ref(&mut self, parent: Option<NodeId>, name: &str, target: Option<NodeId>) -> NodeId {
        self.add_property(parent, name, Value::Ref(target))
    }

    #[track_caller]
    pub fn add_process(
        &mut self,
        parent: Option<NodeId>,
        name: &str,
        process: Box<dyn Process>,
    ) -> NodeId {
        let id = self.create(parent, name, NodeKind::Process(process));
        self.finalize(id);
        id
    }

    /// Add a closure-backed reaction node.
    #[track_caller]
    pub fn add_action<F>(&mut self, parent: Option<NodeId>, name: &str, reaction: F) -> NodeId
    where
        F: FnMut(&mut Engine, NodeId) + Send + 'static,
    {
        self.add_process(parent, name, Box::new(Action::new(reaction)))
    }

    // =========================================================================
    // Destruction
    // =========================================================================

    /// Register a callback to run when `id` is destroyed.
    ///
    /// Owners use this to unregister the couplings and edges they created.
    pub fn on_destroy(
        &mut self,
        id: NodeId,
        callback: impl FnOnce(&mut Engine, NodeId) + Send + 'static,
    ) -> Result<()> {
        if !self.nodes.contains_key(id) {
            return Err(Error::StaleNode(id));
        }
        let callback: DestroyCallback = Box::new(callback);
        self.destroy_callbacks.entry(id).or_default().push(callback);
        Ok(())
    }

    /// Destroy a node and, depth first, every child it owns.
    ///
    /// Aliases in its table are unbound, not destroyed. Couplings whose
    /// source is this node are dropped; its graph vertex is invalidated so
    /// edges left behind by careless owners stay inert.
    pub fn destroy(&mut self, id: NodeId) -> Result<()> {
        if !self.nodes.contains_key(id) {
            return Err(Error::StaleNode(id));
        }

        // Run destroy callbacks before cleanup
        if let Some(callbacks) = self.destroy_callbacks.remove(&id) {
            for callback in callbacks {
                callback(self, id);
            }
            if !self.nodes.contains_key(id) {
                return Ok(());
            }
        }

        // A boolean's trigger edges belong to the property itself.
        if let Some(Node { body: Body::Property(Value::Bool(_)), children, .. }) = self.nodes.get(id) {
            let triggers: Vec<NodeId> = ["true", "false"]
                .iter()
                .filter_map(|name| children.get(*name).copied())
                .collect();
            for trigger in triggers {
                self.graph.remove_edge(id, trigger);
            }
        }

        let owned: Vec<NodeId> = self.owned_children(id);
        for child in owned.into_iter().rev() {
            // A callback may already have taken it down.
            if self.nodes.contains_key(child) {
                self.destroy(child)?;
            }
        }

        let Some(node) = self.nodes.remove(id) else {
            return Ok(());
        };
        if let Some(parent) = node.parent.and_then(|p| self.nodes.get_mut(p)) {
            parent.children.retain(|_, child| *child != id);
        }
        for coupling in node
            .activation_couplings
            .iter()
            .chain(node.deactivation_couplings.iter())
        {
            self.couplings.remove(*coupling);
        }
        if let Some(vertex) = node.vertex.or_else(|| self.graph.vertex_of(id)) {
            self.graph.invalidate(vertex);
        }
        debug!(name = %node.name, "node destroyed");
        Ok(())
    }

    /// Children bound in `id`'s table that `id` owns (aliases excluded).
    pub(crate) fn owned_children(&self, id: NodeId) -> Vec<NodeId> {
        let Some(node) = self.nodes.get(id) else {
            return Vec::new();
        };
        node.children
            .values()
            .copied()
            .filter(|child| self.nodes.get(*child).is_some_and(|c| c.parent == Some(id)))
            .collect()
    }

    // =========================================================================
    // Name tables
    // =========================================================================

    /// Bind `child` under `name` in `parent`'s table.
    ///
    /// Re-using a name silently replaces the previous binding.
    pub fn add_child(&mut self, parent: NodeId, child: NodeId, name: &str) {
        let Some(node) = self.nodes.get_mut(parent) else {
            warn!(?parent, name, "add_child on a destroyed node");
            return;
        };
        node.children.insert(name.to_string(), child);
    }

    /// Unbind `name` from `parent`'s table. The child itself is untouched.
    pub fn remove_child(&mut self, parent: NodeId, name: &str) -> Option<NodeId> {
        let node = self.nodes.get_mut(parent)?;
        let removed = node.children.shift_remove(name);
        if removed.is_none() {
            warn!(name, parent = %node.name, "symbol not found");
        }
        removed
    }

    /// Unbind every name `child` is bound under in `parent`'s table.
    pub fn remove_child_node(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.retain(|_, c| *c != child);
        }
    }

    /// Bind an existing node under an extra name, without taking ownership.
    pub fn alias(&mut self, parent: NodeId, name: &str, target: NodeId) {
        self.add_child(parent, target, name);
    }

    /// Alias every binding of `from`'s table into `parent`'s table.
    pub fn alias_children(&mut self, parent: NodeId, from: NodeId) {
        let Some(source) = self.nodes.get(from) else {
            warn!(?from, "alias_children from a destroyed node");
            return;
        };
        let bindings: Vec<(String, NodeId)> = source
            .children
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect();
        for (name, id) in bindings {
            self.add_child(parent, id, &name);
        }
    }

    /// Fold `p2/n2` into `p1/n1`.
    ///
    /// The couplings sourced at `p2/n2` move to `p1/n1` (appended in order),
    /// then `n2` in `p2`'s table is rebound to `p1/n1`. The merged-away node
    /// is not destroyed.
    pub fn merge_children(&mut self, p1: NodeId, n1: &str, p2: NodeId, n2: &str) {
        let Some(x1) = self.child(p1, n1) else {
            warn!(name = n1, "cannot merge: unknown child");
            return;
        };
        let Some(x2) = self.child(p2, n2) else {
            warn!(name = n2, "cannot merge: unknown child");
            return;
        };
        if x1 == x2 {
            return;
        }

        let (activation, deactivation) = {
            let node = &mut self.nodes[x2];
            (
                std::mem::take(&mut node.activation_couplings),
                std::mem::take(&mut node.deactivation_couplings),
            )
        };
        for coupling in activation.iter().chain(deactivation.iter()) {
            if let Some(c) = self.couplings.get_mut(*coupling) {
                c.src = x1;
            }
        }
        let target = &mut self.nodes[x1];
        target.activation_couplings.extend(activation);
        target.deactivation_couplings.extend(deactivation);

        self.remove_child(p2, n2);
        self.add_child(p2, x1, n2);
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Direct child lookup, without logging.
    pub fn child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.nodes.get(parent)?.children.get(name).copied()
    }

    /// Resolve a path relative to `from`.
    ///
    /// `""` is `from` itself, `".."` the parent, `"a/b"` descends through
    /// name tables, and segments mix freely (`"../sibling/x"`). Empty
    /// segments are ignored. Unresolved paths log a warning and return
    /// `None`.
    pub fn find(&self, from: NodeId, path: &str) -> Option<NodeId> {
        if !self.nodes.contains_key(from) {
            warn!(?from, path, "find from a destroyed node");
            return None;
        }
        let mut current = from;
        for segment in path.split('/') {
            let next = match segment {
                "" => continue,
                ".." => self.nodes[current].parent,
                name => self.nodes[current].children.get(name).copied(),
            };
            match next.filter(|id| self.nodes.contains_key(*id)) {
                Some(id) => current = id,
                None => {
                    warn!(path, segment, "component not found");
                    return None;
                }
            }
        }
        Some(current)
    }

    /// Name `child` is bound under in `parent`'s table (linear search).
    pub fn name_of(&self, parent: NodeId, child: NodeId) -> Option<&str> {
        self.nodes
            .get(parent)?
            .children
            .iter()
            .find(|(_, id)| **id == child)
            .map(|(name, _)| name.as_str())
    }

    /// Nodes without a parent, in arena order.
    pub fn roots(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.parent.is_none())
            .map(|(id, _)| id)
            .collect()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self, id: NodeId) -> Option<String> {
        self.nodes.get(id).map(|node| node.name.clone())
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id)?.parent
    }

    /// The name table of `id`, in insertion order.
    pub fn children(&self, id: NodeId) -> Vec<(String, NodeId)> {
        self.nodes
            .get(id)
            .map(|node| {
                node.children
                    .iter()
                    .map(|(name, child)| (name.clone(), *child))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Activation state; `Deactivated` for a destroyed node.
    pub fn state(&self, id: NodeId) -> ActivationState {
        self.nodes.get(id).map(|node| node.state).unwrap_or_default()
    }

    /// Force the activation state, bypassing the guards and notifications.
    pub(crate) fn set_state(&mut self, id: NodeId, state: ActivationState) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.state = state;
        }
    }

    pub fn activation_flag(&self, id: NodeId) -> ActivationFlag {
        self.nodes
            .get(id)
            .map(|node| node.activation_flag)
            .unwrap_or_default()
    }

    pub fn set_activation_flag(&mut self, id: NodeId, flag: ActivationFlag) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.activation_flag = flag;
        }
    }

    pub fn flags(&self, id: NodeId) -> NodeFlags {
        self.nodes.get(id).map(|node| node.flags).unwrap_or_default()
    }

    pub fn is_model(&self, id: NodeId) -> bool {
        self.flags(id).contains(NodeFlags::MODEL)
    }

    pub fn set_model(&mut self, id: NodeId, model: bool) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.flags.set(NodeFlags::MODEL, model);
        }
    }

    /// Creation site of the node, as `file:line:column`.
    pub fn debug_info(&self, id: NodeId) -> Option<String> {
        self.nodes.get(id).map(|node| node.debug_info.to_string())
    }

    pub fn state_dependency(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id)?.state_dependency
    }

    /// Set the node that must activate ahead of this node's reactions.
    ///
    /// Inherited by children created afterwards.
    pub fn set_state_dependency(&mut self, id: NodeId, dependency: Option<NodeId>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.state_dependency = dependency;
        }
    }

    /// The node whose event last scheduled this one.
    pub fn activation_source(&self, id: NodeId) -> Option<NodeId> {
        self.nodes
            .get(id)?
            .activation_source
            .filter(|src| self.nodes.contains_key(*src))
    }

    pub fn set_activation_source(&mut self, id: NodeId, source: Option<NodeId>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.activation_source = source;
        }
    }

    pub fn data(&self, id: NodeId) -> Option<NodeId> {
        self.nodes
            .get(id)?
            .data
            .filter(|data| self.nodes.contains_key(*data))
    }

    pub fn set_data(&mut self, id: NodeId, data: Option<NodeId>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.data = data;
        }
    }

    /// Export tag of the node's kind.
    pub fn type_name(&self, id: NodeId) -> Option<&'static str> {
        let node = self.nodes.get(id)?;
        Some(match &node.body {
            Body::Container => "core:component",
            Body::Spike => "core:spike",
            Body::Property(value) => super::property::type_tag(value),
            Body::Process(Some(process)) => process.type_name(),
            Body::Process(None) => "core:process",
        })
    }
}
