//! Export, diagnostics and duplication.
//!
//! The engine does not know any export format. It walks the tree and calls
//! into a [`Serializer`], bracketing the export root with the serializer's
//! pre/post hooks.

use std::collections::HashSet;

use termtree::Tree;

use super::{Body, Engine, NodeKind};
use crate::error::{Error, Result};
use crate::types::{NodeId, Value};

/// Sink for node exports.
pub trait Serializer {
    /// Called once before the export root is serialized.
    fn pre_serialize(&mut self, engine: &Engine, root: NodeId) {
        let _ = (engine, root);
    }

    /// Called once after the export root is serialized.
    fn post_serialize(&mut self, engine: &Engine, root: NodeId) {
        let _ = (engine, root);
    }

    fn start(&mut self, tag: &str);
    fn text_attribute(&mut self, name: &str, value: &str);
    fn int_attribute(&mut self, name: &str, value: i64);
    fn real_attribute(&mut self, name: &str, value: f64);
    fn end(&mut self);
}

impl Engine {
    /// Export `id` and everything it owns.
    pub fn serialize(&self, id: NodeId, out: &mut dyn Serializer) -> Result<()> {
        if !self.contains(id) {
            return Err(Error::StaleNode(id));
        }
        out.pre_serialize(self, id);
        self.serialize_node(id, out);
        out.post_serialize(self, id);
        Ok(())
    }

    /// Export one node without the root hooks. Used by composite processes
    /// to export their children.
    pub fn serialize_node(&self, id: NodeId, out: &mut dyn Serializer) {
        let Some(node) = self.nodes.get(id) else {
            return;
        };
        let tag = self.type_name(id).unwrap_or("core:process");
        match &node.body {
            Body::Container => {
                out.start(tag);
                out.text_attribute("id", &node.name);
                for child in self.owned_children(id) {
                    self.serialize_node(child, out);
                }
                out.end();
            }
            Body::Spike => {
                out.start(tag);
                out.text_attribute("id", &node.name);
                out.end();
            }
            Body::Property(value) => {
                out.start(tag);
                out.text_attribute("id", &node.name);
                match value {
                    Value::Int(v) => out.int_attribute("value", *v),
                    Value::Real(v) => out.real_attribute("value", *v),
                    Value::Ref(target) => {
                        let name = target.and_then(|t| self.name(t));
                        out.text_attribute("value", name.as_deref().unwrap_or("null"));
                    }
                    Value::Bool(_) | Value::Text(_) => {
                        out.text_attribute("value", &value.to_string());
                    }
                }
                out.end();
            }
            Body::Process(Some(process)) => process.serialize(self, id, out),
            Body::Process(None) => {}
        }
    }

    /// Render the name table of `id` as a tree, down to `depth` levels
    /// (0 = unlimited). Properties show their value.
    pub fn dump(&self, id: NodeId, depth: usize) -> String {
        let label = self
            .parent(id)
            .and_then(|p| self.name_of(p, id).map(str::to_string))
            .or_else(|| self.name(id))
            .unwrap_or_default();
        let mut path = HashSet::new();
        self.dump_tree(id, label, 0, depth, &mut path).to_string()
    }

    fn dump_tree(
        &self,
        id: NodeId,
        label: String,
        level: usize,
        depth: usize,
        path: &mut HashSet<NodeId>,
    ) -> Tree<String> {
        let Some(node) = self.nodes.get(id) else {
            return Tree::new(format!("{label}: <DESTROYED>"));
        };
        if let Body::Property(value) = &node.body {
            let mut tree = Tree::new(format!("{label} [ {value} ]"));
            if depth == 0 || level + 1 < depth {
                for (name, child) in &node.children {
                    tree.leaves.push(Tree::new(format!("{name}: {}", self.short_label(*child))));
                }
            }
            return tree;
        }
        if node.children.is_empty() {
            return Tree::new(format!("{label}: <EMPTY>"));
        }
        let mut tree = Tree::new(format!("{label}:"));
        if depth != 0 && level + 1 >= depth {
            return tree;
        }
        if !path.insert(id) {
            tree.root.push_str(" <CYCLE>");
            return tree;
        }
        for (name, child) in &node.children {
            let leaf = self.dump_tree(*child, name.clone(), level + 1, depth, path);
            tree.leaves.push(leaf);
        }
        path.remove(&id);
        tree
    }

    fn short_label(&self, id: NodeId) -> &'static str {
        self.type_name(id).unwrap_or("<DESTROYED>")
    }

    // =========================================================================
    // Duplication
    // =========================================================================

    /// Build a detached deep copy of `id` and return it as a new root.
    ///
    /// Properties keep their value, containers copy what they own, and
    /// processes copy themselves through [`Process::duplicate`](crate::Process::duplicate).
    /// Couplings and edges are not copied.
    pub fn duplicate(&mut self, id: NodeId) -> Result<NodeId> {
        let copy = self.duplicate_under(id, None)?;
        self.finalize(copy);
        Ok(copy)
    }

    /// Copy `id` as a detached (not yet finalized) node under `parent`.
    pub fn duplicate_under(&mut self, id: NodeId, parent: Option<NodeId>) -> Result<NodeId> {
        let node = self.nodes.get_mut(id).ok_or(Error::StaleNode(id))?;
        let name = node.name.clone();
        match &mut node.body {
            Body::Container => {
                let copy = self.create(parent, &name, NodeKind::Container);
                for child in self.owned_children(id) {
                    let child_copy = self.duplicate_under(child, Some(copy))?;
                    self.finalize(child_copy);
                }
                Ok(copy)
            }
            Body::Spike => Ok(self.create(parent, &name, NodeKind::Spike)),
            Body::Property(value) => {
                let value = value.clone();
                Ok(self.create(parent, &name, NodeKind::Property(value)))
            }
            Body::Process(slot) => {
                let process = slot.take().ok_or(Error::NotCloneable(id))?;
                let copy = process.duplicate(self, id, parent);
                if let Some(node) = self.nodes.get_mut(id) {
                    node.body = Body::Process(Some(process));
                }
                copy
            }
        }
    }
}
