//! Process capability interface.
//!
//! Core node kinds (containers, spikes, properties) are handled by the engine
//! directly. Everything built on top of the core (actions, clocks, timers,
//! device bridges, renderers) implements [`Process`] and is stored in the
//! arena as a boxed trait object.
//!
//! # Example
//!
//! ```
//! use spark_process::{Engine, NodeId, Process, Runtime};
//!
//! struct Beep;
//!
//! impl Process for Beep {
//!     fn type_name(&self) -> &'static str {
//!         "demo:beep"
//!     }
//!
//!     fn activate(&mut self, engine: &mut Engine, this: NodeId) {
//!         tracing::info!(name = engine.name(this).unwrap_or_default(), "beep");
//!     }
//! }
//!
//! let runtime = Runtime::default();
//! let mut gate = runtime.acquire();
//! let beep = gate.add_process(None, "beep", Box::new(Beep));
//! gate.activation(beep);
//! ```

use crate::engine::Engine;
use crate::engine::serialize::Serializer;
use crate::error::{Error, Result};
use crate::types::NodeId;

/// How a node's state evolves after a completed activation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Lifecycle {
    /// Stays `Activated` until deactivated.
    #[default]
    Persistent,
    /// Returns to `Deactivated` right after notifying its couplings, so it
    /// can fire again on the next activation (spikes, actions).
    Transient,
}

/// Behaviour of a non-core node.
///
/// All methods run while the caller holds the gate; they must not block on
/// I/O or sleep.
pub trait Process: Send + 'static {
    /// Export tag, also used in diagnostics.
    fn type_name(&self) -> &'static str;

    /// Subtype-specific effect of an activation.
    fn activate(&mut self, engine: &mut Engine, this: NodeId);

    /// Subtype-specific effect of a deactivation.
    fn deactivate(&mut self, engine: &mut Engine, this: NodeId) {
        let _ = (engine, this);
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Persistent
    }

    /// Export this node. The engine brackets the call with the serializer's
    /// pre/post hooks when this node is the export root.
    fn serialize(&self, engine: &Engine, this: NodeId, out: &mut dyn Serializer) {
        out.start(self.type_name());
        out.text_attribute("id", &engine.name(this).unwrap_or_default());
        out.end();
    }

    /// Build a copy of this node under `parent`, created but not
    /// finalized, and return its handle.
    fn duplicate(&self, engine: &mut Engine, this: NodeId, parent: Option<NodeId>) -> Result<NodeId> {
        let _ = (engine, parent);
        Err(Error::NotCloneable(this))
    }
}

// =============================================================================
// Action - closure-backed reaction
// =============================================================================

/// A transient process running a closure on every activation.
///
/// This is the usual shape of a reaction vertex: wire properties to it with
/// couplings, order it with graph edges, and let the execution pass run it.
pub struct Action<F> {
    reaction: F,
}

impl<F> Action<F>
where
    F: FnMut(&mut Engine, NodeId) + Send + 'static,
{
    pub fn new(reaction: F) -> Self {
        Self { reaction }
    }
}

impl<F> Process for Action<F>
where
    F: FnMut(&mut Engine, NodeId) + Send + 'static,
{
    fn type_name(&self) -> &'static str {
        "core:action"
    }

    fn activate(&mut self, engine: &mut Engine, this: NodeId) {
        (self.reaction)(engine, this);
    }

    fn lifecycle(&self) -> Lifecycle {
        Lifecycle::Transient
    }
}
