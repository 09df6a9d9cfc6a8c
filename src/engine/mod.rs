//! Process Engine - the gated state of a runtime.
//!
//! The engine owns everything the exclusive-access gate protects:
//! - Node arena: tree ownership, name tables, activation state
//! - Coupling arena: event bindings between nodes
//! - Dependency graph: execution-order edges and the pending set
//!
//! # Architecture
//!
//! Nodes are NOT objects holding pointers to each other. They are slots in a
//! generational arena, addressed by [`NodeId`]:
//!
//! ```text
//! root   (Container, parent=None,  children={ "x": n1, "go": n2 })
//! n1     (Property,  parent=root,  value=Int(3))
//! n2     (Action,    parent=root,  vertex=v0)
//! ```
//!
//! Parent -> child links own; couplings and graph edges are plain handles
//! that stop resolving once their referent is destroyed.
//!
//! Every operation takes `&mut Engine`, so only the gate holder (see
//! [`Runtime::acquire`](crate::Runtime::acquire)) can reach them.

mod activation;
mod coupling;
mod exec;
mod property;
mod registry;
pub mod serialize;

use std::collections::HashMap;
use std::panic::Location;
use std::sync::Weak;

use indexmap::IndexMap;
use slotmap::SlotMap;

use crate::config::RuntimeConfig;
use crate::graph::Graph;
use crate::process::{Lifecycle, Process};
use crate::runtime::{Runtime, Shared};
use crate::types::{
    ActivationFlag, ActivationState, CouplingId, NodeFlags, NodeId, Value, VertexId,
};

pub use coupling::Coupling;
pub use property::convert;
pub use serialize::Serializer;

/// Callback run when a node is destroyed.
pub type DestroyCallback = Box<dyn FnOnce(&mut Engine, NodeId) + Send>;

// =============================================================================
// Node kinds
// =============================================================================

/// What a new node is. Passed to [`Engine::create`].
pub enum NodeKind {
    /// Structural node; activation cascades to its owned children.
    Container,
    /// Transient node that only notifies its couplings.
    Spike,
    /// Typed value holder. The type is fixed by the initial value.
    Property(Value),
    /// Collaborator node behind the [`Process`] capability.
    Process(Box<dyn Process>),
}

/// Storage form of [`NodeKind`]. A process is taken out of its slot while
/// it runs, so the engine can be lent to it.
pub(crate) enum Body {
    Container,
    Spike,
    Property(Value),
    Process(Option<Box<dyn Process>>),
}

impl From<NodeKind> for Body {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Container => Self::Container,
            NodeKind::Spike => Self::Spike,
            NodeKind::Property(value) => Self::Property(value),
            NodeKind::Process(process) => Self::Process(Some(process)),
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// One arena slot.
pub(crate) struct Node {
    pub(crate) name: String,
    /// Owner. Set at creation, never changes.
    pub(crate) parent: Option<NodeId>,
    /// Name table. May hold aliases to nodes owned elsewhere.
    pub(crate) children: IndexMap<String, NodeId>,
    pub(crate) activation_couplings: Vec<CouplingId>,
    pub(crate) deactivation_couplings: Vec<CouplingId>,
    pub(crate) state_dependency: Option<NodeId>,
    pub(crate) activation_source: Option<NodeId>,
    pub(crate) data: Option<NodeId>,
    pub(crate) vertex: Option<VertexId>,
    pub(crate) state: ActivationState,
    pub(crate) activation_flag: ActivationFlag,
    pub(crate) flags: NodeFlags,
    pub(crate) debug_info: &'static Location<'static>,
    pub(crate) body: Body,
}

impl Node {
    fn new(
        name: String,
        parent: Option<NodeId>,
        state_dependency: Option<NodeId>,
        body: Body,
        debug_info: &'static Location<'static>,
    ) -> Self {
        Self {
            name,
            parent,
            children: IndexMap::new(),
            activation_couplings: Vec::new(),
            deactivation_couplings: Vec::new(),
            state_dependency,
            activation_source: None,
            data: None,
            vertex: None,
            state: ActivationState::Deactivated,
            activation_flag: ActivationFlag::None,
            flags: NodeFlags::NONE,
            debug_info,
            body,
        }
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        match &self.body {
            Body::Spike => Lifecycle::Transient,
            Body::Process(Some(process)) => process.lifecycle(),
            _ => Lifecycle::Persistent,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The state guarded by a runtime's exclusive-access gate.
pub struct Engine {
    pub(crate) nodes: SlotMap<NodeId, Node>,
    pub(crate) couplings: SlotMap<CouplingId, Coupling>,
    pub(crate) graph: Graph,
    config: RuntimeConfig,
    anonymous_count: u64,
    passes: u64,
    destroy_callbacks: HashMap<NodeId, Vec<DestroyCallback>>,
    runtime: Weak<Shared>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Engine {
    /// A standalone engine, not owned by any [`Runtime`].
    ///
    /// Everything works except timed sources, which need a runtime to
    /// re-acquire the gate from their worker thread.
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_runtime(config, Weak::new())
    }

    pub(crate) fn with_runtime(config: RuntimeConfig, runtime: Weak<Shared>) -> Self {
        Self {
            nodes: SlotMap::with_key(),
            couplings: SlotMap::with_key(),
            graph: Graph::new(),
            config,
            anonymous_count: 0,
            passes: 0,
            destroy_callbacks: HashMap::new(),
            runtime,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The runtime owning this engine, if any.
    pub fn runtime(&self) -> Option<Runtime> {
        Runtime::from_shared(&self.runtime)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Number of completed execution passes.
    pub fn passes(&self) -> u64 {
        self.passes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    fn next_anonymous_name(&mut self) -> String {
        self.anonymous_count += 1;
        format!("{}{}", self.config.anonymous_prefix, self.anonymous_count)
    }
}
