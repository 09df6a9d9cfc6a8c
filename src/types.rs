//! Core types shared by the engine, the graph and the runtime.
//!
//! Handles are generational arena keys: once the referenced node, coupling
//! or vertex is freed, the handle stops resolving instead of dangling or
//! aliasing whatever is allocated next.

use std::fmt;

use slotmap::new_key_type;

// =============================================================================
// Handles
// =============================================================================

new_key_type! {
    /// Handle to a node in the engine's arena.
    pub struct NodeId;

    /// Handle to a coupling record.
    pub struct CouplingId;

    /// Handle to a vertex of the dependency graph.
    pub struct VertexId;
}

// =============================================================================
// Activation
// =============================================================================

/// Activation state of a node.
///
/// Transitions only along
/// `Deactivated -> Activating -> Activated -> Deactivating -> Deactivated`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ActivationState {
    #[default]
    Deactivated,
    Activating,
    Activated,
    Deactivating,
}

impl ActivationState {
    /// True while the node is activating or activated.
    ///
    /// Children may only activate under a parent in one of these states.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Activating | Self::Activated)
    }
}

/// Which event of a node a coupling listens to, or triggers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Activation,
    Deactivation,
}

/// Auxiliary outcome tag of a node.
///
/// Couplings set it on their destination when they schedule it; the
/// execution pass reads it to decide which reaction to run. Cleared on
/// deactivation and after the pass has run the node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ActivationFlag {
    #[default]
    None,
    Activation,
    Deactivation,
}

impl From<EventKind> for ActivationFlag {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Activation => Self::Activation,
            EventKind::Deactivation => Self::Deactivation,
        }
    }
}

// =============================================================================
// Node flags (bitflags)
// =============================================================================

bitflags::bitflags! {
    /// Per-node flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        const NONE = 0;
        /// Structural, always-live node: activation is not gated on the
        /// parent's state.
        const MODEL = 1 << 0;
        /// Bound in the parent's name table.
        const FINALIZED = 1 << 1;
    }
}

// =============================================================================
// Values
// =============================================================================

/// The representable property value types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ValueType {
    Int,
    Real,
    Bool,
    Text,
    Ref,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Int => "integer",
            Self::Real => "real",
            Self::Bool => "boolean",
            Self::Text => "text",
            Self::Ref => "node reference",
        };
        f.write_str(name)
    }
}

/// A property value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Int(i64),
    Real(f64),
    Bool(bool),
    Text(String),
    /// Non-owning reference to another node (or nothing).
    Ref(Option<NodeId>),
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Int(_) => ValueType::Int,
            Self::Real(_) => ValueType::Real,
            Self::Bool(_) => ValueType::Bool,
            Self::Text(_) => ValueType::Text,
            Self::Ref(_) => ValueType::Ref,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Real(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Ref(Some(id)) => write!(f, "{id:?}"),
            Self::Ref(None) => f.write_str("null"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<NodeId> for Value {
    fn from(v: NodeId) -> Self {
        Self::Ref(Some(v))
    }
}

impl From<Option<NodeId>> for Value {
    fn from(v: Option<NodeId>) -> Self {
        Self::Ref(v)
    }
}
