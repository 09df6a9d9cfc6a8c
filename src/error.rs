//! Error types.
//!
//! Only misuse of handles is reported as an error. Lookup misses, rejected
//! value conversions and removal of missing edges are logged and treated as
//! no-ops instead.

use thiserror::Error;

use crate::types::{CouplingId, NodeId};

/// The main error type for engine operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The node was destroyed (or never belonged to this engine).
    #[error("stale node handle {0:?}")]
    StaleNode(NodeId),

    /// The coupling was removed (or never belonged to this engine).
    #[error("stale coupling handle {0:?}")]
    StaleCoupling(CouplingId),

    /// A property operation was applied to a node that holds no value.
    #[error("node {0:?} is not a property")]
    NotAProperty(NodeId),

    /// The node's process does not support duplication.
    #[error("node {0:?} cannot be duplicated")]
    NotCloneable(NodeId),

    /// The runtime owning the engine has been torn down.
    #[error("runtime is gone")]
    RuntimeGone,

    /// A timed source failed to spawn its worker thread.
    #[error("failed to spawn source thread: {0}")]
    SourceSpawn(#[from] std::io::Error),
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
