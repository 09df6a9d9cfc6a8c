//! # spark-process
//!
//! Reactive process-tree execution engine for interactive systems.
//!
//! ## Architecture
//!
//! An application is a tree of nodes ("processes") with an activation state
//! machine. Nodes react to each other through couplings, and reactions are
//! ordered by an explicit dependency graph:
//!
//! ```text
//! stimulus ─> acquire gate ─> set property / activate node
//!                                  │ couplings mark destinations pending
//!                                  v
//!                            exec(): walk topological order,
//!                                    run each pending node once
//!                                  │
//!                                  v
//!                            release gate
//! ```
//!
//! Nodes live in a generational arena and are addressed by [`NodeId`]. The
//! whole engine sits behind one exclusive-access gate owned by a
//! [`Runtime`]; background sources (clocks, timers, device bridges) take the
//! gate before touching anything.
//!
//! ## Example
//!
//! ```
//! use spark_process::{EventKind, Runtime};
//!
//! let runtime = Runtime::default();
//! let (x, doubled) = runtime.stimulate(|engine| {
//!     let root = engine.add_container(None, "root");
//!     let x = engine.add_int(Some(root), "x", 0);
//!     let doubled = engine.add_int(Some(root), "doubled", 0);
//!     let update = engine.add_action(Some(root), "update", move |engine, _| {
//!         let v = engine.int_value(x).unwrap_or_default();
//!         let _ = engine.set_value(doubled, v * 2, true);
//!     });
//!     engine.add_coupling(x, EventKind::Activation, update, EventKind::Activation)?;
//!     engine.add_edge(x, update);
//!     engine.activation(root);
//!     Ok::<_, spark_process::Error>((x, doubled))
//! })?;
//!
//! runtime.stimulate(|engine| engine.set_value(x, 21, true))?;
//! assert_eq!(runtime.acquire().int_value(doubled)?, 42);
//! # Ok::<(), spark_process::Error>(())
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Handles, activation states, flags, values
//! - [`engine`] - Node registry, activation, properties, couplings, execution pass
//! - [`graph`] - Dependency edges, topological order, pending set
//! - [`runtime`] - Runtime context and the exclusive-access gate
//! - [`sources`] - Timed sources: clock and timer

pub mod config;
pub mod engine;
pub mod error;
pub mod graph;
pub mod process;
pub mod runtime;
pub mod sources;
pub mod types;

// Re-export commonly used items
pub use types::*;

pub use config::RuntimeConfig;
pub use engine::{Coupling, DestroyCallback, Engine, NodeKind, Serializer, convert};
pub use error::{Error, Result};
pub use graph::{Graph, Vertex};
pub use process::{Action, Lifecycle, Process};
pub use runtime::{Gate, Runtime};
pub use sources::{Clock, FireResult, TimedSource, Timer};
