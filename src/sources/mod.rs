//! Timed sources - background stimulus producers.
//!
//! - [`TimedSource`]: the wait-then-fire worker every periodic or delayed
//!   producer is built on
//! - [`Clock`]: periodic `tick`, with the measured `elapsed` time
//! - [`Timer`]: one-shot `end` after a `delay`
//!
//! Device bridges follow the same contract without the wait: acquire the
//! gate, mutate, run one pass. See [`Runtime::stimulate`](crate::Runtime::stimulate).

mod clock;
mod timed;
mod timer;

use std::time::Duration;

use crate::engine::Engine;
use crate::types::NodeId;

pub use clock::Clock;
pub use timed::{FireResult, TimedSource};
pub use timer::Timer;

/// Milliseconds held by the integer property `name` under `owner`.
///
/// Negative values clamp to zero.
fn millis_of(engine: &Engine, owner: NodeId, name: &str) -> Option<Duration> {
    let property = engine.child(owner, name)?;
    let ms = engine.int_value(property).ok()?;
    Some(Duration::from_millis(ms.max(0).unsigned_abs()))
}
