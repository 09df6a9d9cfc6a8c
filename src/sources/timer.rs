//! One-shot timer.

use std::time::Duration;

use tracing::error;

use super::{TimedSource, millis_of};
use crate::engine::{Engine, NodeKind, Serializer};
use crate::error::Result;
use crate::process::Process;
use crate::types::{ActivationState, NodeId};

/// Notifies `end` once, `delay` milliseconds after activation, then falls
/// back to deactivated so it can be started again.
///
/// Deactivating it before the delay elapses cancels the firing.
pub struct Timer {
    source: TimedSource,
}

impl Timer {
    /// Add a timer under `parent`.
    #[track_caller]
    pub fn add(engine: &mut Engine, parent: Option<NodeId>, name: &str, delay: Duration) -> NodeId {
        let id = Self::build(engine, parent, name, delay);
        engine.finalize(id);
        id
    }

    #[track_caller]
    fn build(engine: &mut Engine, parent: Option<NodeId>, name: &str, delay: Duration) -> NodeId {
        let timer = Timer {
            source: TimedSource::new(),
        };
        let id = engine.create(parent, name, NodeKind::Process(Box::new(timer)));
        let ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        engine.add_int(Some(id), "delay", ms);
        engine.add_spike(Some(id), "end");
        id
    }
}

impl Process for Timer {
    fn type_name(&self) -> &'static str {
        "core:timer"
    }

    fn activate(&mut self, engine: &mut Engine, this: NodeId) {
        let delay = millis_of(engine, this, "delay").unwrap_or_default();
        let started = self.source.start(engine, this, delay, |engine, this, _| {
            engine.set_state(this, ActivationState::Deactivated);
            if let Some(end) = engine.child(this, "end") {
                engine.notify_activation(end);
            }
            Ok(None)
        });
        if let Err(err) = started {
            error!(%err, "timer could not start");
        }
    }

    fn deactivate(&mut self, _: &mut Engine, _: NodeId) {
        self.source.stop();
    }

    fn serialize(&self, engine: &Engine, this: NodeId, out: &mut dyn Serializer) {
        out.start(self.type_name());
        out.text_attribute("id", &engine.name(this).unwrap_or_default());
        let delay = millis_of(engine, this, "delay").unwrap_or_default();
        out.int_attribute("delay", i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
        out.end();
    }

    fn duplicate(&self, engine: &mut Engine, this: NodeId, parent: Option<NodeId>) -> Result<NodeId> {
        let name = engine.name(this).unwrap_or_default();
        let delay = millis_of(engine, this, "delay").unwrap_or_default();
        Ok(Self::build(engine, parent, &name, delay))
    }
}
