//! Periodic clock.

use std::time::Duration;

use tracing::error;

use super::{TimedSource, millis_of};
use crate::engine::{Engine, NodeKind, Serializer};
use crate::error::Result;
use crate::process::Process;
use crate::types::NodeId;

/// Clocks never spin faster than this, whatever `period` says.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Fires `tick` every `period` milliseconds while activated.
///
/// Children:
/// - `period` (integer, ms): re-read after every firing
/// - `elapsed` (real, ms): measured wait of the last firing, set before `tick`
/// - `tick` (spike)
pub struct Clock {
    source: TimedSource,
}

impl Clock {
    /// Add a clock under `parent`.
    #[track_caller]
    pub fn add(engine: &mut Engine, parent: Option<NodeId>, name: &str, period: Duration) -> NodeId {
        let id = Self::build(engine, parent, name, period);
        engine.finalize(id);
        id
    }

    #[track_caller]
    fn build(engine: &mut Engine, parent: Option<NodeId>, name: &str, period: Duration) -> NodeId {
        let clock = Clock {
            source: TimedSource::new(),
        };
        let id = engine.create(parent, name, NodeKind::Process(Box::new(clock)));
        let ms = i64::try_from(period.as_millis()).unwrap_or(i64::MAX);
        engine.add_int(Some(id), "period", ms);
        engine.add_real(Some(id), "elapsed", 0.0);
        engine.add_spike(Some(id), "tick");
        id
    }

    fn period(engine: &Engine, this: NodeId) -> Duration {
        millis_of(engine, this, "period").unwrap_or_default().max(MIN_PERIOD)
    }
}

impl Process for Clock {
    fn type_name(&self) -> &'static str {
        "base:clock"
    }

    fn activate(&mut self, engine: &mut Engine, this: NodeId) {
        let period = Self::period(engine, this);
        let started = self.source.start(engine, this, period, |engine, this, elapsed| {
            if let Some(property) = engine.child(this, "elapsed") {
                engine.set_value(property, elapsed.as_secs_f64() * 1000.0, true)?;
            }
            if let Some(tick) = engine.child(this, "tick") {
                engine.activation(tick);
            }
            Ok(Some(Self::period(engine, this)))
        });
        if let Err(err) = started {
            error!(%err, "clock could not start");
        }
    }

    fn deactivate(&mut self, _: &mut Engine, _: NodeId) {
        self.source.stop();
    }

    fn serialize(&self, engine: &Engine, this: NodeId, out: &mut dyn Serializer) {
        out.start(self.type_name());
        out.text_attribute("id", &engine.name(this).unwrap_or_default());
        let period = millis_of(engine, this, "period").unwrap_or_default();
        out.int_attribute("period", i64::try_from(period.as_millis()).unwrap_or(i64::MAX));
        out.end();
    }

    fn duplicate(&self, engine: &mut Engine, this: NodeId, parent: Option<NodeId>) -> Result<NodeId> {
        let name = engine.name(this).unwrap_or_default();
        let period = millis_of(engine, this, "period").unwrap_or_default();
        Ok(Self::build(engine, parent, &name, period))
    }
}
