//! Typed properties.
//!
//! A property's type is fixed by its initial value. Every setter goes
//! through [`convert`], a total table over ordered pairs of value types:
//! conversions that make no sense are rejected with a warning and leave the
//! stored value untouched.

use tracing::warn;

use super::{Body, Engine};
use crate::error::{Error, Result};
use crate::types::{NodeId, Value, ValueType};

/// Convert `value` into the `target` type.
///
/// | target \ source | Int | Real | Bool | Text | Ref |
/// |---|---|---|---|---|---|
/// | Int  | = | truncate | 0/1 | parse | - |
/// | Real | widen | = | 0/1 | parse | - |
/// | Bool | != 0 | != 0 | = | `"true"`/`"false"` | - |
/// | Text | decimal | display | `"true"`/`"false"` | = | - |
/// | Ref  | - | - | - | - | = |
///
/// `None` means the conversion is rejected.
pub fn convert(target: ValueType, value: &Value) -> Option<Value> {
    match (target, value) {
        (ValueType::Int, Value::Int(v)) => Some(Value::Int(*v)),
        (ValueType::Int, Value::Real(v)) => Some(Value::Int(v.trunc() as i64)),
        (ValueType::Int, Value::Bool(v)) => Some(Value::Int(i64::from(*v))),
        (ValueType::Int, Value::Text(v)) => {
            let v = v.trim();
            v.parse::<i64>()
                .ok()
                .or_else(|| v.parse::<f64>().ok().map(|f| f.trunc() as i64))
                .map(Value::Int)
        }

        (ValueType::Real, Value::Int(v)) => Some(Value::Real(*v as f64)),
        (ValueType::Real, Value::Real(v)) => Some(Value::Real(*v)),
        (ValueType::Real, Value::Bool(v)) => Some(Value::Real(if *v { 1.0 } else { 0.0 })),
        (ValueType::Real, Value::Text(v)) => v.trim().parse::<f64>().ok().map(Value::Real),

        (ValueType::Bool, Value::Int(v)) => Some(Value::Bool(*v != 0)),
        (ValueType::Bool, Value::Real(v)) => Some(Value::Bool(*v != 0.0)),
        (ValueType::Bool, Value::Bool(v)) => Some(Value::Bool(*v)),
        (ValueType::Bool, Value::Text(v)) => match v.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },

        (ValueType::Text, Value::Text(v)) => Some(Value::Text(v.clone())),
        (ValueType::Text, Value::Int(_) | Value::Real(_) | Value::Bool(_)) => {
            Some(Value::Text(value.to_string()))
        }

        (ValueType::Ref, Value::Ref(v)) => Some(Value::Ref(*v)),

        (_, Value::Ref(_)) | (ValueType::Ref, _) => None,
    }
}

/// Export tag of a property holding `value`.
pub(crate) fn type_tag(value: &Value) -> &'static str {
    match value {
        Value::Int(_) => "core:intproperty",
        Value::Real(_) => "core:doubleproperty",
        Value::Bool(_) => "core:boolproperty",
        Value::Text(_) => "core:textproperty",
        Value::Ref(_) => "core:refproperty",
    }
}

impl Engine {
    /// Store a value into a property.
    ///
    /// The value is converted to the property's type first; a rejected
    /// conversion logs a warning and changes nothing. With `propagate` set
    /// and the property activable, its activation couplings are notified,
    /// and for a boolean exactly one of its `true`/`false` triggers.
    pub fn set_value(&mut self, id: NodeId, value: impl Into<Value>, propagate: bool) -> Result<()> {
        let value = value.into();
        let node = self.nodes.get_mut(id).ok_or(Error::StaleNode(id))?;
        let Body::Property(stored) = &mut node.body else {
            return Err(Error::NotAProperty(id));
        };
        let target = stored.value_type();
        let Some(converted) = convert(target, &value) else {
            warn!(
                property = %node.name,
                from = %value.value_type(),
                to = %target,
                %value,
                "undefined conversion, value left unchanged"
            );
            return Ok(());
        };
        let trigger = match converted {
            Value::Bool(true) => Some("true"),
            Value::Bool(false) => Some("false"),
            _ => None,
        };
        *stored = converted;

        if propagate && self.is_activable(id) {
            self.notify_activation(id);
            if let Some(trigger) = trigger.and_then(|name| self.child(id, name)) {
                self.notify_activation(trigger);
            }
        }
        Ok(())
    }

    /// Current value of a property. Never fails on a live property.
    pub fn value(&self, id: NodeId) -> Result<Value> {
        match &self.nodes.get(id).ok_or(Error::StaleNode(id))?.body {
            Body::Property(value) => Ok(value.clone()),
            _ => Err(Error::NotAProperty(id)),
        }
    }

    pub fn value_type(&self, id: NodeId) -> Result<ValueType> {
        match &self.nodes.get(id).ok_or(Error::StaleNode(id))?.body {
            Body::Property(value) => Ok(value.value_type()),
            _ => Err(Error::NotAProperty(id)),
        }
    }

    pub fn is_property(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id).map(|n| &n.body), Some(Body::Property(_)))
    }

    /// The property's value seen as an integer.
    pub fn int_value(&self, id: NodeId) -> Result<i64> {
        Ok(self.typed(id, ValueType::Int)?.and_then(|v| match v {
            Value::Int(v) => Some(v),
            _ => None,
        }).unwrap_or_default())
    }

    pub fn real_value(&self, id: NodeId) -> Result<f64> {
        Ok(self.typed(id, ValueType::Real)?.and_then(|v| match v {
            Value::Real(v) => Some(v),
            _ => None,
        }).unwrap_or_default())
    }

    pub fn bool_value(&self, id: NodeId) -> Result<bool> {
        Ok(self.typed(id, ValueType::Bool)?.and_then(|v| match v {
            Value::Bool(v) => Some(v),
            _ => None,
        }).unwrap_or_default())
    }

    pub fn text_value(&self, id: NodeId) -> Result<String> {
        Ok(self.typed(id, ValueType::Text)?.and_then(|v| match v {
            Value::Text(v) => Some(v),
            _ => None,
        }).unwrap_or_default())
    }

    pub fn ref_value(&self, id: NodeId) -> Result<Option<NodeId>> {
        Ok(self.typed(id, ValueType::Ref)?.and_then(|v| match v {
            Value::Ref(v) => v,
            _ => None,
        }))
    }

    fn typed(&self, id: NodeId, target: ValueType) -> Result<Option<Value>> {
        let value = self.value(id)?;
        let converted = convert(target, &value);
        if converted.is_none() {
            warn!(?id, from = %value.value_type(), to = %target, "undefined conversion");
        }
        Ok(converted)
    }

    /// The spike fired when a boolean property is set to true.
    pub fn true_trigger(&self, id: NodeId) -> Option<NodeId> {
        self.bool_trigger(id, "true")
    }

    /// The spike fired when a boolean property is set to false.
    pub fn false_trigger(&self, id: NodeId) -> Option<NodeId> {
        self.bool_trigger(id, "false")
    }

    fn bool_trigger(&self, id: NodeId, name: &str) -> Option<NodeId> {
        match self.value_type(id) {
            Ok(ValueType::Bool) => self.child(id, name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rstest::rstest;
    use slotmap::SlotMap;

    use super::*;
    use crate::types::EventKind;

    #[rstest]
    #[case(ValueType::Int, Value::Real(3.9), Some(Value::Int(3)))]
    #[case(ValueType::Int, Value::Real(-3.9), Some(Value::Int(-3)))]
    #[case(ValueType::Int, Value::Bool(true), Some(Value::Int(1)))]
    #[case(ValueType::Int, Value::from(" 42 "), Some(Value::Int(42)))]
    #[case(ValueType::Int, Value::from("2.5"), Some(Value::Int(2)))]
    #[case(ValueType::Int, Value::from("many"), None)]
    #[case(ValueType::Real, Value::Int(2), Some(Value::Real(2.0)))]
    #[case(ValueType::Real, Value::Bool(false), Some(Value::Real(0.0)))]
    #[case(ValueType::Real, Value::from("0.25"), Some(Value::Real(0.25)))]
    #[case(ValueType::Real, Value::from("x"), None)]
    #[case(ValueType::Bool, Value::Int(0), Some(Value::Bool(false)))]
    #[case(ValueType::Bool, Value::Int(-7), Some(Value::Bool(true)))]
    #[case(ValueType::Bool, Value::Real(0.5), Some(Value::Bool(true)))]
    #[case(ValueType::Bool, Value::from("true"), Some(Value::Bool(true)))]
    #[case(ValueType::Bool, Value::from("false"), Some(Value::Bool(false)))]
    #[case(ValueType::Bool, Value::from("yes"), None)]
    #[case(ValueType::Text, Value::Int(12), Some(Value::from("12")))]
    #[case(ValueType::Text, Value::Real(1.5), Some(Value::from("1.5")))]
    #[case(ValueType::Text, Value::Bool(true), Some(Value::from("true")))]
    #[case(ValueType::Text, Value::Ref(None), None)]
    #[case(ValueType::Int, Value::Ref(None), None)]
    #[case(ValueType::Ref, Value::Int(1), None)]
    #[case(ValueType::Ref, Value::from("node"), None)]
    fn test_conversion_table(
        #[case] target: ValueType,
        #[case] value: Value,
        #[case] expected: Option<Value>,
    ) {
        assert_eq!(convert(target, &value), expected);
    }

    #[test]
    fn test_ref_to_ref_is_identity() {
        let mut arena: SlotMap<NodeId, ()> = SlotMap::with_key();
        let id = arena.insert(());
        assert_eq!(convert(ValueType::Ref, &Value::Ref(Some(id))), Some(Value::Ref(Some(id))));
    }

    #[test]
    fn test_rejected_conversion_keeps_value() {
        let mut engine = Engine::default();
        let flag = engine.add_bool(None, "flag", true);
        let target = engine.add_spike(None, "target");

        engine.set_value(flag, "maybe", true).unwrap();
        assert!(engine.bool_value(flag).unwrap());
        engine.set_value(flag, target, true).unwrap();
        assert!(engine.bool_value(flag).unwrap());
        assert_eq!(engine.graph().pending_count(), 0);
    }

    #[test]
    fn test_type_is_fixed_by_initial_value() {
        let mut engine = Engine::default();
        let count = engine.add_int(None, "count", 0);
        engine.set_value(count, 7.8, false).unwrap();
        assert_eq!(engine.value(count).unwrap(), Value::Int(7));
        assert_eq!(engine.real_value(count).unwrap(), 7.0);
        assert_eq!(engine.text_value(count).unwrap(), "7");
    }

    #[test]
    fn test_not_a_property() {
        let mut engine = Engine::default();
        let spike = engine.add_spike(None, "spike");
        assert!(matches!(engine.set_value(spike, 1, true), Err(Error::NotAProperty(_))));
        assert!(matches!(engine.value(spike), Err(Error::NotAProperty(_))));
    }

    fn watch(engine: &mut Engine, source: NodeId) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let action = engine.add_action(None, "", move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        engine
            .add_coupling(source, EventKind::Activation, action, EventKind::Activation)
            .unwrap();
        count
    }

    #[test]
    fn test_silent_set_notifies_nobody() {
        let mut engine = Engine::default();
        let x = engine.add_int(None, "x", 0);
        let seen = watch(&mut engine, x);

        engine.set_value(x, 5, false).unwrap();
        engine.exec();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(engine.int_value(x).unwrap(), 5);

        engine.set_value(x, 6, true).unwrap();
        engine.exec();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bool_fires_exactly_one_trigger() {
        let mut engine = Engine::default();
        let flag = engine.add_bool(None, "flag", false);
        let (true_trigger, false_trigger) = (
            engine.true_trigger(flag).unwrap(),
            engine.false_trigger(flag).unwrap(),
        );
        let on_true = watch(&mut engine, true_trigger);
        let on_false = watch(&mut engine, false_trigger);
        let on_change = watch(&mut engine, flag);

        engine.set_value(flag, true, true).unwrap();
        engine.exec();
        assert_eq!(on_true.load(Ordering::SeqCst), 1);
        assert_eq!(on_false.load(Ordering::SeqCst), 0);
        assert_eq!(on_change.load(Ordering::SeqCst), 1);

        engine.set_value(flag, 0, true).unwrap();
        engine.exec();
        assert_eq!(on_true.load(Ordering::SeqCst), 1);
        assert_eq!(on_false.load(Ordering::SeqCst), 1);
        assert_eq!(on_change.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_bool_triggers_are_model_spikes_behind_edges() {
        let mut engine = Engine::default();
        let flag = engine.add_bool(None, "flag", false);
        let on_true = engine.true_trigger(flag).unwrap();
        assert!(engine.is_model(on_true));
        assert!(engine.graph().has_edge(flag, on_true));
        assert_eq!(engine.find(flag, "false"), engine.false_trigger(flag));
        let n = engine.add_int(None, "n", 1);
        assert_eq!(engine.true_trigger(n), None);
    }

    #[test]
    fn test_property_under_inactive_parent_does_not_propagate() {
        let mut engine = Engine::default();
        let root = engine.add_container(None, "root");
        let x = engine.add_int(Some(root), "x", 0);
        let seen = watch(&mut engine, x);

        engine.set_value(x, 1, true).unwrap();
        engine.exec();
        assert_eq!(seen.load(Ordering::SeqCst), 0);

        engine.activation(root);
        engine.set_value(x, 2, true).unwrap();
        engine.exec();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
