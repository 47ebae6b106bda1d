//! Encoding-state slots.
//!
//! Delta encoders carry the previous record's value from one record to the
//! next. Each such value lives in a named, typed slot. Names are unique in a
//! tree; asking for an existing name with another type is a configuration
//! error. The slot values themselves live in a [`StateFrame`] created fresh
//! for every pack or unpack call.

use std::collections::HashMap;

use binseries_core::{Primitive, Scalar, ScalarValue, SerializerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSlot {
    index: usize,
    kind: Primitive,
}

impl StateSlot {
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline]
    pub fn kind(&self) -> Primitive {
        self.kind
    }
}

#[derive(Debug, Default, Clone)]
pub struct StateRegistry {
    slots: HashMap<String, StateSlot>,
    layout: Vec<Primitive>,
}

impl StateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot for `name` and whether this call created it. The
    /// creator is responsible for initializing the value.
    pub fn get_or_create(
        &mut self,
        name: &str,
        kind: Primitive,
    ) -> Result<(StateSlot, bool), SerializerError> {
        if let Some(slot) = self.slots.get(name) {
            if slot.kind != kind {
                return Err(SerializerError::StateTypeMismatch {
                    name: name.to_string(),
                    requested: kind,
                    existing: slot.kind,
                });
            }
            return Ok((*slot, false));
        }

        let slot = StateSlot {
            index: self.layout.len(),
            kind,
        };
        self.layout.push(kind);
        self.slots.insert(name.to_string(), slot);
        Ok((slot, true))
    }

    pub fn get(&self, name: &str) -> Option<StateSlot> {
        self.slots.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.layout.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.is_empty()
    }

    /// Slot kinds by index.
    pub fn layout(&self) -> &[Primitive] {
        &self.layout
    }
}

/// Per-invocation slot values.
#[derive(Debug, Clone)]
pub struct StateFrame {
    values: Vec<Scalar>,
}

impl StateFrame {
    pub fn new(layout: &[Primitive]) -> Self {
        Self {
            values: layout.iter().map(|p| Scalar::zero(*p)).collect(),
        }
    }

    #[inline]
    pub fn get<P: ScalarValue>(&self, slot: StateSlot) -> Result<P, SerializerError> {
        self.values
            .get(slot.index)
            .copied()
            .and_then(P::from_scalar)
            .ok_or_else(|| SerializerError::LayoutMismatch {
                type_name: P::PRIMITIVE.to_string(),
                detail: format!("state slot {} holds {}", slot.index, slot.kind),
            })
    }

    #[inline]
    pub fn set<P: ScalarValue>(&mut self, slot: StateSlot, value: P) {
        debug_assert_eq!(P::PRIMITIVE, slot.kind);
        if let Some(v) = self.values.get_mut(slot.index) {
            *v = value.into_scalar();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_name_same_type_is_shared() {
        let mut reg = StateRegistry::new();
        let (a, created_a) = reg.get_or_create("root.ts", Primitive::I64).unwrap();
        let (b, created_b) = reg.get_or_create("root.ts", Primitive::I64).unwrap();
        assert!(created_a);
        assert!(!created_b);
        assert_eq!(a, b);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_type_mismatch_is_rejected() {
        let mut reg = StateRegistry::new();
        reg.get_or_create("root.ts", Primitive::I64).unwrap();
        let err = reg.get_or_create("root.ts", Primitive::F64).unwrap_err();
        assert!(matches!(
            err,
            SerializerError::StateTypeMismatch {
                requested: Primitive::F64,
                existing: Primitive::I64,
                ..
            }
        ));
    }

    #[test]
    fn test_frame_roundtrip() {
        let mut reg = StateRegistry::new();
        let (slot, _) = reg.get_or_create("x", Primitive::I64).unwrap();
        let mut frame = StateFrame::new(reg.layout());
        assert_eq!(frame.get::<i64>(slot).unwrap(), 0);
        frame.set(slot, -42i64);
        assert_eq!(frame.get::<i64>(slot).unwrap(), -42);
        assert!(frame.get::<f64>(slot).is_err());
    }
}
