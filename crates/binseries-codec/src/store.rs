//! # Field-Tree Builder Store
//!
//! [`StateStore`] is what node constructors see while a tree is being
//! built or reloaded. It owns the state-name registry (so conflicting state
//! types fail at construction time), the custom codec registry, an optional
//! caller-supplied field factory and the codec defaults.
//!
//! ## Inference order
//! 1. The caller's factory, when `allow_custom` is set and one is installed.
//! 2. Arrays and fixed buffers are rejected.
//! 3. Primitives: bool and bytes are stored raw, other integers and char use
//!    a scaled delta integer field, floats use a scaled delta float field.
//! 4. A struct naming a custom codec is built by that codec's constructor.
//! 5. Any other struct becomes a composite of per-member fields.

use core::fmt;
use std::sync::Arc;

use binseries_core::{
    Category, CodecConfig, CodecError, InitGuard, Primitive, Result, SerializerError, ValueType,
};

use crate::complex::ComplexField;
use crate::delta_float::ScaledDeltaFloatField;
use crate::delta_int::ScaledDeltaIntField;
use crate::field::Field;
use crate::registry::CodecRegistry;
use crate::simple::SimpleField;
use crate::state::{StateRegistry, StateSlot};

/// Caller hook consulted before automatic inference. `Ok(None)` falls
/// through to the defaults.
pub type FieldFactory = Arc<
    dyn Fn(&mut StateStore, &ValueType, &str) -> Result<Option<Box<dyn Field>>> + Send + Sync,
>;

pub struct StateStore {
    states: StateRegistry,
    registry: Arc<CodecRegistry>,
    factory: Option<FieldFactory>,
    config: CodecConfig,
    guard: InitGuard,
}

impl StateStore {
    pub fn new(config: CodecConfig, registry: Arc<CodecRegistry>) -> Self {
        Self {
            states: StateRegistry::new(),
            registry,
            factory: None,
            config,
            guard: InitGuard::new("state store"),
        }
    }

    pub fn with_factory(mut self, factory: FieldFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn config(&self) -> &CodecConfig {
        &self.config
    }

    pub fn registry(&self) -> &CodecRegistry {
        &self.registry
    }

    pub fn states(&self) -> &StateRegistry {
        &self.states
    }

    /// Declares the encoding state `name` of type `kind`.
    pub fn get_or_create_state(&mut self, name: &str, kind: Primitive) -> Result<(StateSlot, bool)> {
        self.guard.ensure_mutable()?;
        Ok(self.states.get_or_create(name, kind)?)
    }

    /// Builds the default field for `value_type`, named `state_name`.
    pub fn create_field(
        &mut self,
        value_type: &ValueType,
        state_name: &str,
        allow_custom: bool,
    ) -> Result<Box<dyn Field>> {
        self.guard.ensure_mutable()?;

        if allow_custom {
            if let Some(factory) = self.factory.clone() {
                if let Some(field) = factory(self, value_type, state_name)? {
                    return Ok(field);
                }
            }
        }

        match value_type {
            ValueType::Array(_) => {
                Err(SerializerError::ArrayNotSupported(value_type.to_string()).into())
            }
            ValueType::FixedBuffer { .. } => {
                Err(SerializerError::UnsupportedType(value_type.to_string()).into())
            }
            ValueType::Primitive(p) => Ok(match p.category() {
                Category::Raw => Box::new(SimpleField::new(self, value_type, state_name)?),
                Category::Integer => {
                    Box::new(ScaledDeltaIntField::new(self, value_type, state_name)?)
                }
                Category::Float => {
                    Box::new(ScaledDeltaFloatField::new(self, value_type, state_name)?)
                }
            }),
            ValueType::Struct(s) => match &s.codec {
                Some(codec) => {
                    let ctor = self.registry.resolve(codec).ok_or_else(|| {
                        SerializerError::UnknownCodec {
                            codec: codec.clone(),
                            type_name: s.name.clone(),
                        }
                    })?;
                    ctor(self, value_type, state_name).map_err(|source| {
                        CodecError::from(SerializerError::CustomField {
                            codec: codec.clone(),
                            type_name: s.name.clone(),
                            source,
                        })
                    })
                }
                None => Ok(Box::new(ComplexField::build(self, value_type, state_name)?)),
            },
        }
    }

    pub(crate) fn freeze(&mut self) {
        self.guard.mark_initialized();
    }
}

impl fmt::Debug for StateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStore")
            .field("states", &self.states)
            .field("registry", &self.registry)
            .field("factory", &self.factory.is_some())
            .field("config", &self.config)
            .finish()
    }
}
