//! Name-to-constructor table for field kinds.
//!
//! Header reload resolves every persisted kind name here, and a struct that
//! names a custom codec is built by the constructor registered under that
//! name. The four built-in kinds are always present.

use std::collections::HashMap;

use binseries_core::{BoxError, CodecError, Result, ValueType};

use crate::complex::ComplexField;
use crate::delta_float::ScaledDeltaFloatField;
use crate::delta_int::ScaledDeltaIntField;
use crate::field::Field;
use crate::simple::SimpleField;
use crate::store::StateStore;

/// Three-argument node constructor: builder store, value type, state name.
pub type FieldConstructor =
    fn(&mut StateStore, &ValueType, &str) -> std::result::Result<Box<dyn Field>, BoxError>;

#[derive(Debug, Clone)]
pub struct CodecRegistry {
    ctors: HashMap<String, FieldConstructor>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        let mut ctors: HashMap<String, FieldConstructor> = HashMap::new();
        ctors.insert(SimpleField::KIND.to_string(), SimpleField::construct);
        ctors.insert(ScaledDeltaIntField::KIND.to_string(), ScaledDeltaIntField::construct);
        ctors.insert(ScaledDeltaFloatField::KIND.to_string(), ScaledDeltaFloatField::construct);
        ctors.insert(ComplexField::KIND.to_string(), ComplexField::construct_empty);
        Self { ctors }
    }

    /// Adds a custom kind. Names are unique, built-ins included.
    pub fn register(&mut self, name: impl Into<String>, ctor: FieldConstructor) -> Result<()> {
        let name = name.into();
        if self.ctors.contains_key(&name) {
            return Err(CodecError::out_of_range(
                "name",
                format!("field kind '{name}' is already registered"),
            ));
        }
        tracing::debug!("CodecRegistry: registered field kind '{}'", name);
        self.ctors.insert(name, ctor);
        Ok(())
    }

    #[inline]
    pub fn resolve(&self, name: &str) -> Option<FieldConstructor> {
        self.ctors.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ctors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.ctors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ctors.is_empty()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}
