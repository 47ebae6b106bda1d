//! Frozen field trees.

use core::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use binseries_core::{CodecConfig, Primitive, Result};

use crate::field::Field;
use crate::header::{write_field, HeaderInput};
use crate::registry::CodecRegistry;
use crate::store::StateStore;

/// A frozen field tree; the cache key for compiled block procedures.
///
/// Equality and hashing are structural, so two independently built trees
/// for the same record shape and configuration compare equal.
#[derive(Debug)]
pub struct FieldTree {
    root: Box<dyn Field>,
    layout: Vec<Primitive>,
}

impl FieldTree {
    /// Validates and freezes `root`.
    pub fn new(root: Box<dyn Field>) -> Result<Self> {
        let layout = Self::check(root.as_ref())?;
        Ok(Self::from_checked(root, layout))
    }

    /// Validates `root` and returns its flattened row layout.
    pub(crate) fn check(root: &dyn Field) -> Result<Vec<Primitive>> {
        root.validate()?;
        let mut layout = Vec::with_capacity(root.scalar_count());
        root.value_type().flat_layout(&mut layout)?;
        Ok(layout)
    }

    pub(crate) fn from_checked(mut root: Box<dyn Field>, layout: Vec<Primitive>) -> Self {
        root.freeze();
        Self { root, layout }
    }

    /// Rebuilds a tree from a persisted header without any record type.
    pub fn read(
        buf: &mut Bytes,
        registry: Arc<CodecRegistry>,
        config: &CodecConfig,
    ) -> Result<Self> {
        let mut store = StateStore::new(config.clone(), registry);
        let root = HeaderInput::new(buf, &mut store).read_field()?;
        store.freeze();
        Self::new(root)
    }

    pub fn root(&self) -> &dyn Field {
        self.root.as_ref()
    }

    /// Primitive kinds of the flattened row this tree encodes.
    pub fn layout(&self) -> &[Primitive] {
        &self.layout
    }

    /// Upper bound of the encoded size of one record.
    pub fn max_record_size(&self) -> usize {
        self.root.max_byte_size()
    }

    pub fn write(&self, out: &mut BytesMut) {
        write_field(self.root.as_ref(), out);
    }
}

impl PartialEq for FieldTree {
    fn eq(&self, other: &Self) -> bool {
        *self.root == *other.root
    }
}

impl Eq for FieldTree {}

impl Hash for FieldTree {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.root.hash(state);
    }
}
