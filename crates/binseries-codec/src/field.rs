//! # Field Nodes
//!
//! A field tree mirrors the record's shape: leaves encode one primitive,
//! composite nodes delegate to their children in declaration order. Every
//! node carries a [`FieldBase`] with the persisted version, the value type
//! it serializes and the name of its encoding state.
//!
//! Nodes are mutable until frozen. Freezing is recursive and one-way; after
//! it every setter fails with `AlreadyInitialized`.
//!
//! Two nodes are structurally equal when they have the same kind, base and
//! kind-specific configuration. Equal trees share one compiled procedure
//! pair through the cache.

use core::any::Any;
use core::fmt;
use core::hash::{Hash, Hasher};

use bytes::BytesMut;

use binseries_core::{CodecError, FormatVersion, InitGuard, Result, SerializerError, ValueType};

use crate::header::HeaderInput;
use crate::step::{CompileContext, DecodeStep, EncodeStep};

#[derive(Debug, Clone)]
pub struct FieldBase {
    version: FormatVersion,
    value_type: ValueType,
    state_name: String,
    guard: InitGuard,
}

impl FieldBase {
    pub fn new(value_type: ValueType, state_name: impl Into<String>) -> Self {
        Self {
            version: FormatVersion::V0,
            value_type,
            state_name: state_name.into(),
            guard: InitGuard::new("field"),
        }
    }

    #[inline]
    pub fn version(&self) -> FormatVersion {
        self.version
    }

    pub(crate) fn set_version(&mut self, version: FormatVersion) {
        self.version = version;
    }

    #[inline]
    pub fn value_type(&self) -> &ValueType {
        &self.value_type
    }

    #[inline]
    pub fn state_name(&self) -> &str {
        &self.state_name
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.guard.is_initialized()
    }

    #[inline]
    pub fn ensure_mutable(&self) -> Result<()> {
        self.guard.ensure_mutable()
    }

    pub fn freeze(&mut self) {
        self.guard.mark_initialized();
    }
}

impl PartialEq for FieldBase {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.value_type == other.value_type
            && self.state_name == other.state_name
    }
}

impl Eq for FieldBase {}

impl Hash for FieldBase {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.version.hash(state);
        self.value_type.hash(state);
        self.state_name.hash(state);
    }
}

/// One node of a field tree.
pub trait Field: fmt::Debug + Send + Sync + 'static {
    /// Persisted kind name. Must match the name the node's constructor is
    /// registered under in the [`CodecRegistry`](crate::CodecRegistry).
    fn kind(&self) -> &str;

    fn base(&self) -> &FieldBase;

    fn base_mut(&mut self) -> &mut FieldBase;

    /// Upper bound of the bytes one record may occupy.
    fn max_byte_size(&self) -> usize;

    /// Scalars this node reads from and writes to a flattened row.
    fn scalar_count(&self) -> usize {
        self.base().value_type().scalar_count()
    }

    fn is_valid_version(&self, version: FormatVersion) -> bool {
        version == FormatVersion::V0
    }

    /// Writes kind-specific configuration after the common node header.
    fn write_config(&self, _out: &mut BytesMut) {}

    /// Reads what [`Field::write_config`] wrote.
    fn read_config(&mut self, _input: &mut HeaderInput<'_>) -> Result<()> {
        Ok(())
    }

    /// Checked once before the tree is frozen.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Encoder steps reading the row from position `pos`.
    fn build_encoder(&self, ctx: &mut CompileContext, pos: usize) -> Result<EncodeStep>;

    /// Decoder steps writing the row from position `pos`.
    fn build_decoder(&self, ctx: &mut CompileContext, pos: usize) -> Result<DecodeStep>;

    /// Compares kind-specific configuration; `other` already has the same kind.
    fn config_eq(&self, other: &dyn Field) -> bool;

    fn config_hash(&self, state: &mut dyn Hasher);

    fn freeze(&mut self) {
        self.base_mut().freeze();
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn Field {
    pub fn downcast_ref<F: Field>(&self) -> Option<&F> {
        self.as_any().downcast_ref::<F>()
    }

    pub fn downcast_mut<F: Field>(&mut self) -> Option<&mut F> {
        self.as_any_mut().downcast_mut::<F>()
    }

    /// Like [`downcast_mut`](Self::downcast_mut) but reports the mismatch.
    pub fn expect_mut<F: Field>(&mut self) -> Result<&mut F> {
        let kind = self.kind().to_string();
        self.downcast_mut::<F>().ok_or_else(|| {
            CodecError::out_of_range(
                "field",
                format!("{kind} is not a {}", core::any::type_name::<F>()),
            )
        })
    }

    #[inline]
    pub fn state_name(&self) -> &str {
        self.base().state_name()
    }

    #[inline]
    pub fn value_type(&self) -> &ValueType {
        self.base().value_type()
    }

    #[inline]
    pub fn version(&self) -> FormatVersion {
        self.base().version()
    }
}

impl PartialEq for dyn Field {
    fn eq(&self, other: &Self) -> bool {
        self.kind() == other.kind() && self.base() == other.base() && self.config_eq(other)
    }
}

impl Eq for dyn Field {}

impl Hash for dyn Field {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        self.base().hash(state);
        self.config_hash(state);
    }
}

/// Fails unless `value_type` is a single primitive; used by leaf constructors.
pub(crate) fn expect_primitive(
    kind: &str,
    value_type: &ValueType,
) -> std::result::Result<binseries_core::Primitive, SerializerError> {
    value_type
        .as_primitive()
        .ok_or_else(|| SerializerError::UnsupportedType(format!("{kind} cannot serialize {value_type}")))
}
