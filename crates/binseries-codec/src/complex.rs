//! # Composite Node
//!
//! [`ComplexField`] serializes a struct by delegating each member to its own
//! child field, in member declaration order. The init step runs every
//! child's init step; the delta step short-circuits on the first child
//! that does not fit.
//!
//! Children are keyed by member name. A member may have no child (it was
//! removed); such members are skipped by the encoder and left at zero by
//! the decoder.
//!
//! ## Header
//! `u32` child count, then per child the member name and the child's full
//! field header.

use core::any::Any;
use core::hash::{Hash, Hasher};

use bytes::{BufMut, BytesMut};

use binseries_core::{BoxError, CodecError, Result, SerializerError, StructType, ValueType};

use crate::field::{Field, FieldBase};
use crate::header::{put_str, write_field, HeaderInput};
use crate::step::{CompileContext, DecodeCtx, DecodeStep, EncodeCtx, EncodeStep};
use crate::store::StateStore;

#[derive(Debug)]
pub struct SubField {
    name: String,
    field: Box<dyn Field>,
}

impl SubField {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field(&self) -> &dyn Field {
        self.field.as_ref()
    }
}

#[derive(Debug)]
pub struct ComplexField {
    base: FieldBase,
    fields: Vec<SubField>,
}

fn expect_struct<'t>(value_type: &'t ValueType) -> Result<&'t StructType> {
    value_type.as_struct().ok_or_else(|| {
        SerializerError::UnsupportedType(format!("{} cannot serialize {value_type}", ComplexField::KIND))
            .into()
    })
}

/// Fixed buffers cannot be delta encoded member by member.
fn reject_fixed_buffers(st: &StructType) -> Result<()> {
    match st
        .members
        .iter()
        .find(|m| matches!(m.ty, ValueType::FixedBuffer { .. }))
    {
        Some(member) => Err(SerializerError::FixedBufferNotSupported {
            type_name: st.name.clone(),
            member: member.name.clone(),
        }
        .into()),
        None => Ok(()),
    }
}

impl ComplexField {
    pub const KIND: &'static str = "ComplexField";

    /// Composite with one default child per member, named `state_name.member`.
    pub fn build(store: &mut StateStore, value_type: &ValueType, state_name: &str) -> Result<Self> {
        let st = expect_struct(value_type)?;
        reject_fixed_buffers(st)?;
        let mut fields = Vec::with_capacity(st.members.len());
        for member in &st.members {
            let child_name = format!("{state_name}.{}", member.name);
            let field = store.create_field(&member.ty, &child_name, true)?;
            fields.push(SubField {
                name: member.name.clone(),
                field,
            });
        }
        Ok(Self {
            base: FieldBase::new(value_type.clone(), state_name),
            fields,
        })
    }

    /// Composite with no children, filled in later by header reload.
    pub fn empty(value_type: &ValueType, state_name: &str) -> Result<Self> {
        reject_fixed_buffers(expect_struct(value_type)?)?;
        Ok(Self {
            base: FieldBase::new(value_type.clone(), state_name),
            fields: Vec::new(),
        })
    }

    pub(crate) fn construct_empty(
        _store: &mut StateStore,
        value_type: &ValueType,
        state_name: &str,
    ) -> std::result::Result<Box<dyn Field>, BoxError> {
        Ok(Box::new(Self::empty(value_type, state_name)?))
    }

    fn struct_type(&self) -> Result<&StructType> {
        expect_struct(self.base.value_type())
    }

    pub fn fields(&self) -> &[SubField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&dyn Field> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.field.as_ref())
    }

    pub fn field_mut(&mut self, name: &str) -> Result<&mut dyn Field> {
        self.base.ensure_mutable()?;
        self.fields
            .iter_mut()
            .find(|f| f.name == name)
            .map(|f| f.field.as_mut())
            .ok_or_else(|| CodecError::out_of_range("name", format!("no sub-field '{name}'")))
    }

    /// Typed access to a child, e.g. to change its scale.
    pub fn field_as_mut<F: Field>(&mut self, name: &str) -> Result<&mut F> {
        self.field_mut(name)?.expect_mut::<F>()
    }

    /// Replaces the child for member `name`, or adds it if the member had none.
    pub fn set_field(&mut self, name: &str, field: Box<dyn Field>) -> Result<()> {
        self.base.ensure_mutable()?;
        self.insert_child(name.to_string(), field)
    }

    pub fn remove_field(&mut self, name: &str) -> Result<Option<Box<dyn Field>>> {
        self.base.ensure_mutable()?;
        Ok(self
            .fields
            .iter()
            .position(|f| f.name == name)
            .map(|idx| self.fields.remove(idx).field))
    }

    /// Position of member `name` among the struct's members and its row offset.
    fn locate(&self, name: &str) -> Result<(usize, usize)> {
        let st = self.struct_type()?;
        let mut offset = 0;
        for (idx, member) in st.members.iter().enumerate() {
            if member.name == name {
                return Ok((idx, offset));
            }
            offset += member.ty.scalar_count();
        }
        Err(CodecError::out_of_range(
            "name",
            format!("{} has no member '{name}'", st.name),
        ))
    }

    fn insert_child(&mut self, name: String, field: Box<dyn Field>) -> Result<()> {
        let (idx, _) = self.locate(&name)?;
        let st = self.struct_type()?;
        let member_ty = &st.members[idx].ty;
        if field.value_type() != member_ty {
            return Err(SerializerError::LayoutMismatch {
                type_name: st.name.clone(),
                detail: format!(
                    "member '{name}' is {member_ty}, field serializes {}",
                    field.value_type()
                ),
            }
            .into());
        }

        if let Some(existing) = self.fields.iter_mut().find(|f| f.name == name) {
            existing.field = field;
            return Ok(());
        }
        let at = self
            .fields
            .iter()
            .position(|f| self.locate(&f.name).map_or(false, |(i, _)| i > idx))
            .unwrap_or(self.fields.len());
        self.fields.insert(at, SubField { name, field });
        Ok(())
    }
}

impl Field for ComplexField {
    fn kind(&self) -> &str {
        Self::KIND
    }

    fn base(&self) -> &FieldBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FieldBase {
        &mut self.base
    }

    fn max_byte_size(&self) -> usize {
        self.fields.iter().map(|f| f.field.max_byte_size()).sum()
    }

    fn write_config(&self, out: &mut BytesMut) {
        out.put_u32_le(self.fields.len() as u32);
        for sub in &self.fields {
            put_str(out, &sub.name);
            write_field(sub.field.as_ref(), out);
        }
    }

    fn read_config(&mut self, input: &mut HeaderInput<'_>) -> Result<()> {
        let count = input.read_u32()? as usize;
        for _ in 0..count {
            let name = input.read_str()?;
            let field = input.read_field()?;
            if self.field(&name).is_some() {
                return Err(SerializerError::InvalidHeader(format!(
                    "duplicate sub-field '{name}' in '{}'",
                    self.base.state_name()
                ))
                .into());
            }
            self.insert_child(name, field)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.fields.iter().try_for_each(|f| f.field.validate())
    }

    fn build_encoder(&self, ctx: &mut CompileContext, pos: usize) -> Result<EncodeStep> {
        let mut inits = Vec::with_capacity(self.fields.len());
        let mut deltas = Vec::with_capacity(self.fields.len());
        for sub in &self.fields {
            let (_, offset) = self.locate(&sub.name)?;
            let step = sub.field.build_encoder(ctx, pos + offset)?;
            inits.push(step.init);
            deltas.push(step.delta);
        }

        Ok(EncodeStep {
            init: Box::new(move |ctx: &mut EncodeCtx<'_>| {
                for init in &inits {
                    init(&mut *ctx)?;
                }
                Ok(())
            }),
            delta: Box::new(move |ctx: &mut EncodeCtx<'_>| {
                for delta in &deltas {
                    if !delta(&mut *ctx)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }),
        })
    }

    fn build_decoder(&self, ctx: &mut CompileContext, pos: usize) -> Result<DecodeStep> {
        let mut inits = Vec::with_capacity(self.fields.len());
        let mut deltas = Vec::with_capacity(self.fields.len());
        for sub in &self.fields {
            let (_, offset) = self.locate(&sub.name)?;
            let step = sub.field.build_decoder(ctx, pos + offset)?;
            inits.push(step.init);
            deltas.push(step.delta);
        }

        Ok(DecodeStep {
            init: Box::new(move |ctx: &mut DecodeCtx<'_>| {
                inits.iter().try_for_each(|init| init(&mut *ctx))
            }),
            delta: Box::new(move |ctx: &mut DecodeCtx<'_>| {
                deltas.iter().try_for_each(|delta| delta(&mut *ctx))
            }),
        })
    }

    fn config_eq(&self, other: &dyn Field) -> bool {
        let Some(other) = other.as_any().downcast_ref::<Self>() else {
            return false;
        };
        self.fields.len() == other.fields.len()
            && self
                .fields
                .iter()
                .zip(&other.fields)
                .all(|(a, b)| a.name == b.name && *a.field == *b.field)
    }

    fn config_hash(&self, mut state: &mut dyn Hasher) {
        state.write_usize(self.fields.len());
        for sub in &self.fields {
            sub.name.hash(&mut state);
            sub.field.hash(&mut state);
        }
    }

    fn freeze(&mut self) {
        for sub in &mut self.fields {
            sub.field.freeze();
        }
        self.base.freeze();
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
