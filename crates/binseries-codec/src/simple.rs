use core::any::Any;
use core::hash::Hasher;

use binseries_buffer::CodecReader;
use binseries_core::{BoxError, Primitive, Result, Scalar, SerializerError, ValueType};

use crate::field::{expect_primitive, Field, FieldBase};
use crate::step::{CompileContext, DecodeCtx, DecodeStep, EncodeCtx, EncodeStep};
use crate::store::StateStore;

/// Stores a primitive verbatim in little-endian order, with no delta and
/// no state. The default for `bool`, `u8` and `i8`.
#[derive(Debug)]
pub struct SimpleField {
    base: FieldBase,
    primitive: Primitive,
}

impl SimpleField {
    pub const KIND: &'static str = "SimpleField";

    pub fn new(_store: &mut StateStore, value_type: &ValueType, state_name: &str) -> Result<Self> {
        let primitive = expect_primitive(Self::KIND, value_type)?;
        Ok(Self {
            base: FieldBase::new(value_type.clone(), state_name),
            primitive,
        })
    }

    pub(crate) fn construct(
        store: &mut StateStore,
        value_type: &ValueType,
        state_name: &str,
    ) -> std::result::Result<Box<dyn Field>, BoxError> {
        Ok(Box::new(Self::new(store, value_type, state_name)?))
    }

    pub fn primitive(&self) -> Primitive {
        self.primitive
    }
}

/// Little-endian bytes of `scalar`; returns the used length of `out`.
fn scalar_to_le(scalar: Scalar, out: &mut [u8; 8]) -> usize {
    fn put<const N: usize>(bytes: [u8; N], out: &mut [u8; 8]) -> usize {
        out[..N].copy_from_slice(&bytes);
        N
    }
    match scalar {
        Scalar::Bool(v) => put([v as u8], out),
        Scalar::U8(v) => put(v.to_le_bytes(), out),
        Scalar::I8(v) => put(v.to_le_bytes(), out),
        Scalar::Char(v) => put((v as u32).to_le_bytes(), out),
        Scalar::I16(v) => put(v.to_le_bytes(), out),
        Scalar::U16(v) => put(v.to_le_bytes(), out),
        Scalar::I32(v) => put(v.to_le_bytes(), out),
        Scalar::U32(v) => put(v.to_le_bytes(), out),
        Scalar::I64(v) => put(v.to_le_bytes(), out),
        Scalar::U64(v) => put(v.to_le_bytes(), out),
        Scalar::F32(v) => put(v.to_le_bytes(), out),
        Scalar::F64(v) => put(v.to_le_bytes(), out),
    }
}

fn scalar_from_le(
    p: Primitive,
    reader: &mut CodecReader,
    state_name: &str,
) -> std::result::Result<Scalar, SerializerError> {
    Ok(match p {
        Primitive::Bool => Scalar::Bool(reader.read_raw::<1>()?[0] != 0),
        Primitive::U8 => Scalar::U8(u8::from_le_bytes(reader.read_raw()?)),
        Primitive::I8 => Scalar::I8(i8::from_le_bytes(reader.read_raw()?)),
        Primitive::Char => {
            let raw = u32::from_le_bytes(reader.read_raw()?);
            Scalar::Char(char::from_u32(raw).ok_or_else(|| SerializerError::ValueOutOfRange {
                state_name: state_name.to_string(),
                value: format!("{raw:#x}"),
                reason: "not a valid char",
            })?)
        }
        Primitive::I16 => Scalar::I16(i16::from_le_bytes(reader.read_raw()?)),
        Primitive::U16 => Scalar::U16(u16::from_le_bytes(reader.read_raw()?)),
        Primitive::I32 => Scalar::I32(i32::from_le_bytes(reader.read_raw()?)),
        Primitive::U32 => Scalar::U32(u32::from_le_bytes(reader.read_raw()?)),
        Primitive::I64 => Scalar::I64(i64::from_le_bytes(reader.read_raw()?)),
        Primitive::U64 => Scalar::U64(u64::from_le_bytes(reader.read_raw()?)),
        Primitive::F32 => Scalar::F32(f32::from_le_bytes(reader.read_raw()?)),
        Primitive::F64 => Scalar::F64(f64::from_le_bytes(reader.read_raw()?)),
    })
}

impl Field for SimpleField {
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
        self.primitive.byte_width()
    }

    fn build_encoder(&self, _ctx: &mut CompileContext, pos: usize) -> Result<EncodeStep> {
        let p = self.primitive;
        Ok(EncodeStep {
            init: Box::new(move |ctx: &mut EncodeCtx<'_>| {
                let mut tmp = [0u8; 8];
                let len = scalar_to_le(ctx.scalar(pos, p)?, &mut tmp);
                ctx.writer.write_raw(&tmp[..len])
            }),
            delta: Box::new(move |ctx: &mut EncodeCtx<'_>| {
                let mut tmp = [0u8; 8];
                let len = scalar_to_le(ctx.scalar(pos, p)?, &mut tmp);
                Ok(ctx.writer.try_write_raw(&tmp[..len]))
            }),
        })
    }

    fn build_decoder(&self, _ctx: &mut CompileContext, pos: usize) -> Result<DecodeStep> {
        let p = self.primitive;
        let init_name = self.base.state_name().to_string();
        let delta_name = init_name.clone();
        Ok(DecodeStep {
            init: Box::new(move |ctx: &mut DecodeCtx<'_>| {
                let value = scalar_from_le(p, ctx.reader, &init_name)?;
                ctx.set_scalar(pos, value)
            }),
            delta: Box::new(move |ctx: &mut DecodeCtx<'_>| {
                let value = scalar_from_le(p, ctx.reader, &delta_name)?;
                ctx.set_scalar(pos, value)
            }),
        })
    }

    fn config_eq(&self, other: &dyn Field) -> bool {
        other.as_any().is::<Self>()
    }

    fn config_hash(&self, _state: &mut dyn Hasher) {}

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
