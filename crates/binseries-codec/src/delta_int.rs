//! Integer delta-with-scale leaf.
//!
//! Values must be exact multiples of `divider` and are stored as `q = v / divider`.
//! The first record of a block stores `q`, every following record stores
//! `q - q_prev`, both as zigzag varints. Decoding yields `q * divider`.

use core::any::Any;
use core::hash::Hasher;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use num_traits::FromPrimitive;

use binseries_core::{
    BoxError, Category, CodecError, Primitive, Result, ScalarValue, SerializerError, ValueType,
};

use crate::field::{expect_primitive, Field, FieldBase};
use crate::header::HeaderInput;
use crate::state::StateSlot;
use crate::step::{CompileContext, DecodeCtx, DecodeStep, EncodeCtx, EncodeStep};
use crate::store::StateStore;

/// Integer primitives (and `char`) seen through an `i128` window.
pub(crate) trait DeltaInt: ScalarValue {
    fn widen(self) -> i128;

    fn narrow(value: i128) -> Option<Self>;
}

macro_rules! delta_int {
    ($($ty:ty),*) => {
        $(
            impl DeltaInt for $ty {
                #[inline]
                fn widen(self) -> i128 {
                    i128::from(self)
                }

                #[inline]
                fn narrow(value: i128) -> Option<Self> {
                    <$ty as FromPrimitive>::from_i128(value)
                }
            }
        )*
    };
}

delta_int!(i16, u16, i32, u32, i64, u64);

impl DeltaInt for char {
    #[inline]
    fn widen(self) -> i128 {
        i128::from(self as u32)
    }

    #[inline]
    fn narrow(value: i128) -> Option<Self> {
        u32::from_i128(value).and_then(char::from_u32)
    }
}

/// Quantized value of `v`, or `None` when it cannot be stored or restored.
/// `v` must be an exact multiple of `divider`.
#[inline]
fn quantized<P: DeltaInt>(value: P, divider: i128) -> Option<i64> {
    let q = value.widen() / divider;
    q.checked_mul(divider).and_then(P::narrow)?;
    i64::try_from(q).ok()
}

fn check_divisible<P: DeltaInt>(
    value: P,
    divider: i128,
    state_name: &str,
) -> std::result::Result<(), SerializerError> {
    if value.widen() % divider != 0 {
        return Err(SerializerError::ValueOutOfRange {
            state_name: state_name.to_string(),
            value: value.into_scalar().to_string(),
            reason: "value is not a multiple of the divider",
        });
    }
    Ok(())
}

#[inline]
fn restore<P: DeltaInt>(q: i64, divider: i128, state_name: &str) -> std::result::Result<P, SerializerError> {
    i128::from(q)
        .checked_mul(divider)
        .and_then(P::narrow)
        .ok_or_else(|| SerializerError::ValueOutOfRange {
            state_name: state_name.to_string(),
            value: q.to_string(),
            reason: "decoded value does not fit the field type",
        })
}

fn not_encodable(state_name: &str, value: impl ToString) -> SerializerError {
    SerializerError::ValueOutOfRange {
        state_name: state_name.to_string(),
        value: value.to_string(),
        reason: "quantized value does not fit the delta encoding",
    }
}

#[derive(Debug)]
pub struct ScaledDeltaIntField {
    base: FieldBase,
    primitive: Primitive,
    divider: u64,
}

impl ScaledDeltaIntField {
    pub const KIND: &'static str = "ScaledDeltaIntField";

    pub fn new(store: &mut StateStore, value_type: &ValueType, state_name: &str) -> Result<Self> {
        let primitive = expect_primitive(Self::KIND, value_type)?;
        if primitive.category() != Category::Integer {
            return Err(SerializerError::UnsupportedType(format!(
                "{} cannot serialize {primitive}",
                Self::KIND
            ))
            .into());
        }
        store.get_or_create_state(state_name, Primitive::I64)?;
        Ok(Self {
            base: FieldBase::new(value_type.clone(), state_name),
            primitive,
            divider: store.config().default_int_divider.max(1),
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

    pub fn divider(&self) -> u64 {
        self.divider
    }

    pub fn set_divider(&mut self, divider: u64) -> Result<()> {
        self.base.ensure_mutable()?;
        if divider == 0 {
            return Err(CodecError::out_of_range("divider", "must be at least 1"));
        }
        self.divider = divider;
        Ok(())
    }

    fn encoder<P: DeltaInt>(&self, slot: StateSlot, owner: bool, pos: usize) -> EncodeStep {
        let divider = i128::from(self.divider);
        let name: Arc<str> = Arc::from(self.base.state_name());
        let delta_name = Arc::clone(&name);

        EncodeStep {
            init: Box::new(move |ctx: &mut EncodeCtx<'_>| {
                let value: P = ctx.value(pos)?;
                check_divisible(value, divider, &name)?;
                let q = quantized(value, divider)
                    .ok_or_else(|| not_encodable(&name, value.into_scalar()))?;
                let stored = if owner {
                    q
                } else {
                    let prev: i64 = ctx.state.get(slot)?;
                    q.checked_sub(prev)
                        .ok_or_else(|| not_encodable(&name, value.into_scalar()))?
                };
                ctx.writer.write_signed(stored)?;
                ctx.state.set(slot, q);
                Ok(())
            }),
            delta: Box::new(move |ctx: &mut EncodeCtx<'_>| {
                let value: P = ctx.value(pos)?;
                check_divisible(value, divider, &delta_name)?;
                let Some(q) = quantized(value, divider) else {
                    return Ok(false);
                };
                let prev: i64 = ctx.state.get(slot)?;
                let Some(delta) = q.checked_sub(prev) else {
                    return Ok(false);
                };
                if !ctx.writer.try_write_signed(delta) {
                    return Ok(false);
                }
                ctx.state.set(slot, q);
                Ok(true)
            }),
        }
    }

    fn decoder<P: DeltaInt>(&self, slot: StateSlot, owner: bool, pos: usize) -> DecodeStep {
        let divider = i128::from(self.divider);
        let name: Arc<str> = Arc::from(self.base.state_name());
        let init_name = Arc::clone(&name);

        DecodeStep {
            init: Box::new(move |ctx: &mut DecodeCtx<'_>| {
                let stored = ctx.reader.read_signed()?;
                let q = if owner {
                    stored
                } else {
                    let prev: i64 = ctx.state.get(slot)?;
                    prev.checked_add(stored)
                        .ok_or_else(|| not_encodable(&init_name, stored))?
                };
                ctx.state.set(slot, q);
                ctx.set_value(pos, restore::<P>(q, divider, &init_name)?)
            }),
            delta: Box::new(move |ctx: &mut DecodeCtx<'_>| {
                let delta = ctx.reader.read_signed()?;
                let prev: i64 = ctx.state.get(slot)?;
                let q = prev.checked_add(delta).ok_or_else(|| not_encodable(&name, delta))?;
                ctx.state.set(slot, q);
                ctx.set_value(pos, restore::<P>(q, divider, &name)?)
            }),
        }
    }
}

macro_rules! dispatch_int {
    ($self:ident, $method:ident, $slot:expr, $owner:expr, $pos:expr) => {
        match $self.primitive {
            Primitive::Char => $self.$method::<char>($slot, $owner, $pos),
            Primitive::I16 => $self.$method::<i16>($slot, $owner, $pos),
            Primitive::U16 => $self.$method::<u16>($slot, $owner, $pos),
            Primitive::I32 => $self.$method::<i32>($slot, $owner, $pos),
            Primitive::U32 => $self.$method::<u32>($slot, $owner, $pos),
            Primitive::I64 => $self.$method::<i64>($slot, $owner, $pos),
            Primitive::U64 => $self.$method::<u64>($slot, $owner, $pos),
            other => {
                return Err(SerializerError::UnsupportedType(format!(
                    "{} cannot serialize {other}",
                    Self::KIND
                ))
                .into())
            }
        }
    };
}

impl Field for ScaledDeltaIntField {
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
        binseries_buffer::varint::MAX_VARINT_LEN
    }

    fn write_config(&self, out: &mut BytesMut) {
        out.put_u64_le(self.divider);
    }

    fn read_config(&mut self, input: &mut HeaderInput<'_>) -> Result<()> {
        let divider = input.read_u64()?;
        if divider == 0 {
            return Err(SerializerError::InvalidHeader(format!(
                "zero divider on '{}'",
                self.base.state_name()
            ))
            .into());
        }
        self.divider = divider;
        Ok(())
    }

    fn build_encoder(&self, ctx: &mut CompileContext, pos: usize) -> Result<EncodeStep> {
        let (slot, owner) = ctx.state(self.base.state_name(), Primitive::I64)?;
        Ok(dispatch_int!(self, encoder, slot, owner, pos))
    }

    fn build_decoder(&self, ctx: &mut CompileContext, pos: usize) -> Result<DecodeStep> {
        let (slot, owner) = ctx.state(self.base.state_name(), Primitive::I64)?;
        Ok(dispatch_int!(self, decoder, slot, owner, pos))
    }

    fn config_eq(&self, other: &dyn Field) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|o| o.divider == self.divider)
    }

    fn config_hash(&self, state: &mut dyn Hasher) {
        state.write_u64(self.divider);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
