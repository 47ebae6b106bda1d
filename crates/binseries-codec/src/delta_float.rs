//! Floating delta-with-scale leaf.
//!
//! `q = round(v * multiplier)` is stored like an integer delta field stores
//! its quantized value. Decoding yields `q / multiplier`, so a multiplier of
//! `10_000.0` keeps four decimal places.

use core::any::Any;
use core::hash::Hasher;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use num_traits::{Float, NumCast};

use binseries_core::{
    BoxError, Category, CodecError, Primitive, Result, ScalarValue, SerializerError, ValueType,
};

use crate::field::{expect_primitive, Field, FieldBase};
use crate::header::HeaderInput;
use crate::state::StateSlot;
use crate::step::{CompileContext, DecodeCtx, DecodeStep, EncodeCtx, EncodeStep};
use crate::store::StateStore;

// 2^63; every finite f64 below it converts to i64 exactly after rounding.
const I64_BOUND: f64 = 9_223_372_036_854_775_808.0;

#[inline]
fn quantized<P: Float + ScalarValue>(value: P, multiplier: f64) -> Option<i64> {
    let q = (value.to_f64()? * multiplier).round();
    if !q.is_finite() || q < -I64_BOUND || q >= I64_BOUND {
        return None;
    }
    // f32 fields must be able to hold what the decoder will produce.
    restore_raw::<P>(q as i64, multiplier)?;
    Some(q as i64)
}

#[inline]
fn restore_raw<P: Float>(q: i64, multiplier: f64) -> Option<P> {
    let value: P = NumCast::from(q as f64 / multiplier)?;
    value.is_finite().then_some(value)
}

fn unsupported(p: Primitive) -> CodecError {
    SerializerError::UnsupportedType(format!("{} cannot serialize {p}", ScaledDeltaFloatField::KIND))
        .into()
}

fn not_encodable(state_name: &str, value: impl ToString) -> SerializerError {
    SerializerError::ValueOutOfRange {
        state_name: state_name.to_string(),
        value: value.to_string(),
        reason: "scaled value does not fit the delta encoding",
    }
}

#[derive(Debug)]
pub struct ScaledDeltaFloatField {
    base: FieldBase,
    primitive: Primitive,
    multiplier: f64,
}

impl ScaledDeltaFloatField {
    pub const KIND: &'static str = "ScaledDeltaFloatField";

    pub fn new(store: &mut StateStore, value_type: &ValueType, state_name: &str) -> Result<Self> {
        let primitive = expect_primitive(Self::KIND, value_type)?;
        if primitive.category() != Category::Float {
            return Err(unsupported(primitive));
        }
        store.get_or_create_state(state_name, Primitive::I64)?;
        Ok(Self {
            base: FieldBase::new(value_type.clone(), state_name),
            primitive,
            multiplier: store.config().default_float_multiplier,
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

    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Smallest step that survives encoding, `1 / multiplier`.
    pub fn scale(&self) -> f64 {
        1.0 / self.multiplier
    }

    pub fn set_multiplier(&mut self, multiplier: f64) -> Result<()> {
        self.base.ensure_mutable()?;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(CodecError::out_of_range(
                "multiplier",
                format!("{multiplier} is not a finite positive number"),
            ));
        }
        self.multiplier = multiplier;
        Ok(())
    }

    fn encoder<P: Float + ScalarValue>(&self, slot: StateSlot, owner: bool, pos: usize) -> EncodeStep {
        let multiplier = self.multiplier;
        let name: Arc<str> = Arc::from(self.base.state_name());

        EncodeStep {
            init: Box::new(move |ctx: &mut EncodeCtx<'_>| {
                let value: P = ctx.value(pos)?;
                let q = quantized(value, multiplier)
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
                let Some(q) = quantized(value, multiplier) else {
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

    fn decoder<P: Float + ScalarValue>(&self, slot: StateSlot, owner: bool, pos: usize) -> DecodeStep {
        let multiplier = self.multiplier;
        let name: Arc<str> = Arc::from(self.base.state_name());
        let init_name = Arc::clone(&name);

        let restore = move |q: i64, name: &str| {
            restore_raw::<P>(q, multiplier).ok_or_else(|| SerializerError::ValueOutOfRange {
                state_name: name.to_string(),
                value: q.to_string(),
                reason: "decoded value does not fit the field type",
            })
        };

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
                ctx.set_value(pos, restore(q, &init_name)?)
            }),
            delta: Box::new(move |ctx: &mut DecodeCtx<'_>| {
                let delta = ctx.reader.read_signed()?;
                let prev: i64 = ctx.state.get(slot)?;
                let q = prev.checked_add(delta).ok_or_else(|| not_encodable(&name, delta))?;
                ctx.state.set(slot, q);
                ctx.set_value(pos, restore(q, &name)?)
            }),
        }
    }
}

impl Field for ScaledDeltaFloatField {
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
        out.put_f64_le(self.multiplier);
    }

    fn read_config(&mut self, input: &mut HeaderInput<'_>) -> Result<()> {
        let multiplier = input.read_f64()?;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(SerializerError::InvalidHeader(format!(
                "invalid multiplier {multiplier} on '{}'",
                self.base.state_name()
            ))
            .into());
        }
        self.multiplier = multiplier;
        Ok(())
    }

    fn build_encoder(&self, ctx: &mut CompileContext, pos: usize) -> Result<EncodeStep> {
        let (slot, owner) = ctx.state(self.base.state_name(), Primitive::I64)?;
        match self.primitive {
            Primitive::F32 => Ok(self.encoder::<f32>(slot, owner, pos)),
            Primitive::F64 => Ok(self.encoder::<f64>(slot, owner, pos)),
            other => Err(unsupported(other)),
        }
    }

    fn build_decoder(&self, ctx: &mut CompileContext, pos: usize) -> Result<DecodeStep> {
        let (slot, owner) = ctx.state(self.base.state_name(), Primitive::I64)?;
        match self.primitive {
            Primitive::F32 => Ok(self.decoder::<f32>(slot, owner, pos)),
            Primitive::F64 => Ok(self.decoder::<f64>(slot, owner, pos)),
            other => Err(unsupported(other)),
        }
    }

    fn config_eq(&self, other: &dyn Field) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|o| o.multiplier.to_bits() == self.multiplier.to_bits())
    }

    fn config_hash(&self, state: &mut dyn Hasher) {
        state.write_u64(self.multiplier.to_bits());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
