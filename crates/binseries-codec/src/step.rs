//! # Compiled Steps
//!
//! Every node contributes two closures per direction: an init step for the
//! first record of a block and a delta step for each following record.
//! Steps operate on a flattened row and a per-invocation [`StateFrame`].
//!
//! ## Encode contract
//! - init writes unconditionally and fails with `BufferOverflow` when the
//!   block cannot hold even the first record.
//! - delta returns `Ok(false)` when the record does not fit, either because
//!   the buffer is full or because the value cannot be represented. The
//!   caller rewinds the writer.

use binseries_buffer::{CodecReader, CodecWriter};
use binseries_core::{Primitive, Scalar, ScalarValue, SerializerError};

use crate::state::{StateFrame, StateRegistry, StateSlot};

pub struct EncodeCtx<'a> {
    pub writer: &'a mut CodecWriter,
    pub row: &'a [Scalar],
    pub state: &'a mut StateFrame,
}

impl EncodeCtx<'_> {
    /// Typed value at `pos` of the current row.
    #[inline]
    pub fn value<P: ScalarValue>(&self, pos: usize) -> Result<P, SerializerError> {
        read_row(self.row, pos)
    }

    /// Untyped value at `pos`, checked against the expected primitive.
    #[inline]
    pub fn scalar(&self, pos: usize, expected: Primitive) -> Result<Scalar, SerializerError> {
        let scalar = *self
            .row
            .get(pos)
            .ok_or_else(|| row_too_short(expected, pos, self.row.len()))?;
        if scalar.primitive() != expected {
            return Err(SerializerError::LayoutMismatch {
                type_name: expected.to_string(),
                detail: format!("row position {pos} holds {}", scalar.primitive()),
            });
        }
        Ok(scalar)
    }
}

pub struct DecodeCtx<'a> {
    pub reader: &'a mut CodecReader,
    pub row: &'a mut [Scalar],
    pub state: &'a mut StateFrame,
}

impl DecodeCtx<'_> {
    #[inline]
    pub fn set_value<P: ScalarValue>(&mut self, pos: usize, value: P) -> Result<(), SerializerError> {
        let len = self.row.len();
        let cell = self
            .row
            .get_mut(pos)
            .ok_or_else(|| row_too_short(P::PRIMITIVE, pos, len))?;
        *cell = value.into_scalar();
        Ok(())
    }

    #[inline]
    pub fn set_scalar(&mut self, pos: usize, value: Scalar) -> Result<(), SerializerError> {
        let len = self.row.len();
        let cell = self
            .row
            .get_mut(pos)
            .ok_or_else(|| row_too_short(value.primitive(), pos, len))?;
        *cell = value;
        Ok(())
    }
}

#[inline]
fn read_row<P: ScalarValue>(row: &[Scalar], pos: usize) -> Result<P, SerializerError> {
    let scalar = *row
        .get(pos)
        .ok_or_else(|| row_too_short(P::PRIMITIVE, pos, row.len()))?;
    P::from_scalar(scalar).ok_or_else(|| SerializerError::LayoutMismatch {
        type_name: P::PRIMITIVE.to_string(),
        detail: format!("row position {pos} holds {}", scalar.primitive()),
    })
}

fn row_too_short(p: Primitive, pos: usize, len: usize) -> SerializerError {
    SerializerError::LayoutMismatch {
        type_name: p.to_string(),
        detail: format!("row position {pos} is beyond row length {len}"),
    }
}

pub type InitEncoder = Box<dyn Fn(&mut EncodeCtx<'_>) -> Result<(), SerializerError> + Send + Sync>;
pub type DeltaEncoder =
    Box<dyn Fn(&mut EncodeCtx<'_>) -> Result<bool, SerializerError> + Send + Sync>;
pub type DecodeFn = Box<dyn Fn(&mut DecodeCtx<'_>) -> Result<(), SerializerError> + Send + Sync>;

pub struct EncodeStep {
    pub init: InitEncoder,
    pub delta: DeltaEncoder,
}

pub struct DecodeStep {
    pub init: DecodeFn,
    pub delta: DecodeFn,
}

/// State allocation for one compilation pass.
///
/// Encoder and decoder are compiled with separate contexts so both sides
/// see the same creator/consumer split for shared slots.
#[derive(Debug, Default)]
pub struct CompileContext {
    states: StateRegistry,
}

impl CompileContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `name`, and whether this node is the one that must
    /// initialize it.
    pub fn state(
        &mut self,
        name: &str,
        kind: Primitive,
    ) -> Result<(StateSlot, bool), SerializerError> {
        self.states.get_or_create(name, kind)
    }

    pub(crate) fn into_layout(self) -> Vec<Primitive> {
        self.states.layout().to_vec()
    }
}
