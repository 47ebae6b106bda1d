//! # Block Procedure Compiler
//!
//! Turns a frozen [`FieldTree`] into a [`CompiledBlock`]: one pack and one
//! unpack procedure over flattened rows.
//!
//! ## Pack
//! The current record is written with the init steps. Then, while the
//! cursor advances, the delta steps try the next record; the writer is
//! rewound and the block closed as soon as one record does not fit.
//! The return value is `true` when records remain for another block, in
//! which case the cursor rests on the first record not written.
//!
//! ## Unpack
//! Reads the block header, clamps its count to `max_item_count`, decodes
//! the first record with the init steps and every following one with the
//! delta steps.

use core::fmt;
use std::sync::Arc;

use binseries_buffer::{CodecReader, CodecWriter, MAX_BLOCK_ITEMS};
use binseries_core::{CodecError, Primitive, Result, Scalar, SerializerError};

use crate::state::StateFrame;
use crate::step::{CompileContext, DecodeCtx, DecodeStep, EncodeCtx, EncodeStep};
use crate::tree::FieldTree;
use crate::ScalarRow;

/// Forward cursor over flattened records.
pub trait RowCursor {
    fn current_row(&self) -> &[Scalar];

    fn advance(&mut self) -> bool;
}

pub type PackFn =
    Box<dyn Fn(&mut CodecWriter, &mut dyn RowCursor) -> Result<bool> + Send + Sync>;
pub type UnpackFn = Box<
    dyn Fn(&mut CodecReader, &mut dyn FnMut(&[Scalar]) -> Result<()>, usize) -> Result<usize>
        + Send
        + Sync,
>;

pub struct CompiledBlock {
    tree: Arc<FieldTree>,
    pack: PackFn,
    unpack: UnpackFn,
}

impl CompiledBlock {
    pub fn tree(&self) -> &Arc<FieldTree> {
        &self.tree
    }

    pub fn layout(&self) -> &[Primitive] {
        self.tree.layout()
    }

    /// Packs records from `cursor` into the empty block `writer`.
    #[inline]
    pub fn pack(&self, writer: &mut CodecWriter, cursor: &mut dyn RowCursor) -> Result<bool> {
        (self.pack)(writer, cursor)
    }

    /// Decodes at most `max_item_count` rows, passing each to `emit`.
    #[inline]
    pub fn unpack(
        &self,
        reader: &mut CodecReader,
        emit: &mut dyn FnMut(&[Scalar]) -> Result<()>,
        max_item_count: usize,
    ) -> Result<usize> {
        (self.unpack)(reader, emit, max_item_count)
    }

    /// Decodes a block into owned rows.
    pub fn unpack_rows(
        &self,
        reader: &mut CodecReader,
        max_item_count: usize,
    ) -> Result<Vec<ScalarRow>> {
        let mut rows = Vec::new();
        self.unpack(
            reader,
            &mut |row| {
                rows.push(row.to_vec());
                Ok(())
            },
            max_item_count,
        )?;
        Ok(rows)
    }
}

impl fmt::Debug for CompiledBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledBlock")
            .field("layout", &self.tree.layout())
            .field("max_record_size", &self.tree.max_record_size())
            .finish()
    }
}

fn check_row(row: &[Scalar], layout: &[Primitive]) -> Result<()> {
    let matches = row.len() == layout.len()
        && row.iter().zip(layout).all(|(s, p)| s.primitive() == *p);
    if !matches {
        return Err(SerializerError::LayoutMismatch {
            type_name: "row".to_string(),
            detail: format!("expected {} scalars of {:?}", layout.len(), layout),
        }
        .into());
    }
    Ok(())
}

fn pack_fn(encoder: EncodeStep, states: Vec<Primitive>, layout: Vec<Primitive>) -> PackFn {
    Box::new(move |writer: &mut CodecWriter, cursor: &mut dyn RowCursor| -> Result<bool> {
        if writer.payload_len() != 0 {
            return Err(CodecError::out_of_range("writer", "pack expects an empty block"));
        }
        check_row(cursor.current_row(), &layout)?;

        let mut state = StateFrame::new(&states);
        (encoder.init)(&mut EncodeCtx {
            writer: &mut *writer,
            row: cursor.current_row(),
            state: &mut state,
        })?;

        let mut count = 1usize;
        let has_more = loop {
            if !cursor.advance() {
                break false;
            }
            if count == MAX_BLOCK_ITEMS {
                break true;
            }
            let mark = writer.count();
            let fit = (encoder.delta)(&mut EncodeCtx {
                writer: &mut *writer,
                row: cursor.current_row(),
                state: &mut state,
            })?;
            if !fit {
                writer.set_count(mark)?;
                break true;
            }
            count += 1;
        };

        writer.finish_block(count, has_more)?;
        tracing::trace!(
            "CompiledBlock: packed {} records into {} bytes (more={})",
            count,
            writer.count(),
            has_more
        );
        Ok(has_more)
    })
}

fn unpack_fn(decoder: DecodeStep, states: Vec<Primitive>, layout: Vec<Primitive>) -> UnpackFn {
    Box::new(
        move |reader: &mut CodecReader,
              emit: &mut dyn FnMut(&[Scalar]) -> Result<()>,
              max_item_count: usize|
              -> Result<usize> {
            let header = reader.read_header()?;
            let mut remaining = header.item_count.min(max_item_count);
            if remaining == 0 {
                return Ok(0);
            }

            let mut row: Vec<Scalar> = layout.iter().map(|p| Scalar::zero(*p)).collect();
            let mut state = StateFrame::new(&states);
            (decoder.init)(&mut DecodeCtx {
                reader: &mut *reader,
                row: &mut row,
                state: &mut state,
            })?;
            emit(&row)?;

            let mut produced = 1usize;
            loop {
                remaining -= 1;
                if remaining == 0 {
                    break;
                }
                (decoder.delta)(&mut DecodeCtx {
                    reader: &mut *reader,
                    row: &mut row,
                    state: &mut state,
                })?;
                emit(&row)?;
                produced += 1;
            }

            tracing::trace!(
                "CompiledBlock: unpacked {} of {} records (more={})",
                produced,
                header.item_count,
                header.has_more
            );
            Ok(produced)
        },
    )
}

pub fn compile(tree: Arc<FieldTree>) -> Result<CompiledBlock> {
    let mut enc_ctx = CompileContext::new();
    let encoder = tree.root().build_encoder(&mut enc_ctx, 0)?;

    let mut dec_ctx = CompileContext::new();
    let decoder = tree.root().build_decoder(&mut dec_ctx, 0)?;

    let layout = tree.layout().to_vec();
    Ok(CompiledBlock {
        pack: pack_fn(encoder, enc_ctx.into_layout(), layout.clone()),
        unpack: unpack_fn(decoder, dec_ctx.into_layout(), layout),
        tree,
    })
}
