//! # Dynamic Serializer
//!
//! Builds the field tree for a record type `T`, lets callers adjust it
//! (scales, replaced or removed sub-fields), then freezes and compiles it
//! into block procedures shared through the [`BlockCache`].
//!
//! ## Lifecycle
//! - Building: `root_mut`, `set_root` and `create_field` are allowed;
//!   procedures are not available (`NotInitialized`).
//! - Frozen: the tree is immutable (`AlreadyInitialized` on mutation) and
//!   the pack/unpack procedures are available.
//!
//! A serializer restored with [`DynamicSerializer::from_header`] is frozen
//! from the start.

use core::fmt;
use core::marker::PhantomData;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use binseries_buffer::{CodecReader, CodecWriter, RecordCursor, ResultSink, MAX_BLOCK_ITEMS};
use binseries_core::{
    CodecConfig, CodecError, InitGuard, Primitive, Result, RowReader, Scalar, Schema,
    SerializerError, ValueType,
};

use crate::cache::BlockCache;
use crate::compiler::{CompiledBlock, RowCursor};
use crate::field::Field;
use crate::header::HeaderInput;
use crate::registry::CodecRegistry;
use crate::store::{FieldFactory, StateStore};
use crate::tree::FieldTree;

/// State name of the root field.
pub const ROOT_STATE_NAME: &str = "root";

/// Adapts a typed record cursor to the flattened rows the compiled
/// procedures consume.
struct FlatCursor<'c, T, C> {
    inner: &'c mut C,
    row: Vec<Scalar>,
    _marker: PhantomData<fn() -> T>,
}

impl<'c, T: Schema, C: RecordCursor<T>> FlatCursor<'c, T, C> {
    fn new(inner: &'c mut C, width: usize) -> Result<Self> {
        let mut row = Vec::with_capacity(width);
        inner.current()?.flatten(&mut row);
        Ok(Self {
            inner,
            row,
            _marker: PhantomData,
        })
    }
}

impl<T: Schema, C: RecordCursor<T>> RowCursor for FlatCursor<'_, T, C> {
    #[inline]
    fn current_row(&self) -> &[Scalar] {
        &self.row
    }

    #[inline]
    fn advance(&mut self) -> bool {
        if !self.inner.advance() {
            return false;
        }
        let Ok(record) = self.inner.current() else {
            return false;
        };
        self.row.clear();
        record.flatten(&mut self.row);
        true
    }
}

/// Typed handle on the compiled pack procedure.
pub struct PackProcedure<T> {
    block: Arc<CompiledBlock>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Schema> PackProcedure<T> {
    /// Packs records starting at the cursor's current one into the empty
    /// block `writer`. Returns `true` if records remain; the cursor then
    /// rests on the first record not written.
    pub fn run<C: RecordCursor<T>>(&self, writer: &mut CodecWriter, cursor: &mut C) -> Result<bool> {
        let mut rows = FlatCursor::<T, C>::new(cursor, self.block.layout().len())?;
        self.block.pack(writer, &mut rows)
    }

    pub fn compiled(&self) -> &Arc<CompiledBlock> {
        &self.block
    }
}

/// Typed handle on the compiled unpack procedure.
pub struct UnpackProcedure<T> {
    block: Arc<CompiledBlock>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Schema> UnpackProcedure<T> {
    /// Decodes up to `max_item_count` records into `sink`.
    pub fn run<S: ResultSink<T>>(
        &self,
        reader: &mut CodecReader,
        sink: &mut S,
        max_item_count: usize,
    ) -> Result<usize> {
        let mut emit = |row: &[Scalar]| -> Result<()> {
            let record = T::unflatten(&mut RowReader::new(row))?;
            sink.push_record(record);
            Ok(())
        };
        self.block.unpack(reader, &mut emit, max_item_count)
    }

    pub fn compiled(&self) -> &Arc<CompiledBlock> {
        &self.block
    }
}

pub struct DynamicSerializer<T> {
    store: StateStore,
    /// Present while building.
    root: Option<Box<dyn Field>>,
    /// Present once frozen.
    tree: Option<Arc<FieldTree>>,
    block: Option<Arc<CompiledBlock>>,
    guard: InitGuard,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Schema> DynamicSerializer<T> {
    pub fn new() -> Result<Self> {
        Self::with_options(CodecConfig::default(), Arc::new(CodecRegistry::new()), None)
    }

    pub fn with_factory(factory: FieldFactory) -> Result<Self> {
        Self::with_options(
            CodecConfig::default(),
            Arc::new(CodecRegistry::new()),
            Some(factory),
        )
    }

    pub fn with_options(
        config: CodecConfig,
        registry: Arc<CodecRegistry>,
        factory: Option<FieldFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let mut store = StateStore::new(config, registry);
        if let Some(factory) = factory {
            store = store.with_factory(factory);
        }
        let root = store.create_field(&T::value_type(), ROOT_STATE_NAME, true)?;
        Ok(Self {
            store,
            root: Some(root),
            tree: None,
            block: None,
            guard: InitGuard::new("serializer"),
            _marker: PhantomData,
        })
    }

    /// Restores a frozen serializer from a header written by
    /// [`DynamicSerializer::write_header`].
    pub fn from_header(buf: &mut Bytes, registry: Arc<CodecRegistry>) -> Result<Self> {
        Self::from_header_with(buf, registry, CodecConfig::default(), BlockCache::global())
    }

    pub fn from_header_with(
        buf: &mut Bytes,
        registry: Arc<CodecRegistry>,
        config: CodecConfig,
        cache: &BlockCache,
    ) -> Result<Self> {
        config.validate()?;
        let mut store = StateStore::new(config, registry);
        let root = HeaderInput::new(buf, &mut store).read_field()?;
        let mut serializer = Self {
            store,
            root: Some(root),
            tree: None,
            block: None,
            guard: InitGuard::new("serializer"),
            _marker: PhantomData,
        };
        serializer.freeze_with(cache)?;
        Ok(serializer)
    }

    pub fn config(&self) -> &CodecConfig {
        self.store.config()
    }

    pub fn registry(&self) -> &CodecRegistry {
        self.store.registry()
    }

    pub fn value_type(&self) -> ValueType {
        T::value_type()
    }

    /// Builds a default field for `value_type`, e.g. to replace a sub-field.
    pub fn create_field(
        &mut self,
        value_type: &ValueType,
        state_name: &str,
        allow_custom: bool,
    ) -> Result<Box<dyn Field>> {
        self.ensure_building()?;
        self.store.create_field(value_type, state_name, allow_custom)
    }

    /// The root being built, or the frozen tree's root.
    pub fn root(&self) -> Result<&dyn Field> {
        if let Some(root) = self.root.as_deref() {
            return Ok(root);
        }
        match &self.tree {
            Some(tree) => Ok(tree.root()),
            None => Err(CodecError::out_of_range("serializer", "no root field")),
        }
    }

    pub fn root_mut(&mut self) -> Result<&mut dyn Field> {
        self.ensure_building()?;
        match self.root.as_deref_mut() {
            Some(root) => Ok(root),
            None => Err(CodecError::AlreadyInitialized("serializer")),
        }
    }

    /// Typed access to the root, e.g. `root_as_mut::<ComplexField>()`.
    pub fn root_as_mut<F: Field>(&mut self) -> Result<&mut F> {
        self.root_mut()?.expect_mut::<F>()
    }

    pub fn set_root(&mut self, root: Box<dyn Field>) -> Result<()> {
        self.ensure_building()?;
        self.root = Some(root);
        Ok(())
    }

    fn ensure_building(&self) -> Result<()> {
        self.guard.ensure_mutable()?;
        if self.tree.is_some() {
            return Err(CodecError::AlreadyInitialized("serializer"));
        }
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.guard.is_initialized()
    }

    /// Freezes the tree and compiles it through the process-wide cache.
    /// Calling it again is a no-op.
    pub fn freeze(&mut self) -> Result<()> {
        self.freeze_with(BlockCache::global())
    }

    pub fn freeze_with(&mut self, cache: &BlockCache) -> Result<()> {
        if self.guard.is_initialized() {
            return Ok(());
        }

        if let Some(root) = self.root.as_deref() {
            let layout = FieldTree::check(root)?;
            self.check_layout(&layout)?;
            if let Some(root) = self.root.take() {
                self.tree = Some(Arc::new(FieldTree::from_checked(root, layout)));
            }
            self.store.freeze();
        }

        let tree = self.tree.clone().ok_or(CodecError::NotInitialized("field tree"))?;
        self.block = Some(cache.get_or_compile(tree)?);
        self.guard.mark_initialized();
        Ok(())
    }

    fn check_layout(&self, layout: &[Primitive]) -> Result<()> {
        let ty = T::value_type();
        let mut expected = Vec::with_capacity(layout.len());
        ty.flat_layout(&mut expected)?;
        if expected != layout {
            return Err(SerializerError::LayoutMismatch {
                type_name: ty.to_string(),
                detail: format!("record flattens to {expected:?}, tree to {layout:?}"),
            }
            .into());
        }
        Ok(())
    }

    pub fn tree(&self) -> Result<&Arc<FieldTree>> {
        self.guard.ensure_initialized()?;
        self.tree.as_ref().ok_or(CodecError::NotInitialized("field tree"))
    }

    pub fn compiled(&self) -> Result<&Arc<CompiledBlock>> {
        self.guard.ensure_initialized()?;
        self.block.as_ref().ok_or(CodecError::NotInitialized("serializer"))
    }

    pub fn pack_procedure(&self) -> Result<PackProcedure<T>> {
        Ok(PackProcedure {
            block: Arc::clone(self.compiled()?),
            _marker: PhantomData,
        })
    }

    pub fn unpack_procedure(&self) -> Result<UnpackProcedure<T>> {
        Ok(UnpackProcedure {
            block: Arc::clone(self.compiled()?),
            _marker: PhantomData,
        })
    }

    pub fn pack_block<C: RecordCursor<T>>(
        &self,
        writer: &mut CodecWriter,
        cursor: &mut C,
    ) -> Result<bool> {
        self.pack_procedure()?.run(writer, cursor)
    }

    pub fn unpack_block<S: ResultSink<T>>(
        &self,
        reader: &mut CodecReader,
        sink: &mut S,
        max_item_count: usize,
    ) -> Result<usize> {
        self.unpack_procedure()?.run(reader, sink, max_item_count)
    }

    /// Packs every record into blocks of the configured `block_size`.
    pub fn pack_all<C: RecordCursor<T>>(&self, cursor: &mut C) -> Result<Vec<Bytes>> {
        let pack = self.pack_procedure()?;
        let mut writer = CodecWriter::new(self.config().block_size)?;
        let mut blocks = Vec::new();
        loop {
            let more = pack.run(&mut writer, cursor)?;
            blocks.push(writer.take_block());
            if !more {
                return Ok(blocks);
            }
        }
    }

    /// Decodes a sequence of blocks written by [`DynamicSerializer::pack_all`].
    pub fn unpack_all(&self, blocks: &[Bytes]) -> Result<Vec<T>> {
        let unpack = self.unpack_procedure()?;
        let mut records = Vec::new();
        for block in blocks {
            let mut reader = CodecReader::new(block.clone());
            unpack.run(&mut reader, &mut records, MAX_BLOCK_ITEMS)?;
        }
        Ok(records)
    }

    /// Freezes if needed and persists the field tree.
    pub fn write_header(&mut self, out: &mut BytesMut) -> Result<()> {
        self.freeze()?;
        self.tree()?.write(out);
        Ok(())
    }

    /// Upper bound of the encoded size of one record.
    pub fn max_record_size(&self) -> usize {
        self.root().map_or(0, |root| root.max_byte_size())
    }
}

impl<T> fmt::Debug for DynamicSerializer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicSerializer")
            .field("record", &core::any::type_name::<T>())
            .field("frozen", &self.guard.is_initialized())
            .field("root", &self.root)
            .field("tree", &self.tree)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binseries_buffer::SliceCursor;
    use binseries_core::record;

    use crate::complex::ComplexField;
    use crate::delta_float::ScaledDeltaFloatField;
    use crate::delta_int::ScaledDeltaIntField;
    use crate::simple::SimpleField;

    record! {
        #[derive(Debug, Clone, Copy, PartialEq, Default)]
        struct Point { flag: bool, x: i32, y: f64 }
    }

    record! {
        #[derive(Debug, Clone, PartialEq, Default)]
        struct WithArray { id: u32, values: Vec<i32> }
    }

    record! {
        #[derive(Debug, Clone, Copy, PartialEq, Default)]
        struct WithBuffer { id: u32, raw: [u8; 4] }
    }

    record! {
        #[derive(Debug, Clone, Copy, PartialEq, Default)]
        struct Pair { a: i64, b: i64 }
    }

    #[test]
    fn test_default_tree_follows_member_types() {
        let s = DynamicSerializer::<Point>::new().unwrap();
        let root = s.root().unwrap().downcast_ref::<ComplexField>().unwrap();
        let kinds: Vec<_> = root.fields().iter().map(|f| (f.name(), f.field().kind())).collect();
        assert_eq!(
            kinds,
            vec![
                ("flag", SimpleField::KIND),
                ("x", ScaledDeltaIntField::KIND),
                ("y", ScaledDeltaFloatField::KIND),
            ]
        );
        assert_eq!(root.field("x").unwrap().state_name(), "root.x");
        assert_eq!(s.max_record_size(), 1 + 10 + 10);
    }

    #[test]
    fn test_arrays_and_fixed_buffers_are_rejected() {
        let err = DynamicSerializer::<WithArray>::new().unwrap_err();
        assert!(matches!(err.as_serializer(), Some(SerializerError::ArrayNotSupported(_))));

        let err = DynamicSerializer::<WithBuffer>::new().unwrap_err();
        assert!(matches!(
            err.as_serializer(),
            Some(SerializerError::FixedBufferNotSupported { member, .. }) if member == "raw"
        ));
    }

    #[test]
    fn test_lifecycle_guards() {
        let mut s = DynamicSerializer::<Point>::new().unwrap();
        assert!(matches!(s.pack_procedure(), Err(CodecError::NotInitialized(_))));

        s.freeze().unwrap();
        s.freeze().unwrap();
        assert!(s.is_frozen());
        assert!(matches!(s.root_mut(), Err(CodecError::AlreadyInitialized(_))));
        assert!(s.pack_procedure().is_ok());
        assert!(s.root().unwrap().base().is_frozen());

        let root = s.tree().unwrap().root();
        let x = root
            .downcast_ref::<ComplexField>()
            .and_then(|c| c.field("x"))
            .unwrap();
        assert!(x.base().is_frozen());
    }

    #[test]
    fn test_removed_member_decodes_as_default() {
        let mut s = DynamicSerializer::<Point>::new().unwrap();
        let removed = s.root_as_mut::<ComplexField>().unwrap().remove_field("y").unwrap();
        assert!(removed.is_some());
        s.freeze().unwrap();

        let data = [
            Point { flag: true, x: 5, y: 1.5 },
            Point { flag: false, x: 9, y: 2.5 },
        ];
        let blocks = s.pack_all(&mut SliceCursor::new(&data).unwrap()).unwrap();
        let back = s.unpack_all(&blocks).unwrap();
        assert_eq!(
            back,
            vec![
                Point { flag: true, x: 5, y: 0.0 },
                Point { flag: false, x: 9, y: 0.0 },
            ]
        );
    }

    #[test]
    fn test_replaced_field_must_match_member_type() {
        let mut s = DynamicSerializer::<Point>::new().unwrap();
        let raw = s
            .create_field(&ValueType::Primitive(Primitive::F64), "root.x2", false)
            .unwrap();
        let err = s
            .root_as_mut::<ComplexField>()
            .unwrap()
            .set_field("x", raw)
            .unwrap_err();
        assert!(matches!(err.as_serializer(), Some(SerializerError::LayoutMismatch { .. })));
    }

    #[test]
    fn test_shared_state_roundtrips() {
        let factory: FieldFactory =
            Arc::new(|store: &mut StateStore, ty: &ValueType, _name: &str| -> Result<_> {
                if ty.as_primitive() == Some(Primitive::I64) {
                    let field = ScaledDeltaIntField::new(store, ty, "shared")?;
                    return Ok(Some(Box::new(field) as Box<dyn Field>));
                }
                Ok(None)
            });
        let mut s = DynamicSerializer::<Pair>::with_factory(factory).unwrap();
        s.freeze().unwrap();

        let data: Vec<Pair> = (0..50).map(|i| Pair { a: i * 10, b: i * 10 + 3 }).collect();
        let blocks = s.pack_all(&mut SliceCursor::new(&data).unwrap()).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(s.unpack_all(&blocks).unwrap(), data);
    }
}
