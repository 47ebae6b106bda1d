//! # Bridge Callables
//!
//! A container that only knows its wrapper type builds serializers through
//! the generic invoker traits: the wrapper re-enters [`SerializerFactory`]
//! or [`HeaderLoader`] with its concrete record type, and the callable hands
//! back a type-erased serializer.

use core::any::Any;
use core::fmt;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use binseries_buffer::CodecReader;
use binseries_core::{
    CodecConfig, GenericCallable, GenericCallable2, GenericInvoker, GenericInvoker2, Result,
    Schema, SeriesIndex, ValueType,
};

use crate::cache::BlockCache;
use crate::registry::CodecRegistry;
use crate::serializer::DynamicSerializer;
use crate::store::FieldFactory;
use crate::tree::FieldTree;
use crate::ScalarRow;

/// A frozen serializer whose record type is only known at runtime.
pub trait ErasedSerializer: fmt::Debug + Send + Sync {
    fn record_type(&self) -> ValueType;

    fn tree(&self) -> Result<&Arc<FieldTree>>;

    fn write_header(&self, out: &mut BytesMut) -> Result<()>;

    fn max_record_size(&self) -> usize;

    /// Decodes one block into flattened rows.
    fn unpack_rows(&self, block: Bytes, max_item_count: usize) -> Result<Vec<ScalarRow>>;

    fn as_any(&self) -> &dyn Any;
}

impl dyn ErasedSerializer {
    /// Recovers the typed serializer when the caller knows the record type.
    pub fn downcast_ref<T: Schema>(&self) -> Option<&DynamicSerializer<T>> {
        self.as_any().downcast_ref::<DynamicSerializer<T>>()
    }
}

impl<T: Schema> ErasedSerializer for DynamicSerializer<T> {
    fn record_type(&self) -> ValueType {
        T::value_type()
    }

    fn tree(&self) -> Result<&Arc<FieldTree>> {
        DynamicSerializer::tree(self)
    }

    fn write_header(&self, out: &mut BytesMut) -> Result<()> {
        DynamicSerializer::tree(self)?.write(out);
        Ok(())
    }

    fn max_record_size(&self) -> usize {
        DynamicSerializer::max_record_size(self)
    }

    fn unpack_rows(&self, block: Bytes, max_item_count: usize) -> Result<Vec<ScalarRow>> {
        self.compiled()?
            .unpack_rows(&mut CodecReader::new(block), max_item_count)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builds and freezes a default serializer for the invoker's record type.
#[derive(Clone)]
pub struct SerializerFactory {
    pub config: CodecConfig,
    pub registry: Arc<CodecRegistry>,
    pub factory: Option<FieldFactory>,
}

impl SerializerFactory {
    pub fn new(config: CodecConfig, registry: Arc<CodecRegistry>) -> Self {
        Self {
            config,
            registry,
            factory: None,
        }
    }

    pub fn with_factory(mut self, factory: FieldFactory) -> Self {
        self.factory = Some(factory);
        self
    }

    fn build<T: Schema>(&self) -> Result<Box<dyn ErasedSerializer>> {
        let mut serializer = DynamicSerializer::<T>::with_options(
            self.config.clone(),
            Arc::clone(&self.registry),
            self.factory.clone(),
        )?;
        serializer.freeze()?;
        tracing::debug!(
            "SerializerFactory: built serializer for {}",
            core::any::type_name::<T>()
        );
        Ok(Box::new(serializer))
    }
}

impl Default for SerializerFactory {
    fn default() -> Self {
        Self::new(CodecConfig::default(), Arc::new(CodecRegistry::new()))
    }
}

impl fmt::Debug for SerializerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerFactory")
            .field("config", &self.config)
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

impl GenericCallable<()> for SerializerFactory {
    type Output = Result<Box<dyn ErasedSerializer>>;

    fn run<T: Schema, S: GenericInvoker>(&self, _source: &S, _arg: ()) -> Self::Output {
        self.build::<T>()
    }
}

impl GenericCallable2<()> for SerializerFactory {
    type Output = Result<Box<dyn ErasedSerializer>>;

    fn run<I: SeriesIndex, V: Schema, S: GenericInvoker2>(
        &self,
        _source: &S,
        _arg: (),
    ) -> Self::Output {
        self.build::<V>()
    }
}

/// Restores a serializer for the invoker's record type from a header.
#[derive(Debug, Clone)]
pub struct HeaderLoader {
    pub config: CodecConfig,
    pub registry: Arc<CodecRegistry>,
}

impl HeaderLoader {
    pub fn new(config: CodecConfig, registry: Arc<CodecRegistry>) -> Self {
        Self { config, registry }
    }

    fn load<T: Schema>(&self, mut header: Bytes) -> Result<Box<dyn ErasedSerializer>> {
        let serializer = DynamicSerializer::<T>::from_header_with(
            &mut header,
            Arc::clone(&self.registry),
            self.config.clone(),
            BlockCache::global(),
        )?;
        Ok(Box::new(serializer))
    }
}

impl GenericCallable<Bytes> for HeaderLoader {
    type Output = Result<Box<dyn ErasedSerializer>>;

    fn run<T: Schema, S: GenericInvoker>(&self, _source: &S, header: Bytes) -> Self::Output {
        self.load::<T>(header)
    }
}

impl GenericCallable2<Bytes> for HeaderLoader {
    type Output = Result<Box<dyn ErasedSerializer>>;

    fn run<I: SeriesIndex, V: Schema, S: GenericInvoker2>(
        &self,
        _source: &S,
        header: Bytes,
    ) -> Self::Output {
        self.load::<V>(header)
    }
}
