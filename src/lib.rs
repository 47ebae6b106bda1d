//! # binseries
//!
//! Block codec for binary time-series files. Records of a fixed shape are
//! packed into byte blocks with per-field delta/scale encoding; the field
//! tree that drives the encoding is persisted alongside so a file can be
//! decoded later without the original record type.
//!
//! - [`model`]: record schema, errors, configuration, dispatch bridge.
//! - [`buffer`]: block writer/reader, varints, cursors.
//! - [`codec`]: field nodes, builder, compiler, cache, header format.

pub use binseries_buffer as buffer;
pub use binseries_codec as codec;
pub use binseries_core as model;

pub use binseries_buffer::{CodecReader, CodecWriter, RecordCursor, ResultSink, SliceCursor};
pub use binseries_codec::{
    BlockCache, CodecRegistry, ComplexField, DynamicSerializer, ErasedSerializer, Field,
    FieldTree, HeaderLoader, ScaledDeltaFloatField, ScaledDeltaIntField, SerializerFactory,
    SimpleField,
};
pub use binseries_core::{
    record, CodecConfig, CodecError, Result, Scalar, Schema, SerializerError, ValueType,
};
