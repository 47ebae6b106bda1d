//! # binseries-codec: Dynamic Field-Tree Codec
//!
//! Builds a tree of per-field codecs from a record's [`Schema`], compiles it
//! into a pair of block procedures (pack with delta/scale encoding, unpack)
//! and persists the tree as a versioned header so blocks can be read back
//! without the original record type.
//!
//! ```ignore
//! let mut s = DynamicSerializer::<Tick>::new()?;
//! s.root_as_mut::<ComplexField>()?
//!     .field_as_mut::<ScaledDeltaFloatField>("value")?
//!     .set_multiplier(10_000.0)?;
//! s.freeze()?;
//! let blocks = s.pack_all(&mut SliceCursor::new(&ticks).unwrap())?;
//! ```
//!
//! [`Schema`]: binseries_core::Schema

pub mod cache;
pub mod compiler;
pub mod complex;
pub mod delta_float;
pub mod delta_int;
pub mod factory;
pub mod field;
pub mod header;
pub mod registry;
pub mod serializer;
pub mod simple;
pub mod state;
pub mod step;
pub mod store;
pub mod tree;

pub use cache::BlockCache;
pub use compiler::{compile, CompiledBlock, RowCursor};
pub use complex::{ComplexField, SubField};
pub use delta_float::ScaledDeltaFloatField;
pub use delta_int::ScaledDeltaIntField;
pub use factory::{ErasedSerializer, HeaderLoader, SerializerFactory};
pub use field::{Field, FieldBase};
pub use header::HeaderInput;
pub use registry::{CodecRegistry, FieldConstructor};
pub use serializer::{DynamicSerializer, PackProcedure, UnpackProcedure, ROOT_STATE_NAME};
pub use simple::SimpleField;
pub use state::{StateFrame, StateRegistry, StateSlot};
pub use step::{CompileContext, DecodeCtx, DecodeStep, EncodeCtx, EncodeStep};
pub use store::{FieldFactory, StateStore};
pub use tree::FieldTree;

/// A flattened record as produced by the dynamic reader.
pub type ScalarRow = Vec<binseries_core::Scalar>;

static_assertions::assert_impl_all!(CompiledBlock: Send, Sync);
static_assertions::assert_impl_all!(FieldTree: Send, Sync);
static_assertions::assert_impl_all!(BlockCache: Send, Sync);
static_assertions::assert_impl_all!(CodecRegistry: Send, Sync);
