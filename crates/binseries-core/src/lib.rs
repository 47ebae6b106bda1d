pub mod bridge;
pub mod config;
pub mod error;
pub mod guard;
pub mod schema;

pub use bridge::{
    GenericCallable, GenericCallable2, GenericInvoker, GenericInvoker2, SeriesDescriptor,
    SeriesIndex,
};
pub use config::CodecConfig;
pub use error::{BoxError, CodecError, Result, SerializerError};
pub use guard::InitGuard;
pub use schema::{
    Category, FormatVersion, Member, Primitive, RowReader, Scalar, ScalarValue, Schema,
    StructType, ValueType,
};
