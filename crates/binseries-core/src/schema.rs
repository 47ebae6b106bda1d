//! # Record Schema Description
//!
//! Record types describe their own shape instead of relying on runtime
//! reflection. A [`Schema`] type reports its [`ValueType`] and converts itself
//! to and from a flat row of [`Scalar`] values, one per primitive leaf, in
//! member declaration order (depth-first).
//!
//! The [`record!`](crate::record) macro derives the implementation for plain
//! structs.

use core::fmt;

use crate::error::SerializerError;

/// Format version tag written by every codec node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormatVersion {
    pub major: u16,
    pub minor: u16,
}

impl FormatVersion {
    pub const V0: FormatVersion = FormatVersion { major: 0, minor: 0 };

    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// How a primitive is encoded by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    /// Stored verbatim, no delta.
    Raw,
    Integer,
    Float,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    U8,
    I8,
    Char,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
}

impl Primitive {
    pub const ALL: [Primitive; 12] = [
        Primitive::Bool,
        Primitive::U8,
        Primitive::I8,
        Primitive::Char,
        Primitive::I16,
        Primitive::U16,
        Primitive::I32,
        Primitive::U32,
        Primitive::I64,
        Primitive::U64,
        Primitive::F32,
        Primitive::F64,
    ];

    /// Persisted one-byte tag.
    pub fn tag(self) -> u8 {
        match self {
            Primitive::Bool => 1,
            Primitive::U8 => 2,
            Primitive::I8 => 3,
            Primitive::Char => 4,
            Primitive::I16 => 5,
            Primitive::U16 => 6,
            Primitive::I32 => 7,
            Primitive::U32 => 8,
            Primitive::I64 => 9,
            Primitive::U64 => 10,
            Primitive::F32 => 11,
            Primitive::F64 => 12,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.tag() == tag)
    }

    pub fn category(self) -> Category {
        match self {
            Primitive::Bool | Primitive::U8 | Primitive::I8 => Category::Raw,
            Primitive::F32 | Primitive::F64 => Category::Float,
            _ => Category::Integer,
        }
    }

    /// Width of the in-memory value in bytes.
    pub fn byte_width(self) -> usize {
        match self {
            Primitive::Bool | Primitive::U8 | Primitive::I8 => 1,
            Primitive::I16 | Primitive::U16 => 2,
            Primitive::Char | Primitive::I32 | Primitive::U32 | Primitive::F32 => 4,
            Primitive::I64 | Primitive::U64 | Primitive::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Primitive::Bool => "bool",
            Primitive::U8 => "u8",
            Primitive::I8 => "i8",
            Primitive::Char => "char",
            Primitive::I16 => "i16",
            Primitive::U16 => "u16",
            Primitive::I32 => "i32",
            Primitive::U32 => "u32",
            Primitive::I64 => "i64",
            Primitive::U64 => "u64",
            Primitive::F32 => "f32",
            Primitive::F64 => "f64",
        }
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One primitive leaf value of a flattened record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    Bool(bool),
    U8(u8),
    I8(i8),
    Char(char),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Scalar {
    pub fn primitive(&self) -> Primitive {
        match self {
            Scalar::Bool(_) => Primitive::Bool,
            Scalar::U8(_) => Primitive::U8,
            Scalar::I8(_) => Primitive::I8,
            Scalar::Char(_) => Primitive::Char,
            Scalar::I16(_) => Primitive::I16,
            Scalar::U16(_) => Primitive::U16,
            Scalar::I32(_) => Primitive::I32,
            Scalar::U32(_) => Primitive::U32,
            Scalar::I64(_) => Primitive::I64,
            Scalar::U64(_) => Primitive::U64,
            Scalar::F32(_) => Primitive::F32,
            Scalar::F64(_) => Primitive::F64,
        }
    }

    /// Zero value of the given primitive.
    pub fn zero(p: Primitive) -> Scalar {
        match p {
            Primitive::Bool => Scalar::Bool(false),
            Primitive::U8 => Scalar::U8(0),
            Primitive::I8 => Scalar::I8(0),
            Primitive::Char => Scalar::Char('\0'),
            Primitive::I16 => Scalar::I16(0),
            Primitive::U16 => Scalar::U16(0),
            Primitive::I32 => Scalar::I32(0),
            Primitive::U32 => Scalar::U32(0),
            Primitive::I64 => Scalar::I64(0),
            Primitive::U64 => Scalar::U64(0),
            Primitive::F32 => Scalar::F32(0.0),
            Primitive::F64 => Scalar::F64(0.0),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(v) => write!(f, "{v}"),
            Scalar::U8(v) => write!(f, "{v}"),
            Scalar::I8(v) => write!(f, "{v}"),
            Scalar::Char(v) => write!(f, "{v:?}"),
            Scalar::I16(v) => write!(f, "{v}"),
            Scalar::U16(v) => write!(f, "{v}"),
            Scalar::I32(v) => write!(f, "{v}"),
            Scalar::U32(v) => write!(f, "{v}"),
            Scalar::I64(v) => write!(f, "{v}"),
            Scalar::U64(v) => write!(f, "{v}"),
            Scalar::F32(v) => write!(f, "{v}"),
            Scalar::F64(v) => write!(f, "{v}"),
        }
    }
}

/// A Rust primitive that maps 1:1 onto a [`Scalar`] variant.
pub trait ScalarValue: Copy + Send + Sync + 'static {
    const PRIMITIVE: Primitive;

    fn into_scalar(self) -> Scalar;

    fn from_scalar(scalar: Scalar) -> Option<Self>;
}

macro_rules! scalar_value {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl ScalarValue for $ty {
                const PRIMITIVE: Primitive = Primitive::$variant;

                #[inline]
                fn into_scalar(self) -> Scalar {
                    Scalar::$variant(self)
                }

                #[inline]
                fn from_scalar(scalar: Scalar) -> Option<Self> {
                    match scalar {
                        Scalar::$variant(v) => Some(v),
                        _ => None,
                    }
                }
            }

            impl Schema for $ty {
                fn value_type() -> ValueType {
                    ValueType::Primitive(Primitive::$variant)
                }

                #[inline]
                fn flatten(&self, row: &mut Vec<Scalar>) {
                    row.push(Scalar::$variant(*self));
                }

                #[inline]
                fn unflatten(row: &mut RowReader<'_>) -> Result<Self, SerializerError> {
                    row.next::<$ty>()
                }
            }
        )*
    };
}

scalar_value! {
    bool => Bool,
    u8 => U8,
    i8 => I8,
    char => Char,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

/// A named member of a structured type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    pub name: String,
    pub ty: ValueType,
}

impl Member {
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructType {
    pub name: String,
    /// Instance members in declaration order.
    pub members: Vec<Member>,
    /// Name of a registered custom field codec that replaces automatic inference.
    pub codec: Option<String>,
}

impl StructType {
    pub fn new(name: impl Into<String>, members: Vec<Member>) -> Self {
        Self {
            name: name.into(),
            members,
            codec: None,
        }
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }
}

/// Shape of a record, member or primitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    Primitive(Primitive),
    /// Variable-length sequence. Never supported inside records.
    Array(Box<ValueType>),
    /// Fixed-size inline buffer. Never supported inside records.
    FixedBuffer { elem: Primitive, len: usize },
    Struct(StructType),
}

impl ValueType {
    pub fn as_primitive(&self) -> Option<Primitive> {
        match self {
            ValueType::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            ValueType::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// Primitive kinds of the flattened row, in order.
    pub fn flat_layout(&self, out: &mut Vec<Primitive>) -> Result<(), SerializerError> {
        match self {
            ValueType::Primitive(p) => out.push(*p),
            ValueType::Array(_) => return Err(SerializerError::ArrayNotSupported(self.to_string())),
            ValueType::FixedBuffer { elem, len } => {
                out.extend(core::iter::repeat(*elem).take(*len));
            }
            ValueType::Struct(s) => {
                for m in &s.members {
                    m.ty.flat_layout(out)?;
                }
            }
        }
        Ok(())
    }

    /// Number of scalars this type occupies in a flattened row.
    pub fn scalar_count(&self) -> usize {
        match self {
            ValueType::Primitive(_) => 1,
            ValueType::Array(_) => 0,
            ValueType::FixedBuffer { len, .. } => *len,
            ValueType::Struct(s) => s.members.iter().map(|m| m.ty.scalar_count()).sum(),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Primitive(p) => write!(f, "{p}"),
            ValueType::Array(elem) => write!(f, "[{elem}]"),
            ValueType::FixedBuffer { elem, len } => write!(f, "[{elem}; {len}]"),
            ValueType::Struct(s) => f.write_str(&s.name),
        }
    }
}

/// Sequential reader over a flattened row.
#[derive(Debug)]
pub struct RowReader<'a> {
    row: &'a [Scalar],
    pos: usize,
}

impl<'a> RowReader<'a> {
    pub fn new(row: &'a [Scalar]) -> Self {
        Self { row, pos: 0 }
    }

    pub fn next<P: ScalarValue>(&mut self) -> Result<P, SerializerError> {
        let scalar = *self
            .row
            .get(self.pos)
            .ok_or(SerializerError::UnexpectedEof("record row"))?;
        self.pos += 1;
        P::from_scalar(scalar).ok_or_else(|| SerializerError::LayoutMismatch {
            type_name: P::PRIMITIVE.to_string(),
            detail: format!("found {} at position {}", scalar.primitive(), self.pos - 1),
        })
    }

    pub fn remaining(&self) -> usize {
        self.row.len() - self.pos
    }
}

/// A record shape that can be flattened into scalars and rebuilt from them.
pub trait Schema: Sized + Send + Sync + 'static {
    fn value_type() -> ValueType;

    fn flatten(&self, row: &mut Vec<Scalar>);

    fn unflatten(row: &mut RowReader<'_>) -> Result<Self, SerializerError>;
}

impl<P: ScalarValue + Schema, const N: usize> Schema for [P; N] {
    fn value_type() -> ValueType {
        ValueType::FixedBuffer {
            elem: P::PRIMITIVE,
            len: N,
        }
    }

    fn flatten(&self, row: &mut Vec<Scalar>) {
        row.extend(self.iter().map(|v| v.into_scalar()));
    }

    fn unflatten(row: &mut RowReader<'_>) -> Result<Self, SerializerError> {
        let mut values = Vec::with_capacity(N);
        for _ in 0..N {
            values.push(row.next::<P>()?);
        }
        values
            .try_into()
            .map_err(|_| SerializerError::UnexpectedEof("fixed buffer"))
    }
}

impl<T: Schema> Schema for Vec<T> {
    fn value_type() -> ValueType {
        ValueType::Array(Box::new(T::value_type()))
    }

    fn flatten(&self, row: &mut Vec<Scalar>) {
        for item in self {
            item.flatten(row);
        }
    }

    fn unflatten(_row: &mut RowReader<'_>) -> Result<Self, SerializerError> {
        Err(SerializerError::ArrayNotSupported(Self::value_type().to_string()))
    }
}

/// Declares a plain struct and implements [`Schema`] for it.
///
/// ```ignore
/// binseries_core::record! {
///     #[derive(Debug, Clone, Copy, PartialEq, Default)]
///     pub struct Tick { pub id: u16, pub ts: i64, pub value: f64 }
/// }
/// ```
///
/// Prefix with `@codec "name"` to attach a registered custom field codec.
#[macro_export]
macro_rules! record {
    (@emit $codec:expr,
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty ),*
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $( $(#[$fmeta])* $fvis $field : $ty ),*
        }

        impl $crate::schema::Schema for $name {
            fn value_type() -> $crate::schema::ValueType {
                let codec: ::core::option::Option<&str> = $codec;
                $crate::schema::ValueType::Struct($crate::schema::StructType {
                    name: ::core::stringify!($name).to_string(),
                    members: vec![
                        $( $crate::schema::Member::new(
                            ::core::stringify!($field),
                            <$ty as $crate::schema::Schema>::value_type(),
                        ) ),*
                    ],
                    codec: codec.map(|c| c.to_string()),
                })
            }

            fn flatten(&self, row: &mut Vec<$crate::schema::Scalar>) {
                $( $crate::schema::Schema::flatten(&self.$field, row); )*
            }

            fn unflatten(
                row: &mut $crate::schema::RowReader<'_>,
            ) -> ::core::result::Result<Self, $crate::error::SerializerError> {
                Ok(Self {
                    $( $field: <$ty as $crate::schema::Schema>::unflatten(row)?, )*
                })
            }
        }
    };
    (@codec $codec:literal
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $crate::record! { @emit ::core::option::Option::Some($codec),
            $(#[$meta])*
            $vis struct $name { $( $(#[$fmeta])* $fvis $field : $ty ),* }
        }
    };
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $( $(#[$fmeta:meta])* $fvis:vis $field:ident : $ty:ty ),* $(,)?
        }
    ) => {
        $crate::record! { @emit ::core::option::Option::None,
            $(#[$meta])*
            $vis struct $name { $( $(#[$fmeta])* $fvis $field : $ty ),* }
        }
    };
}
