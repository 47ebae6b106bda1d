use crate::schema::{FormatVersion, Primitive};

/// Boxed cause carried by custom codec construction failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Configuration and format problems found while building, persisting or
/// reloading a field tree. Never recovered automatically.
#[derive(thiserror::Error, Debug)]
pub enum SerializerError {
    #[error("Arrays are not supported ({0})")]
    ArrayNotSupported(String),
    #[error("Fixed arrays are not supported at this time ({type_name}.{member})")]
    FixedBufferNotSupported { type_name: String, member: String },
    #[error("Unsupported type {0}")]
    UnsupportedType(String),
    #[error(
        "State '{name}' was requested as type {requested}, but was previously created as type {existing}"
    )]
    StateTypeMismatch {
        name: String,
        requested: Primitive,
        existing: Primitive,
    },
    #[error("Custom field serializer {codec} attached to type {type_name} failed")]
    CustomField {
        codec: String,
        type_name: String,
        #[source]
        source: BoxError,
    },
    #[error("Custom field serializer {codec} attached to type {type_name} is not registered")]
    UnknownCodec { codec: String, type_name: String },
    #[error("Unknown field type '{0}' in header")]
    UnknownFieldType(String),
    #[error("Field {kind} does not support version {version}")]
    UnsupportedVersion { kind: String, version: FormatVersion },
    #[error("Unexpected end of data while reading {0}")]
    UnexpectedEof(&'static str),
    #[error("Invalid header: {0}")]
    InvalidHeader(String),
    #[error("Value {value} of '{state_name}' cannot be encoded: {reason}")]
    ValueOutOfRange {
        state_name: String,
        value: String,
        reason: &'static str,
    },
    #[error("Record type {type_name} does not match the stored field layout: {detail}")]
    LayoutMismatch { type_name: String, detail: String },
    #[error("Block buffer overflow: {needed} bytes needed, {available} available")]
    BufferOverflow { needed: usize, available: usize },
}

/// Top-level error: a [`SerializerError`] or a violated caller contract.
#[derive(thiserror::Error, Debug)]
pub enum CodecError {
    #[error(transparent)]
    Serializer(#[from] SerializerError),
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),
    #[error("{0} is already initialized and can no longer be modified")]
    AlreadyInitialized(&'static str),
    #[error("Argument '{name}' is out of range: {reason}")]
    ArgumentOutOfRange { name: &'static str, reason: String },
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

impl CodecError {
    pub fn out_of_range(name: &'static str, reason: impl Into<String>) -> Self {
        CodecError::ArgumentOutOfRange {
            name,
            reason: reason.into(),
        }
    }

    /// Returns the wrapped [`SerializerError`], if this is one.
    pub fn as_serializer(&self) -> Option<&SerializerError> {
        match self {
            CodecError::Serializer(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T, E = CodecError> = std::result::Result<T, E>;
