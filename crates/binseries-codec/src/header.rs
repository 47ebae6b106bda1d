//! # Field-Tree Header Format
//!
//! A tree is persisted depth-first. Each node is written as
//!
//! ```text
//! kind: str | major: u16 | minor: u16 | value type | state name: str | config
//! ```
//!
//! All integers are little-endian and strings are a `u32` byte length
//! followed by UTF-8. A value type is a one-byte tag: primitive tags are
//! `1..=12`, then array (`0x20`, element type), fixed buffer (`0x21`,
//! element tag, `u32` length of at most [`MAX_FIXED_BUFFER_LEN`]) and
//! struct (`0x30`, name, optional codec name, `u32` member count, members
//! as name plus type).
//!
//! Reload resolves each kind through the [`CodecRegistry`](crate::CodecRegistry),
//! constructs the node with its three-argument constructor, checks the
//! version and then lets the node read its own configuration. Nesting is
//! bounded by `max_header_depth`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use binseries_core::{
    CodecError, FormatVersion, Member, Primitive, Result, SerializerError, StructType, ValueType,
};

use crate::field::Field;
use crate::store::StateStore;

const TAG_ARRAY: u8 = 0x20;
const TAG_FIXED_BUFFER: u8 = 0x21;
const TAG_STRUCT: u8 = 0x30;

/// Largest fixed-buffer length accepted from a header.
pub const MAX_FIXED_BUFFER_LEN: usize = 1 << 16;

pub fn put_str(out: &mut BytesMut, s: &str) {
    out.put_u32_le(s.len() as u32);
    out.put_slice(s.as_bytes());
}

pub fn write_value_type(out: &mut BytesMut, ty: &ValueType) {
    match ty {
        ValueType::Primitive(p) => out.put_u8(p.tag()),
        ValueType::Array(elem) => {
            out.put_u8(TAG_ARRAY);
            write_value_type(out, elem);
        }
        ValueType::FixedBuffer { elem, len } => {
            out.put_u8(TAG_FIXED_BUFFER);
            out.put_u8(elem.tag());
            out.put_u32_le(*len as u32);
        }
        ValueType::Struct(s) => {
            out.put_u8(TAG_STRUCT);
            put_str(out, &s.name);
            match &s.codec {
                Some(codec) => {
                    out.put_u8(1);
                    put_str(out, codec);
                }
                None => out.put_u8(0),
            }
            out.put_u32_le(s.members.len() as u32);
            for m in &s.members {
                put_str(out, &m.name);
                write_value_type(out, &m.ty);
            }
        }
    }
}

/// Writes `field` and, through its configuration, all of its descendants.
pub fn write_field(field: &dyn Field, out: &mut BytesMut) {
    let base = field.base();
    put_str(out, field.kind());
    out.put_u16_le(base.version().major);
    out.put_u16_le(base.version().minor);
    write_value_type(out, base.value_type());
    put_str(out, base.state_name());
    field.write_config(out);
}

/// Cursor over a persisted header, handed to [`Field::read_config`].
pub struct HeaderInput<'a> {
    buf: &'a mut Bytes,
    store: &'a mut StateStore,
    depth: usize,
    max_depth: usize,
}

impl<'a> HeaderInput<'a> {
    pub fn new(buf: &'a mut Bytes, store: &'a mut StateStore) -> Self {
        let max_depth = store.config().max_header_depth;
        Self {
            buf,
            store,
            depth: 0,
            max_depth,
        }
    }

    /// Builder store of the tree being reloaded.
    pub fn store(&mut self) -> &mut StateStore {
        &mut *self.store
    }

    fn need(&self, n: usize, what: &'static str) -> std::result::Result<(), SerializerError> {
        if self.buf.remaining() < n {
            return Err(SerializerError::UnexpectedEof(what));
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> std::result::Result<u8, SerializerError> {
        self.need(1, "header byte")?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self) -> std::result::Result<u16, SerializerError> {
        self.need(2, "header u16")?;
        Ok(self.buf.get_u16_le())
    }

    pub fn read_u32(&mut self) -> std::result::Result<u32, SerializerError> {
        self.need(4, "header u32")?;
        Ok(self.buf.get_u32_le())
    }

    pub fn read_u64(&mut self) -> std::result::Result<u64, SerializerError> {
        self.need(8, "header u64")?;
        Ok(self.buf.get_u64_le())
    }

    pub fn read_f64(&mut self) -> std::result::Result<f64, SerializerError> {
        self.need(8, "header f64")?;
        Ok(self.buf.get_f64_le())
    }

    pub fn read_str(&mut self) -> std::result::Result<String, SerializerError> {
        let len = self.read_u32()? as usize;
        self.need(len, "header string")?;
        let raw = self.buf.split_to(len);
        String::from_utf8(raw.to_vec())
            .map_err(|_| SerializerError::InvalidHeader("string is not valid UTF-8".into()))
    }

    pub fn read_value_type(&mut self) -> std::result::Result<ValueType, SerializerError> {
        self.read_value_type_at(0)
    }

    fn read_value_type_at(&mut self, depth: usize) -> std::result::Result<ValueType, SerializerError> {
        if depth > self.max_depth {
            return Err(SerializerError::InvalidHeader(format!(
                "value type nesting exceeds {}",
                self.max_depth
            )));
        }
        let tag = self.read_u8()?;
        match tag {
            TAG_ARRAY => Ok(ValueType::Array(Box::new(self.read_value_type_at(depth + 1)?))),
            TAG_FIXED_BUFFER => {
                let elem = self.read_primitive()?;
                let len = self.read_u32()? as usize;
                if len > MAX_FIXED_BUFFER_LEN {
                    return Err(SerializerError::InvalidHeader(format!(
                        "fixed buffer length {len} exceeds {MAX_FIXED_BUFFER_LEN}"
                    )));
                }
                Ok(ValueType::FixedBuffer { elem, len })
            }
            TAG_STRUCT => {
                let name = self.read_str()?;
                let codec = match self.read_u8()? {
                    0 => None,
                    1 => Some(self.read_str()?),
                    other => {
                        return Err(SerializerError::InvalidHeader(format!(
                            "bad codec flag {other} on struct {name}"
                        )))
                    }
                };
                let count = self.read_u32()? as usize;
                let mut members = Vec::with_capacity(count.min(self.buf.remaining()));
                for _ in 0..count {
                    let member = self.read_str()?;
                    let ty = self.read_value_type_at(depth + 1)?;
                    members.push(Member::new(member, ty));
                }
                Ok(ValueType::Struct(StructType {
                    name,
                    members,
                    codec,
                }))
            }
            _ => Primitive::from_tag(tag)
                .map(ValueType::Primitive)
                .ok_or_else(|| SerializerError::InvalidHeader(format!("unknown type tag {tag:#04x}"))),
        }
    }

    fn read_primitive(&mut self) -> std::result::Result<Primitive, SerializerError> {
        let tag = self.read_u8()?;
        Primitive::from_tag(tag)
            .ok_or_else(|| SerializerError::InvalidHeader(format!("unknown primitive tag {tag:#04x}")))
    }

    /// Reads one node, and its children, as written by [`write_field`].
    pub fn read_field(&mut self) -> Result<Box<dyn Field>> {
        if self.depth >= self.max_depth {
            return Err(SerializerError::InvalidHeader(format!(
                "field nesting exceeds {}",
                self.max_depth
            ))
            .into());
        }
        self.depth += 1;
        let field = self.read_field_inner();
        self.depth -= 1;
        field
    }

    fn read_field_inner(&mut self) -> Result<Box<dyn Field>> {
        let kind = self.read_str()?;
        let version = FormatVersion::new(self.read_u16()?, self.read_u16()?);
        let value_type = self.read_value_type()?;
        let state_name = self.read_str()?;

        let ctor = self
            .store
            .registry()
            .resolve(&kind)
            .ok_or_else(|| SerializerError::UnknownFieldType(kind.clone()))?;
        let mut field = ctor(&mut *self.store, &value_type, &state_name).map_err(|source| {
            match source.downcast::<CodecError>() {
                Ok(e) => *e,
                Err(source) => CodecError::from(SerializerError::CustomField {
                    codec: kind.clone(),
                    type_name: value_type.to_string(),
                    source,
                }),
            }
        })?;

        if field.kind() != kind {
            return Err(SerializerError::InvalidHeader(format!(
                "constructor registered as '{kind}' produced a '{}' field",
                field.kind()
            ))
            .into());
        }
        if !field.is_valid_version(version) {
            tracing::warn!(
                "HeaderInput: rejecting field '{}' of kind {} with version {}",
                state_name,
                kind,
                version
            );
            return Err(SerializerError::UnsupportedVersion { kind, version }.into());
        }
        field.base_mut().set_version(version);
        field.read_config(self)?;
        Ok(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use binseries_core::CodecConfig;

    use crate::registry::CodecRegistry;

    fn store() -> StateStore {
        StateStore::new(CodecConfig::default(), Arc::new(CodecRegistry::new()))
    }

    #[test]
    fn test_value_type_roundtrip() {
        let ty = ValueType::Struct(
            StructType::new(
                "Quote",
                vec![
                    Member::new("ts", ValueType::Primitive(Primitive::I64)),
                    Member::new("bytes", ValueType::FixedBuffer { elem: Primitive::U8, len: 4 }),
                    Member::new("seq", ValueType::Array(Box::new(ValueType::Primitive(Primitive::F32)))),
                ],
            )
            .with_codec("QuoteField"),
        );
        let mut out = BytesMut::new();
        write_value_type(&mut out, &ty);

        let mut bytes = out.freeze();
        let mut store = store();
        let mut input = HeaderInput::new(&mut bytes, &mut store);
        assert_eq!(input.read_value_type().unwrap(), ty);
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_truncated_header_is_eof() {
        let mut out = BytesMut::new();
        put_str(&mut out, "SimpleField");
        let mut bytes = out.freeze();
        let mut store = store();
        let err = HeaderInput::new(&mut bytes, &mut store).read_field().unwrap_err();
        assert!(matches!(
            err.as_serializer(),
            Some(SerializerError::UnexpectedEof(_))
        ));
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let mut out = BytesMut::new();
        put_str(&mut out, "NoSuchField");
        out.put_u16_le(0);
        out.put_u16_le(0);
        write_value_type(&mut out, &ValueType::Primitive(Primitive::I32));
        put_str(&mut out, "root");
        let mut bytes = out.freeze();
        let mut store = store();
        let err = HeaderInput::new(&mut bytes, &mut store).read_field().unwrap_err();
        assert!(matches!(
            err.as_serializer(),
            Some(SerializerError::UnknownFieldType(k)) if k == "NoSuchField"
        ));
    }

    #[test]
    fn test_oversized_fixed_buffer_is_rejected() {
        let mut out = BytesMut::new();
        out.put_u8(TAG_FIXED_BUFFER);
        out.put_u8(Primitive::U8.tag());
        out.put_u32_le(u32::MAX);
        let mut bytes = out.freeze();
        let mut store = store();
        let err = HeaderInput::new(&mut bytes, &mut store)
            .read_value_type()
            .unwrap_err();
        assert!(matches!(err, SerializerError::InvalidHeader(_)));
    }
}
