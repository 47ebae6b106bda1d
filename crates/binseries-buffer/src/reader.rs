use bytes::{Buf, Bytes};

use binseries_core::SerializerError;

use crate::varint;
use crate::writer::{BLOCK_HEADER_SIZE, HAS_MORE_FLAG};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub item_count: usize,
    pub has_more: bool,
}

/// Reader over one finished block. Reads never panic on short input.
#[derive(Debug, Clone)]
pub struct CodecReader {
    buf: Bytes,
}

impl CodecReader {
    pub fn new(block: Bytes) -> Self {
        Self { buf: block }
    }

    pub fn from_slice(block: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(block))
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn read_header(&mut self) -> Result<BlockHeader, SerializerError> {
        if self.buf.remaining() < BLOCK_HEADER_SIZE {
            return Err(SerializerError::UnexpectedEof("block header"));
        }
        let raw = self.buf.get_u32_le();
        Ok(BlockHeader {
            item_count: (raw & !HAS_MORE_FLAG) as usize,
            has_more: raw & HAS_MORE_FLAG != 0,
        })
    }

    #[inline]
    pub fn read_raw<const N: usize>(&mut self) -> Result<[u8; N], SerializerError> {
        if self.buf.remaining() < N {
            return Err(SerializerError::UnexpectedEof("raw field"));
        }
        let mut out = [0u8; N];
        self.buf.copy_to_slice(&mut out);
        Ok(out)
    }

    #[inline]
    pub fn read_signed(&mut self) -> Result<i64, SerializerError> {
        varint::decode_signed(&mut self.buf)
    }
}
