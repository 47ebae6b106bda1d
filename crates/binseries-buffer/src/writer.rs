use bytes::{BufMut, Bytes, BytesMut};

use binseries_core::{CodecError, SerializerError};

use crate::varint::{self, MAX_VARINT_LEN};

/// Bytes reserved at the start of every block for the item count and flag.
pub const BLOCK_HEADER_SIZE: usize = 4;

/// Bit 31 of the block header: more records follow in later blocks.
pub(crate) const HAS_MORE_FLAG: u32 = 1 << 31;

/// Largest item count a block header can hold.
pub const MAX_BLOCK_ITEMS: usize = (HAS_MORE_FLAG - 1) as usize;

/// Fixed-capacity writer for one block.
///
/// ## Write Discipline
/// `write_*` methods are unconditional and fail with `BufferOverflow` when
/// the block is full; they are used for the first record of a block.
/// `try_write_*` methods return `false` without touching the buffer when the
/// value does not fit, which is how a block reports that it is full.
#[derive(Debug)]
pub struct CodecWriter {
    buf: BytesMut,
    capacity: usize,
}

impl CodecWriter {
    pub fn new(capacity: usize) -> Result<Self, CodecError> {
        if capacity <= BLOCK_HEADER_SIZE {
            return Err(CodecError::out_of_range(
                "capacity",
                format!("block must be larger than its {BLOCK_HEADER_SIZE}-byte header"),
            ));
        }
        let mut buf = BytesMut::with_capacity(capacity);
        buf.put_bytes(0, BLOCK_HEADER_SIZE);
        Ok(Self { buf, capacity })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current write position, header included.
    #[inline]
    pub fn count(&self) -> usize {
        self.buf.len()
    }

    /// Rewinds to an earlier position returned by [`CodecWriter::count`].
    pub fn set_count(&mut self, pos: usize) -> Result<(), CodecError> {
        if !(BLOCK_HEADER_SIZE..=self.buf.len()).contains(&pos) {
            return Err(CodecError::out_of_range(
                "pos",
                format!("cannot move write position to {pos} (len {})", self.buf.len()),
            ));
        }
        self.buf.truncate(pos);
        Ok(())
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Number of payload bytes written so far.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.buf.len() - BLOCK_HEADER_SIZE
    }

    fn overflow(&self, needed: usize) -> SerializerError {
        SerializerError::BufferOverflow {
            needed,
            available: self.remaining(),
        }
    }

    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<(), SerializerError> {
        if !self.try_write_raw(bytes) {
            return Err(self.overflow(bytes.len()));
        }
        Ok(())
    }

    pub fn write_signed(&mut self, value: i64) -> Result<(), SerializerError> {
        let mut tmp = [0u8; MAX_VARINT_LEN];
        let len = varint::encode_signed(value, &mut tmp);
        self.write_raw(&tmp[..len])
    }

    #[inline]
    pub fn try_write_raw(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.remaining() {
            return false;
        }
        self.buf.put_slice(bytes);
        true
    }

    #[inline]
    pub fn try_write_signed(&mut self, value: i64) -> bool {
        let mut tmp = [0u8; MAX_VARINT_LEN];
        let len = varint::encode_signed(value, &mut tmp);
        self.try_write_raw(&tmp[..len])
    }

    /// Stamps the block header with the item count and the has-more flag.
    pub fn finish_block(&mut self, item_count: usize, has_more: bool) -> Result<(), CodecError> {
        if item_count > MAX_BLOCK_ITEMS {
            return Err(CodecError::out_of_range(
                "item_count",
                format!("{item_count} exceeds {MAX_BLOCK_ITEMS}"),
            ));
        }
        let mut header = item_count as u32;
        if has_more {
            header |= HAS_MORE_FLAG;
        }
        self.buf[..BLOCK_HEADER_SIZE].copy_from_slice(&header.to_le_bytes());
        tracing::trace!(
            "CodecWriter: finished block ({} items, {} bytes, more={})",
            item_count,
            self.buf.len(),
            has_more
        );
        Ok(())
    }

    /// Finished block bytes so far.
    pub fn block(&self) -> &[u8] {
        &self.buf
    }

    /// Hands out the current block and starts a new, empty one.
    pub fn take_block(&mut self) -> Bytes {
        let block = self.buf.split().freeze();
        self.buf.reserve(self.capacity);
        self.buf.put_bytes(0, BLOCK_HEADER_SIZE);
        block
    }

    pub fn into_block(self) -> Bytes {
        self.buf.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_write_refuses_without_partial_write() {
        let mut w = CodecWriter::new(BLOCK_HEADER_SIZE + 2).unwrap();
        assert!(w.try_write_raw(&[1]));
        // zigzag(100) = 200 needs two bytes, only one left
        assert!(!w.try_write_signed(100));
        assert_eq!(w.count(), BLOCK_HEADER_SIZE + 1);
        assert!(w.try_write_signed(-5));
        assert_eq!(w.remaining(), 0);
        assert!(matches!(w.write_raw(&[0]), Err(SerializerError::BufferOverflow { needed: 1, .. })));
    }

    #[test]
    fn test_rewind_and_header_stamp() {
        let mut w = CodecWriter::new(64).unwrap();
        w.write_signed(-7).unwrap();
        let pos = w.count();
        w.write_signed(1_000_000).unwrap();
        w.set_count(pos).unwrap();
        w.finish_block(3, true).unwrap();

        let block = w.take_block();
        assert_eq!(&block[..4], &(3u32 | HAS_MORE_FLAG).to_le_bytes());
        assert_eq!(block.len(), BLOCK_HEADER_SIZE + 1);
        assert_eq!(w.count(), BLOCK_HEADER_SIZE);
    }

    #[test]
    fn test_rewind_outside_payload_is_rejected() {
        let mut w = CodecWriter::new(16).unwrap();
        w.write_signed(1).unwrap();
        assert!(matches!(w.set_count(0), Err(CodecError::ArgumentOutOfRange { name: "pos", .. })));
        assert!(matches!(w.set_count(64), Err(CodecError::ArgumentOutOfRange { .. })));
        assert_eq!(w.count(), BLOCK_HEADER_SIZE + 1);
    }

    #[test]
    fn test_tiny_capacity_rejected() {
        assert!(matches!(
            CodecWriter::new(BLOCK_HEADER_SIZE),
            Err(CodecError::ArgumentOutOfRange { name: "capacity", .. })
        ));
    }
}
