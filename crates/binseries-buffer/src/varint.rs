//! Variable-length integers.
//!
//! Deltas of sequential data are small, so every integer written into a
//! block uses LEB128: 7 data bits per byte, high bit set on all but the last
//! byte. Signed values are zigzag-mapped first (0 → 0, -1 → 1, 1 → 2, ...)
//! so small negative deltas stay short too.

use bytes::Buf;

use binseries_core::SerializerError;

/// Longest encoding of a 64-bit value.
pub const MAX_VARINT_LEN: usize = 10;

#[inline]
pub fn zigzag(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub fn unzigzag(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Encodes into `out`, returning the number of bytes used.
#[inline]
fn encode_unsigned(mut value: u64, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut len = 0;
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out[len] = byte;
        len += 1;
        if value == 0 {
            return len;
        }
    }
}

#[inline]
pub fn encode_signed(value: i64, out: &mut [u8; MAX_VARINT_LEN]) -> usize {
    encode_unsigned(zigzag(value), out)
}

fn decode_unsigned(buf: &mut impl Buf) -> Result<u64, SerializerError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        if !buf.has_remaining() {
            return Err(SerializerError::UnexpectedEof("varint"));
        }
        let byte = buf.get_u8();
        if shift == 63 && byte > 1 {
            return Err(SerializerError::InvalidHeader("varint overflows 64 bits".into()));
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(SerializerError::InvalidHeader("varint longer than 10 bytes".into()));
        }
    }
}

pub fn decode_signed(buf: &mut impl Buf) -> Result<i64, SerializerError> {
    decode_unsigned(buf).map(unzigzag)
}
