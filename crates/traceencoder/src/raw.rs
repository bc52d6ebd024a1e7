//! Fixed-width big-endian writers operating directly on a byte slice.
//!
//! Every function writes at `offset` and returns the number of bytes
//! written. Callers reserve room first; nothing here checks capacity.

use byteorder::{BigEndian, ByteOrder};

#[inline]
pub fn u8(buf: &mut [u8], offset: usize, v: u8) -> usize {
    buf[offset] = v;
    1
}

#[inline]
pub fn u16(buf: &mut [u8], offset: usize, v: u16) -> usize {
    BigEndian::write_u16(&mut buf[offset..], v);
    2
}

#[inline]
pub fn u32(buf: &mut [u8], offset: usize, v: u32) -> usize {
    BigEndian::write_u32(&mut buf[offset..], v);
    4
}

#[inline]
pub fn u64(buf: &mut [u8], offset: usize, v: u64) -> usize {
    BigEndian::write_u64(&mut buf[offset..], v);
    8
}

#[inline]
pub fn i64(buf: &mut [u8], offset: usize, v: i64) -> usize {
    BigEndian::write_i64(&mut buf[offset..], v);
    8
}

#[inline]
pub fn f64(buf: &mut [u8], offset: usize, v: f64) -> usize {
    BigEndian::write_f64(&mut buf[offset..], v);
    8
}

/// Writes the UTF-8 bytes of `text` without any length prefix.
#[inline]
pub fn str(buf: &mut [u8], offset: usize, text: &str) -> usize {
    bytes(buf, offset, text.as_bytes())
}

#[inline]
pub fn bytes(buf: &mut [u8], offset: usize, src: &[u8]) -> usize {
    buf[offset..offset + src.len()].copy_from_slice(src);
    src.len()
}
