//! Reads MessagePack payloads back into [`Value`] trees.

use byteorder::{BigEndian, ByteOrder};

use crate::types::{Error, Result};
use crate::value::Value;

/// Decodes a single value from the start of `data`.
///
/// Trailing bytes are ignored; use [`Reader`] to read several values.
pub fn decode(data: &[u8]) -> Result<Value> {
    Reader::new(data).value()
}

/// A cursor-based reader over a byte slice.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn bytes_read(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Read n bytes as a slice from the data.
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(Error::UnexpectedEof)?;
        let bytes = self.data.get(self.pos..end).ok_or(Error::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn len8(&mut self) -> Result<usize> {
        Ok(self.byte()? as usize)
    }

    fn len16(&mut self) -> Result<usize> {
        Ok(BigEndian::read_u16(self.take(2)?) as usize)
    }

    fn len32(&mut self) -> Result<usize> {
        Ok(BigEndian::read_u32(self.take(4)?) as usize)
    }

    /// Read the next complete value.
    pub fn value(&mut self) -> Result<Value> {
        let marker = self.byte()?;
        let value = match marker {
            0x00..=0x7f => Value::UInt(marker as u64),
            0x80..=0x8f => self.map((marker & 0x0f) as usize)?,
            0x90..=0x9f => self.array((marker & 0x0f) as usize)?,
            0xa0..=0xbf => self.str((marker & 0x1f) as usize)?,
            0xc0 => Value::Nil,
            0xc2 => Value::Bool(false),
            0xc3 => Value::Bool(true),
            0xc4 => {
                let n = self.len8()?;
                Value::Bin(self.take(n)?.to_vec())
            }
            0xc5 => {
                let n = self.len16()?;
                Value::Bin(self.take(n)?.to_vec())
            }
            0xc6 => {
                let n = self.len32()?;
                Value::Bin(self.take(n)?.to_vec())
            }
            0xca => Value::Float(BigEndian::read_f32(self.take(4)?) as f64),
            0xcb => Value::Float(BigEndian::read_f64(self.take(8)?)),
            0xcc => Value::UInt(self.byte()? as u64),
            0xcd => Value::UInt(BigEndian::read_u16(self.take(2)?) as u64),
            0xce => Value::UInt(BigEndian::read_u32(self.take(4)?) as u64),
            0xcf => Value::UInt(BigEndian::read_u64(self.take(8)?)),
            0xd0 => Value::from(self.byte()? as i8 as i64),
            0xd1 => Value::from(BigEndian::read_i16(self.take(2)?) as i64),
            0xd2 => Value::from(BigEndian::read_i32(self.take(4)?) as i64),
            0xd3 => Value::from(BigEndian::read_i64(self.take(8)?)),
            0xd9 => {
                let n = self.len8()?;
                self.str(n)?
            }
            0xda => {
                let n = self.len16()?;
                self.str(n)?
            }
            0xdb => {
                let n = self.len32()?;
                self.str(n)?
            }
            0xdc => {
                let n = self.len16()?;
                self.array(n)?
            }
            0xdd => {
                let n = self.len32()?;
                self.array(n)?
            }
            0xde => {
                let n = self.len16()?;
                self.map(n)?
            }
            0xdf => {
                let n = self.len32()?;
                self.map(n)?
            }
            0xe0..=0xff => Value::Int(marker as i8 as i64),
            other => return Err(Error::InvalidMarker(other)),
        };
        Ok(value)
    }

    fn str(&mut self, n: usize) -> Result<Value> {
        let bytes = self.take(n)?;
        Ok(Value::Str(std::str::from_utf8(bytes)?.to_string()))
    }

    fn array(&mut self, n: usize) -> Result<Value> {
        // The count comes off the wire; cap the preallocation by what is left.
        let mut items = Vec::with_capacity(n.min(self.data.len() - self.pos));
        for _ in 0..n {
            items.push(self.value()?);
        }
        Ok(Value::Array(items))
    }

    fn map(&mut self, n: usize) -> Result<Value> {
        let mut entries = Vec::with_capacity(n.min(self.data.len() - self.pos));
        for _ in 0..n {
            let k = self.value()?;
            let v = self.value()?;
            entries.push((k, v));
        }
        Ok(Value::Map(entries))
    }
}
