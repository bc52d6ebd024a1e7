//! A generic MessagePack value and its writer.
//!
//! Span tags are written through the specialized paths in `v04`/`v05`.
//! This type covers the rest: structured `meta_struct` tags on the way out
//! and whole payloads on the way back in (see `reader`).

use bytes::{BufMut, BytesMut};

use crate::token;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Bool(bool),
    /// A negative integer. Non-negative integers are always `UInt`.
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<Value>),
    /// Entries in wire order.
    Map(Vec<(Value, Value)>),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Value::UInt(n) => Some(n),
            Value::Int(n) => u64::try_from(n).ok(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Int(n) => Some(n),
            Value::UInt(n) => i64::try_from(n).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Value::Float(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_bin(&self) -> Option<&[u8]> {
        match self {
            Value::Bin(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up a string key in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    /// Appends the MessagePack encoding of this value to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Value::Nil => buf.put_u8(0xc0),
            Value::Bool(b) => buf.put_u8(if *b { 0xc3 } else { 0xc2 }),
            Value::Int(n) if *n >= 0 => write_uint(buf, *n as u64),
            Value::Int(n) => write_negative(buf, *n),
            Value::UInt(n) => write_uint(buf, *n),
            Value::Float(f) => {
                buf.put_u8(0xcb);
                buf.put_f64(*f);
            }
            Value::Str(s) => {
                buf.put_slice(token::string(s.len()).as_slice());
                buf.put_slice(s.as_bytes());
            }
            Value::Bin(b) => {
                buf.put_slice(token::bin(b.len()).as_slice());
                buf.put_slice(b);
            }
            Value::Array(items) => {
                buf.put_slice(token::array(items.len()).as_slice());
                for item in items {
                    item.write_to(buf);
                }
            }
            Value::Map(entries) => {
                buf.put_slice(token::map(entries.len()).as_slice());
                for (k, v) in entries {
                    k.write_to(buf);
                    v.write_to(buf);
                }
            }
        }
    }

    /// Encodes this value as a standalone MessagePack document.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut buf = BytesMut::new();
        self.write_to(&mut buf);
        buf.to_vec()
    }
}

fn write_uint(buf: &mut BytesMut, n: u64) {
    if n < 0x80 {
        buf.put_u8(n as u8);
    } else if n <= 0xff {
        buf.put_u8(0xcc);
        buf.put_u8(n as u8);
    } else if n <= 0xffff {
        buf.put_u8(0xcd);
        buf.put_u16(n as u16);
    } else if n <= 0xffff_ffff {
        buf.put_u8(0xce);
        buf.put_u32(n as u32);
    } else {
        buf.put_u8(0xcf);
        buf.put_u64(n);
    }
}

fn write_negative(buf: &mut BytesMut, n: i64) {
    if n >= -0x20 {
        buf.put_i8(n as i8);
    } else if n >= i8::MIN as i64 {
        buf.put_u8(0xd0);
        buf.put_i8(n as i8);
    } else if n >= i16::MIN as i64 {
        buf.put_u8(0xd1);
        buf.put_i16(n as i16);
    } else if n >= i32::MIN as i64 {
        buf.put_u8(0xd2);
        buf.put_i32(n as i32);
    } else {
        buf.put_u8(0xd3);
        buf.put_i64(n);
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        if n >= 0 {
            Value::UInt(n as u64)
        } else {
            Value::Int(n)
        }
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::UInt(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}
