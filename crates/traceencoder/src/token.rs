//! Precomputed MessagePack prefixes for length-tagged values.
//!
//! Lengths below [`TABLE_SIZE`] are served from tables built once on first
//! use. Anything longer is synthesized on demand by [`synthesize`].

use once_cell::sync::Lazy;

/// Number of precomputed entries per kind.
pub const TABLE_SIZE: usize = 8 * 1024;

/// The prefix written before a length-tagged value. At most 5 bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Token {
    bytes: [u8; 5],
    len: u8,
}

impl Token {
    fn from_slice(src: &[u8]) -> Self {
        let mut bytes = [0; 5];
        bytes[..src.len()].copy_from_slice(src);
        Token {
            bytes,
            len: src.len() as u8,
        }
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }
}

impl AsRef<[u8]> for Token {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token({:02x?})", self.as_slice())
    }
}

/// The category of a length-tagged value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Str,
    Bin,
    Array,
    Map,
}

struct Table {
    str: Vec<Token>,
    array: Vec<Token>,
    map: Vec<Token>,
    uint: Vec<Token>,
}

static TABLE: Lazy<Table> = Lazy::new(|| Table {
    str: (0..TABLE_SIZE).map(|n| synthesize(Kind::Str, n)).collect(),
    array: (0..TABLE_SIZE).map(|n| synthesize(Kind::Array, n)).collect(),
    map: (0..TABLE_SIZE).map(|n| synthesize(Kind::Map, n)).collect(),
    uint: (0..0x80u8).map(|n| Token::from_slice(&[n])).collect(),
});

/// Prefix for a string of `len` UTF-8 bytes.
#[inline]
pub fn string(len: usize) -> Token {
    lookup(Kind::Str, len)
}

/// Prefix for an array of `len` elements.
#[inline]
pub fn array(len: usize) -> Token {
    lookup(Kind::Array, len)
}

/// Prefix for a map of `len` entries.
#[inline]
pub fn map(len: usize) -> Token {
    lookup(Kind::Map, len)
}

/// Prefix for a binary blob of `len` bytes. Blobs are rare enough that
/// they are never tabled.
#[inline]
pub fn bin(len: usize) -> Token {
    synthesize(Kind::Bin, len)
}

/// The complete encoding of a small non-negative integer.
///
/// Values below 128 are a single positive fixint byte; larger ones fall back
/// to `uint 8`.
#[inline]
pub fn uint(n: u8) -> Token {
    match TABLE.uint.get(n as usize) {
        Some(token) => *token,
        None => Token::from_slice(&[0xcc, n]),
    }
}

/// Fixed-width `array 32` header, used where the count is patched in later.
#[inline]
pub fn array32(count: u32) -> [u8; 5] {
    let n = count.to_be_bytes();
    [0xdd, n[0], n[1], n[2], n[3]]
}

/// Looks up the prefix for `(kind, len)`, synthesizing it when out of table range.
pub fn lookup(kind: Kind, len: usize) -> Token {
    let table = match kind {
        Kind::Str => &TABLE.str,
        Kind::Array => &TABLE.array,
        Kind::Map => &TABLE.map,
        Kind::Bin => return synthesize(kind, len),
    };
    match table.get(len) {
        Some(token) => *token,
        None => synthesize(kind, len),
    }
}

/// Builds the smallest valid prefix for `(kind, len)`.
///
/// Lengths beyond `u32::MAX` saturate; no payload can hold such a value and
/// the capacity check rejects it before anything is written.
pub fn synthesize(kind: Kind, len: usize) -> Token {
    let (fix, fix_limit, m8, m16, m32) = match kind {
        Kind::Str => (Some(0xa0u8), 0x20, Some(0xd9u8), 0xdau8, 0xdbu8),
        Kind::Bin => (None, 0, Some(0xc4), 0xc5, 0xc6),
        Kind::Array => (Some(0x90), 0x10, None, 0xdc, 0xdd),
        Kind::Map => (Some(0x80), 0x10, None, 0xde, 0xdf),
    };

    match (fix, m8) {
        (Some(fix), _) if len < fix_limit => Token::from_slice(&[fix | len as u8]),
        (_, Some(m8)) if len < 0x100 => Token::from_slice(&[m8, len as u8]),
        _ if len < 0x10000 => {
            let n = (len as u16).to_be_bytes();
            Token::from_slice(&[m16, n[0], n[1]])
        }
        _ => {
            let n = u32::try_from(len).unwrap_or(u32::MAX).to_be_bytes();
            Token::from_slice(&[m32, n[0], n[1], n[2], n[3]])
        }
    }
}
