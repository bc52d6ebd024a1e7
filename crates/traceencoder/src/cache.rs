//! Bounded LRU cache of encoded strings.

use std::sync::{Mutex, MutexGuard, PoisonError};

use bytes::{BufMut, Bytes, BytesMut};
use indexmap::IndexMap;

use crate::token;

/// Default number of cached strings.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Maps strings to their prefixed MessagePack encoding.
///
/// Entries are ordered from least to most recently used. The cache is meant
/// to outlive individual encoders and be shared between them behind an `Arc`;
/// the internal lock serializes lookups and evictions.
#[derive(Debug)]
pub struct StringCache {
    entries: Mutex<IndexMap<Box<str>, Bytes>>,
    capacity: usize,
}

impl StringCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: Mutex::new(IndexMap::with_capacity(capacity)),
            capacity,
        }
    }

    /// Returns the encoded form of `value`, inserting it on first sight.
    pub fn get(&self, value: &str) -> Bytes {
        let mut entries = self.lock();

        if let Some(index) = entries.get_index_of(value) {
            let last = entries.len() - 1;
            entries.move_index(index, last);
            if let Some((_, encoded)) = entries.get_index(last) {
                return encoded.clone();
            }
        }

        let encoded = encode(value);
        if entries.len() >= self.capacity {
            entries.shift_remove_index(0);
        }
        entries.insert(value.into(), encoded.clone());
        encoded
    }

    /// Reports whether `value` is cached, without touching its recency.
    pub fn contains(&self, value: &str) -> bool {
        self.lock().contains_key(value)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<Box<str>, Bytes>> {
        // Entries are immutable once inserted, so a panic elsewhere cannot
        // leave the map half-updated.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StringCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// Encodes `value` as a MessagePack string, prefix included.
pub fn encode(value: &str) -> Bytes {
    let prefix = token::string(value.len());
    let mut buf = BytesMut::with_capacity(prefix.len() + value.len());
    buf.put_slice(prefix.as_slice());
    buf.put_slice(value.as_bytes());
    buf.freeze()
}
