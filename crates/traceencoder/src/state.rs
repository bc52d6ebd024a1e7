//! The capacity-bounded payload buffer and its overflow handling.
//!
//! Span data is written into a buffer whose first [`HEADER_SIZE`] bytes are
//! left free for the trace count. When a write would push the payload past
//! its limit, every trace completed so far is sealed and handed to the
//! [`Transport`], and the bytes of the trace still being written move to the
//! start of a fresh buffer. A trace is therefore never split between two
//! payloads. A trace too large for an empty payload fails with
//! [`Error::SizeExceeded`].

use bytes::{Bytes, BytesMut};
use indexmap::IndexMap;

use crate::token;
use crate::types::{Error, Format, Payload, Result};

/// Bytes reserved at the start of every buffer for the `array 32` trace header.
pub const HEADER_SIZE: usize = 5;

/// The transport side of an encoder: ships sealed payloads and hands out
/// buffers for the next one.
pub trait Transport {
    /// Ships a sealed payload.
    ///
    /// Called synchronously from inside `encode` whenever the buffer fills
    /// up, and from `flush`.
    fn flush(&mut self, payload: Payload);

    /// Returns a buffer for the next payload. It is resized to the payload
    /// limit before use, so an empty buffer is fine.
    fn fresh_buffer(&mut self, limit: usize) -> BytesMut {
        BytesMut::zeroed(limit)
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn flush(&mut self, payload: Payload) {
        (**self).flush(payload)
    }

    fn fresh_buffer(&mut self, limit: usize) -> BytesMut {
        (**self).fresh_buffer(limit)
    }
}

/// How a format frames the span data region into a payload.
pub(crate) trait Framing {
    const FORMAT: Format;

    /// Bytes this framing adds to the payload beyond the span data region.
    fn reserved(&self) -> usize;

    fn begin_trace(&mut self) {}

    fn end_trace(&mut self) {}

    /// Forgets anything recorded for the trace in progress.
    fn rollback(&mut self) {}

    /// Builds the payload from `body`, which holds the header slot followed
    /// by the data of `traces` complete traces.
    fn seal(&self, body: BytesMut, traces: u32) -> Bytes;

    /// Fixes up the in-progress trace after it moved to a fresh buffer.
    /// `carried` is its data, which started at `origin` in the old buffer.
    fn rebase(&mut self, _carried: &mut [u8], _origin: usize) {}

    /// Clears per-payload state after a seal at a trace boundary.
    fn reset(&mut self) {}
}

/// Write cursor and overflow controller for one encoder.
pub(crate) struct EncoderState<F, T> {
    buf: BytesMut,
    offset: usize,
    /// Where the trace being written started.
    trace_start: usize,
    traces: usize,
    limit: usize,
    debug_encoding: bool,
    pub(crate) framing: F,
    transport: T,
}

impl<F: Framing, T: Transport> EncoderState<F, T> {
    pub fn new(framing: F, mut transport: T, limit: usize, debug_encoding: bool) -> Self {
        let buf = fresh(&mut transport, limit);
        Self {
            buf,
            offset: HEADER_SIZE,
            trace_start: HEADER_SIZE,
            traces: 0,
            limit,
            debug_encoding,
            framing,
            transport,
        }
    }

    /// Number of complete traces in the buffer.
    pub fn count(&self) -> usize {
        self.traces
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Runs `write` as one trace. On failure the partial trace is discarded
    /// and the buffer is left as it was before. Returns the encoded size.
    pub fn trace<W>(&mut self, write: W) -> Result<usize>
    where
        W: FnOnce(&mut Self) -> Result<()>,
    {
        self.trace_start = self.offset;
        self.framing.begin_trace();

        if let Err(err) = write(self) {
            self.offset = self.trace_start;
            self.framing.rollback();
            return Err(err);
        }

        let encoded = &self.buf[self.trace_start..self.offset];
        if self.debug_encoding {
            log::debug!("Adding encoded trace to buffer: {}", hex_dump(encoded));
        }

        let size = encoded.len();
        self.traces += 1;
        self.trace_start = self.offset;
        self.framing.end_trace();
        Ok(size)
    }

    /// Makes sure `len` more bytes fit in the current payload, flushing
    /// complete traces if they do not. Returns the offset to write at.
    pub fn check_offset(&mut self, len: usize) -> Result<usize> {
        let needed = self.offset + len + self.framing.reserved();
        if needed <= self.limit {
            return Ok(self.offset);
        }

        if self.trace_start == HEADER_SIZE {
            // Nothing complete to flush: this trace alone is too big.
            return Err(Error::SizeExceeded {
                size: needed,
                limit: self.limit,
            });
        }

        self.flush_and_rebase();
        self.check_offset(len)
    }

    /// Claims `len` bytes at the cursor and returns them for writing.
    pub fn reserve(&mut self, len: usize) -> Result<&mut [u8]> {
        let at = self.check_offset(len)?;
        let end = at + len;
        if end > self.buf.len() {
            return Err(Error::BufferBoundsExceeded {
                offset: at,
                len,
                capacity: self.buf.len(),
            });
        }
        self.offset = end;
        Ok(&mut self.buf[at..end])
    }

    /// Appends `bytes` and returns the new offset.
    pub fn copy(&mut self, bytes: &[u8]) -> Result<usize> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(self.offset)
    }

    pub fn write_array_prefix(&mut self, len: usize) -> Result<usize> {
        self.copy(token::array(len).as_slice())
    }

    pub fn write_map_prefix(&mut self, len: usize) -> Result<usize> {
        self.copy(token::map(len).as_slice())
    }

    /// Writes `map` in insertion order, delegating each entry to `entry`.
    pub fn write_map<V, E>(&mut self, map: &IndexMap<String, V>, mut entry: E) -> Result<usize>
    where
        E: FnMut(&mut Self, &str, &V) -> Result<()>,
    {
        self.write_map_prefix(map.len())?;
        for (key, value) in map {
            entry(self, key, value)?;
        }
        Ok(self.offset)
    }

    /// Writes a non-negative integer below 128 as a single byte.
    pub fn write_small_uint(&mut self, n: u8) -> Result<usize> {
        self.copy(token::uint(n).as_slice())
    }

    pub fn write_u32(&mut self, n: u32) -> Result<usize> {
        let dst = self.reserve(5)?;
        crate::raw::u8(dst, 0, 0xce);
        crate::raw::u32(dst, 1, n);
        Ok(self.offset)
    }

    pub fn write_u64(&mut self, n: u64) -> Result<usize> {
        let dst = self.reserve(9)?;
        crate::raw::u8(dst, 0, 0xcf);
        crate::raw::u64(dst, 1, n);
        Ok(self.offset)
    }

    pub fn write_i64(&mut self, n: i64) -> Result<usize> {
        let dst = self.reserve(9)?;
        crate::raw::u8(dst, 0, 0xd3);
        crate::raw::i64(dst, 1, n);
        Ok(self.offset)
    }

    pub fn write_f64(&mut self, f: f64) -> Result<usize> {
        let dst = self.reserve(9)?;
        crate::raw::u8(dst, 0, 0xcb);
        crate::raw::f64(dst, 1, f);
        Ok(self.offset)
    }

    pub fn write_bool(&mut self, b: bool) -> Result<usize> {
        self.copy(&[if b { 0xc3 } else { 0xc2 }])
    }

    /// Writes a string directly, bypassing any cache.
    pub fn write_str(&mut self, value: &str) -> Result<usize> {
        self.copy(token::string(value.len()).as_slice())?;
        self.copy(value.as_bytes())
    }

    pub fn write_bin(&mut self, data: &[u8]) -> Result<usize> {
        self.copy(token::bin(data.len()).as_slice())?;
        self.copy(data)
    }

    /// Seals every complete trace into a payload and starts over.
    pub fn make_payload(&mut self) -> Payload {
        let next = fresh(&mut self.transport, self.limit);
        let mut body = std::mem::replace(&mut self.buf, next);
        body.truncate(self.trace_start);

        let payload = self.seal(body);
        self.framing.reset();
        self.offset = HEADER_SIZE;
        self.trace_start = HEADER_SIZE;
        self.traces = 0;
        payload
    }

    /// Hands the buffered traces to the transport. Returns false if there
    /// was nothing to send.
    pub fn flush(&mut self) -> bool {
        if self.traces == 0 {
            return false;
        }
        let payload = self.make_payload();
        log::trace!(
            "flushing {} traces ({} bytes)",
            payload.trace_count,
            payload.len()
        );
        self.transport.flush(payload);
        true
    }

    fn flush_and_rebase(&mut self) {
        let carried = self.offset - self.trace_start;
        let mut next = fresh(&mut self.transport, self.limit);
        next[HEADER_SIZE..HEADER_SIZE + carried]
            .copy_from_slice(&self.buf[self.trace_start..self.offset]);

        let mut body = std::mem::replace(&mut self.buf, next);
        body.truncate(self.trace_start);
        let payload = self.seal(body);

        let origin = self.trace_start;
        self.framing
            .rebase(&mut self.buf[HEADER_SIZE..HEADER_SIZE + carried], origin);
        self.offset = HEADER_SIZE + carried;
        self.trace_start = HEADER_SIZE;
        self.traces = 0;

        log::trace!(
            "payload full, flushing {} traces ({} bytes) and carrying {} bytes over",
            payload.trace_count,
            payload.len(),
            carried
        );
        self.transport.flush(payload);
    }

    fn seal(&self, body: BytesMut) -> Payload {
        Payload {
            format: F::FORMAT,
            trace_count: self.traces,
            data: self.framing.seal(body, self.traces as u32),
        }
    }
}

fn fresh<T: Transport>(transport: &mut T, limit: usize) -> BytesMut {
    let mut buf = transport.fresh_buffer(limit);
    buf.resize(limit.max(HEADER_SIZE), 0);
    buf
}

/// Lowercase hex bytes separated by single spaces.
pub(crate) fn hex_dump(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
