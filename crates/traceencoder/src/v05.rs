//! The v0.5 format: `[strings, traces]`, where every string in the traces is
//! an index into `strings` and every span is a fixed 12-element tuple:
//!
//! | Position | Field    | Encoding          |
//! |----------|----------|-------------------|
//! | 0        | service  | string index      |
//! | 1        | name     | string index      |
//! | 2        | resource | string index      |
//! | 3        | trace_id | uint 64           |
//! | 4        | span_id  | uint 64           |
//! | 5        | parent_id| uint 64, 0 = none |
//! | 6        | start    | int 64            |
//! | 7        | duration | int 64            |
//! | 8        | error    | uint 32           |
//! | 9        | meta     | map index → index |
//! | 10       | metrics  | map index → float |
//! | 11       | type     | string index      |
//!
//! String indices are always written as `uint 32` so they can be patched in
//! place when a partially written trace moves to a new payload.

use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use indexmap::IndexMap;

use crate::cache::{self, StringCache};
use crate::config::EncoderConfig;
use crate::events::{self, EVENTS_KEY};
use crate::state::{EncoderState, Framing, Transport, HEADER_SIZE};
use crate::types::{Format, Payload, Result, Span};
use crate::{raw, token, TraceEncoder};

const SPAN_FIELDS: usize = 12;

/// Size of a string index on the wire: `0xce` + u32.
const INDEX_SIZE: usize = 5;

/// The `[strings, traces]` wrapper plus the `array 32` string count.
const TABLE_OVERHEAD: usize = 1 + 5;

/// Unique strings of one payload, in first-seen order.
#[derive(Debug, Default)]
pub struct StringTable {
    entries: IndexMap<Box<str>, Bytes>,
    /// Sum of the encoded entries.
    encoded_len: usize,
}

impl StringTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: u32) -> Option<&str> {
        self.entries.get_index(index as usize).map(|(k, _)| &**k)
    }

    /// Bytes the table would grow by if `value` were interned.
    pub fn cost(&self, value: &str) -> usize {
        if self.entries.contains_key(value) {
            0
        } else {
            token::string(value.len()).len() + value.len()
        }
    }

    /// Returns the index of `value`, adding it if it is new.
    pub fn intern(&mut self, value: &str, cache: &StringCache) -> u32 {
        self.intern_with(value, |v| cache.get(v))
    }

    fn intern_with<E>(&mut self, value: &str, encode: E) -> u32
    where
        E: FnOnce(&str) -> Bytes,
    {
        match self.entries.get_index_of(value) {
            Some(index) => index as u32,
            None => self.push(value.into(), encode(value)),
        }
    }

    fn push(&mut self, value: Box<str>, encoded: Bytes) -> u32 {
        self.encoded_len += encoded.len();
        let (index, _) = self.entries.insert_full(value, encoded);
        index as u32
    }

    fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
        self.encoded_len = self.entries.values().map(Bytes::len).sum();
    }

    /// Writes the header and the first `len` entries.
    fn write_to(&self, out: &mut BytesMut, len: usize) {
        out.put_slice(&token::array32(len as u32));
        for (_, encoded) in self.entries.iter().take(len) {
            out.put_slice(encoded);
        }
    }

    fn encoded_len_of(&self, len: usize) -> usize {
        self.entries.values().take(len).map(Bytes::len).sum()
    }
}

/// A string index written into the buffer for the trace in progress.
#[derive(Debug, Clone, Copy)]
struct StringRef {
    /// Buffer position of the u32.
    pos: usize,
    index: u32,
}

#[derive(Debug, Default)]
pub(crate) struct V05Framing {
    table: StringTable,
    /// Table length when the trace in progress started.
    mark: usize,
    refs: Vec<StringRef>,
}

impl V05Framing {
    fn record(&mut self, pos: usize, index: u32) {
        self.refs.push(StringRef { pos, index });
    }
}

impl Framing for V05Framing {
    const FORMAT: Format = Format::V05;

    fn reserved(&self) -> usize {
        TABLE_OVERHEAD + self.table.encoded_len
    }

    fn begin_trace(&mut self) {
        self.mark = self.table.len();
        self.refs.clear();
    }

    fn end_trace(&mut self) {
        self.mark = self.table.len();
        self.refs.clear();
    }

    fn rollback(&mut self) {
        self.table.truncate(self.mark);
        self.refs.clear();
    }

    /// Only strings interned before the trace in progress belong to the
    /// sealed traces.
    fn seal(&self, body: BytesMut, traces: u32) -> Bytes {
        let strings = self.mark;
        let mut out = BytesMut::with_capacity(
            TABLE_OVERHEAD + self.table.encoded_len_of(strings) + body.len(),
        );
        out.put_u8(0x92);
        self.table.write_to(&mut out, strings);
        out.put_slice(&token::array32(traces));
        out.put_slice(&body[HEADER_SIZE..]);
        out.freeze()
    }

    /// The carried trace keeps its bytes but its string indices pointed into
    /// the old table. Rebuild a table holding only its strings and patch every
    /// index.
    fn rebase(&mut self, carried: &mut [u8], origin: usize) {
        let old = std::mem::take(&mut self.table);
        for r in self.refs.iter_mut() {
            let Some((value, encoded)) = old.entries.get_index(r.index as usize) else {
                continue;
            };
            let index = match self.table.entries.get_index_of(&**value) {
                Some(index) => index as u32,
                None => self.table.push(value.clone(), encoded.clone()),
            };
            let at = r.pos - origin;
            raw::u32(carried, at, index);
            r.pos = HEADER_SIZE + at;
            r.index = index;
        }
        self.mark = 0;
    }

    fn reset(&mut self) {
        self.table = StringTable::default();
        self.mark = 0;
        self.refs.clear();
    }
}

/// Encodes traces into v0.5 payloads.
pub struct V05Encoder<T> {
    state: EncoderState<V05Framing, T>,
    cache: Arc<StringCache>,
}

impl<T: Transport> V05Encoder<T> {
    pub fn new(transport: T, cache: Arc<StringCache>, config: &EncoderConfig) -> Self {
        Self {
            state: EncoderState::new(
                V05Framing::default(),
                transport,
                config.limit,
                config.debug_encoding,
            ),
            cache,
        }
    }

    /// The strings collected for the payload being built.
    pub fn strings(&self) -> &StringTable {
        &self.state.framing.table
    }

    pub fn transport(&self) -> &T {
        self.state.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.state.transport_mut()
    }
}

impl<T: Transport> TraceEncoder for V05Encoder<T> {
    fn format(&self) -> Format {
        Format::V05
    }

    fn encode_trace(&mut self, trace: &[Span]) -> Result<usize> {
        let cache = &self.cache;
        self.state.trace(|state| {
            state.write_array_prefix(trace.len())?;
            for span in trace {
                write_span(state, cache, span)?;
            }
            Ok(())
        })
    }

    fn count(&self) -> usize {
        self.state.count()
    }

    fn make_payload(&mut self) -> Payload {
        self.state.make_payload()
    }

    fn flush(&mut self) -> bool {
        self.state.flush()
    }
}

type State<T> = EncoderState<V05Framing, T>;

fn write_span<T: Transport>(state: &mut State<T>, cache: &StringCache, span: &Span) -> Result<()> {
    state.write_array_prefix(SPAN_FIELDS)?;
    write_ref(state, cache, &span.service)?;
    write_ref(state, cache, &span.name)?;
    write_ref(state, cache, &span.resource)?;
    state.write_u64(span.wire_trace_id())?;
    state.write_u64(span.span_id)?;
    state.write_u64(span.parent_id.unwrap_or(0))?;
    state.write_i64(span.start)?;
    state.write_i64(span.duration)?;
    state.write_u32(span.error as u32)?;

    if span.span_events.is_empty() {
        state.write_map(&span.meta, |state, key, value| {
            write_ref(state, cache, key)?;
            write_ref(state, cache, value)
        })?;
    } else {
        // No slot for span events; they travel as JSON in the tags.
        let json = events::to_json(&span.span_events)?;
        let kept = span.meta.len() - span.meta.contains_key(EVENTS_KEY) as usize;
        state.write_map_prefix(kept + 1)?;
        for (key, value) in span.meta.iter().filter(|(key, _)| key.as_str() != EVENTS_KEY) {
            write_ref(state, cache, key)?;
            write_ref(state, cache, value)?;
        }
        write_ref(state, cache, EVENTS_KEY)?;
        write_ref_with(state, &json, cache::encode)?;
    }

    match &span.metrics {
        Some(metrics) => {
            state.write_map(metrics, |state, key, value| {
                write_ref(state, cache, key)?;
                state.write_f64(*value)?;
                Ok(())
            })?;
        }
        None => {
            state.write_map_prefix(0)?;
        }
    }

    write_ref(state, cache, span.span_type.as_deref().unwrap_or(""))
}

/// Writes the table index of `value`, interning it first.
fn write_ref<T: Transport>(state: &mut State<T>, cache: &StringCache, value: &str) -> Result<()> {
    write_ref_with(state, value, |v| cache.get(v))
}

fn write_ref_with<T, E>(state: &mut State<T>, value: &str, encode: E) -> Result<()>
where
    T: Transport,
    E: FnOnce(&str) -> Bytes,
{
    // Make room for the index and for the table growth together. Moving the
    // trace to a new payload rebuilds the table, which can change the cost.
    loop {
        let cost = state.framing.table.cost(value);
        state.check_offset(INDEX_SIZE + cost)?;
        if state.framing.table.cost(value) == cost {
            break;
        }
    }

    let index = state.framing.table.intern_with(value, encode);
    let pos = state.offset() + 1;
    let dst = state.reserve(INDEX_SIZE)?;
    raw::u8(dst, 0, 0xce);
    raw::u32(dst, 1, index);
    state.framing.record(pos, index);
    Ok(())
}
