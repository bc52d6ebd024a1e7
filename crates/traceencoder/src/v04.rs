//! The v0.4 format: an array of traces, each an array of span maps keyed by
//! field name.

use std::collections::HashSet;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use indexmap::IndexMap;

use crate::cache::StringCache;
use crate::config::EncoderConfig;
use crate::events::{self, Attribute, SpanEvent, EVENTS_KEY};
use crate::state::{EncoderState, Framing, Transport, HEADER_SIZE};
use crate::types::{Format, Payload, Result, Span};
use crate::value::Value;
use crate::{token, TraceEncoder};

/// Fields every span map carries: trace_id, span_id, name, resource,
/// service, error, meta, start, duration.
const REQUIRED_FIELDS: usize = 9;

pub(crate) struct V04Framing;

impl Framing for V04Framing {
    const FORMAT: Format = Format::V04;

    fn reserved(&self) -> usize {
        0
    }

    fn seal(&self, mut body: BytesMut, traces: u32) -> Bytes {
        body[..HEADER_SIZE].copy_from_slice(&token::array32(traces));
        body.freeze()
    }
}

/// Encodes traces into v0.4 payloads.
pub struct V04Encoder<T> {
    state: EncoderState<V04Framing, T>,
    cache: Arc<StringCache>,
    native_span_events: bool,
}

impl<T: Transport> V04Encoder<T> {
    pub fn new(transport: T, cache: Arc<StringCache>, config: &EncoderConfig) -> Self {
        Self {
            state: EncoderState::new(V04Framing, transport, config.limit, config.debug_encoding),
            cache,
            native_span_events: config.native_span_events,
        }
    }

    pub fn transport(&self) -> &T {
        self.state.transport()
    }

    pub fn transport_mut(&mut self) -> &mut T {
        self.state.transport_mut()
    }
}

impl<T: Transport> TraceEncoder for V04Encoder<T> {
    fn format(&self) -> Format {
        Format::V04
    }

    fn encode_trace(&mut self, trace: &[Span]) -> Result<usize> {
        let mut writer = SpanWriter {
            cache: &self.cache,
            native_span_events: self.native_span_events,
            unsupported: HashSet::new(),
        };
        self.state.trace(|state| {
            state.write_array_prefix(trace.len())?;
            for span in trace {
                writer.span(state, span)?;
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

type State<T> = EncoderState<V04Framing, T>;

/// The number of entries in the span's map, given which optional fields it has.
pub(crate) fn field_count(span: &Span, native_span_events: bool) -> usize {
    REQUIRED_FIELDS
        + span.parent_id.is_some() as usize
        + span.span_type.is_some() as usize
        + span.metrics.is_some() as usize
        + span.meta_struct.is_some() as usize
        + (native_span_events && !span.span_events.is_empty()) as usize
}

/// Writes the spans of one trace.
struct SpanWriter<'a> {
    cache: &'a StringCache,
    native_span_events: bool,
    /// Attribute keys already reported as unsupported in this trace.
    unsupported: HashSet<String>,
}

impl SpanWriter<'_> {
    #[inline]
    fn str<T: Transport>(&self, state: &mut State<T>, value: &str) -> Result<()> {
        state.copy(&self.cache.get(value))?;
        Ok(())
    }

    fn span<T: Transport>(&mut self, state: &mut State<T>, span: &Span) -> Result<()> {
        let events_json = if span.span_events.is_empty() || self.native_span_events {
            None
        } else {
            Some(events::to_json(&span.span_events)?)
        };

        state.write_map_prefix(field_count(span, self.native_span_events))?;

        self.str(state, "trace_id")?;
        state.write_u64(span.wire_trace_id())?;
        self.str(state, "span_id")?;
        state.write_u64(span.span_id)?;
        if let Some(parent_id) = span.parent_id {
            self.str(state, "parent_id")?;
            state.write_u64(parent_id)?;
        }

        self.str(state, "name")?;
        self.str(state, &span.name)?;
        self.str(state, "resource")?;
        self.str(state, &span.resource)?;
        self.str(state, "service")?;
        self.str(state, &span.service)?;
        if let Some(span_type) = &span.span_type {
            self.str(state, "type")?;
            self.str(state, span_type)?;
        }

        self.str(state, "error")?;
        state.write_small_uint(span.error as u8)?;

        self.str(state, "meta")?;
        self.meta(state, &span.meta, events_json.as_deref())?;

        if let Some(metrics) = &span.metrics {
            self.str(state, "metrics")?;
            state.write_map(metrics, |state, key, value| {
                self.str(state, key)?;
                state.write_f64(*value)?;
                Ok(())
            })?;
        }

        self.str(state, "start")?;
        state.write_i64(span.start)?;
        self.str(state, "duration")?;
        state.write_i64(span.duration)?;

        if let Some(meta_struct) = &span.meta_struct {
            self.str(state, "meta_struct")?;
            self.meta_struct(state, meta_struct)?;
        }

        if self.native_span_events && !span.span_events.is_empty() {
            self.str(state, "span_events")?;
            self.span_events(state, &span.span_events)?;
        }

        Ok(())
    }

    /// Writes the tags, with the JSON form of the span events under
    /// `events` when there is one.
    fn meta<T: Transport>(
        &self,
        state: &mut State<T>,
        meta: &IndexMap<String, String>,
        events_json: Option<&str>,
    ) -> Result<()> {
        let Some(json) = events_json else {
            state.write_map(meta, |state, key, value| {
                self.str(state, key)?;
                self.str(state, value)
            })?;
            return Ok(());
        };

        let kept = meta.len() - meta.contains_key(EVENTS_KEY) as usize;
        state.write_map_prefix(kept + 1)?;
        for (key, value) in meta.iter().filter(|(key, _)| key.as_str() != EVENTS_KEY) {
            self.str(state, key)?;
            self.str(state, value)?;
        }
        self.str(state, EVENTS_KEY)?;
        // One-off value, kept out of the cache.
        state.write_str(json)?;
        Ok(())
    }

    /// Each structured tag becomes its own MessagePack document, shipped as
    /// `bin`. Nil tags are left out.
    fn meta_struct<T: Transport>(
        &self,
        state: &mut State<T>,
        meta_struct: &IndexMap<String, Value>,
    ) -> Result<()> {
        let entries = meta_struct.iter().filter(|(_, v)| !v.is_nil());
        state.write_map_prefix(entries.clone().count())?;
        for (key, value) in entries {
            self.str(state, key)?;
            state.write_bin(&value.to_vec())?;
        }
        Ok(())
    }

    fn span_events<T: Transport>(&mut self, state: &mut State<T>, span_events: &[SpanEvent]) -> Result<()> {
        state.write_array_prefix(span_events.len())?;
        for event in span_events {
            let unsupported = &mut self.unsupported;
            let attributes = events::typed_attributes(event, |key| {
                if unsupported.insert(key.to_string()) {
                    log::debug!(
                        "Encountered unsupported data type for span event v0.4 encoding, key: {key}"
                    );
                }
            });

            state.write_map_prefix(2 + !attributes.is_empty() as usize)?;
            self.str(state, "name")?;
            self.str(state, &event.name)?;
            self.str(state, "time_unix_nano")?;
            state.write_u64(event.time_unix_nano)?;

            if !attributes.is_empty() {
                self.str(state, "attributes")?;
                state.write_map_prefix(attributes.len())?;
                for (key, attribute) in &attributes {
                    self.str(state, key)?;
                    self.attribute(state, attribute)?;
                }
            }
        }
        Ok(())
    }

    /// `{type, <kind>_value}`, with arrays nesting their elements under
    /// `array_value.values`.
    fn attribute<T: Transport>(&self, state: &mut State<T>, attribute: &Attribute) -> Result<()> {
        state.write_map_prefix(2)?;
        self.str(state, "type")?;
        state.write_small_uint(attribute.type_code())?;
        self.str(state, attribute.value_key())?;

        match attribute {
            Attribute::Str(s) => self.str(state, s)?,
            Attribute::Bool(b) => {
                state.write_bool(*b)?;
            }
            Attribute::Int(n) => {
                state.write_i64(*n)?;
            }
            Attribute::UInt(n) => {
                state.write_u64(*n)?;
            }
            Attribute::Double(f) => {
                state.write_f64(*f)?;
            }
            Attribute::Array(values) => {
                state.write_map_prefix(1)?;
                self.str(state, "values")?;
                state.write_array_prefix(values.len())?;
                for value in values {
                    self.attribute(state, value)?;
                }
            }
        }
        Ok(())
    }
}
