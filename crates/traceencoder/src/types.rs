use bytes::Bytes;
use indexmap::IndexMap;

use crate::events::SpanEvent;
use crate::value::Value;

// === Error types ===

/// Errors that can occur while encoding or reading trace payloads.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A single trace does not fit in an otherwise empty payload.
    #[error("trace needs at least {size} bytes but a payload holds at most {limit}")]
    SizeExceeded { size: usize, limit: usize },

    /// A write landed outside the physical buffer despite the capacity check.
    #[error("write of {len} bytes at offset {offset} overruns buffer of {capacity} bytes")]
    BufferBoundsExceeded {
        offset: usize,
        len: usize,
        capacity: usize,
    },

    #[error("unexpected end of payload")]
    UnexpectedEof,

    #[error("unsupported marker byte: 0x{0:02x}")]
    InvalidMarker(u8),

    #[error("invalid utf-8 in string: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("failed to serialize span events: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

// === Spans ===

/// A single timed unit of work.
///
/// Missing string fields are left empty and encoded as empty strings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Span {
    /// Only the low 64 bits are put on the wire.
    pub trace_id: u128,
    pub span_id: u64,
    pub parent_id: Option<u64>,
    pub name: String,
    pub resource: String,
    pub service: String,
    pub span_type: Option<String>,
    pub error: bool,
    /// Start time in nanoseconds since the Unix epoch.
    pub start: i64,
    /// Duration in nanoseconds.
    pub duration: i64,
    pub meta: IndexMap<String, String>,
    pub metrics: Option<IndexMap<String, f64>>,
    /// Structured tags, only carried by the v0.4 format.
    pub meta_struct: Option<IndexMap<String, Value>>,
    /// Timestamped annotations. Empty means none.
    pub span_events: Vec<SpanEvent>,
}

impl Span {
    /// The trace id as it appears on the wire.
    #[inline]
    pub fn wire_trace_id(&self) -> u64 {
        self.trace_id as u64
    }
}

/// Spans sharing a trace id, in the order they should be encoded.
pub type Trace = Vec<Span>;

// === Payloads ===

/// The wire format of a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// One array of traces, each an array of self-describing span maps.
    V04,
    /// A string table followed by traces of positional span tuples.
    V05,
}

impl Format {
    /// The collector endpoint accepting this format.
    pub fn path(self) -> &'static str {
        match self {
            Format::V04 => "/v0.4/traces",
            Format::V05 => "/v0.5/traces",
        }
    }
}

/// A sealed, fully framed payload ready for transport.
#[derive(Debug, Clone)]
pub struct Payload {
    pub format: Format,
    pub trace_count: usize,
    pub data: Bytes,
}

impl Payload {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn has_traces(&self) -> bool {
        self.trace_count > 0
    }
}

/// Outcome of encoding a batch of traces.
#[derive(Debug, Default)]
pub struct Encoded {
    /// Bytes appended for the traces that were kept.
    pub bytes: usize,
    /// Batch position and cause of every trace that was dropped.
    pub dropped: Vec<(usize, Error)>,
}

impl Encoded {
    pub fn is_complete(&self) -> bool {
        self.dropped.is_empty()
    }
}

impl AsRef<[u8]> for Payload {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
