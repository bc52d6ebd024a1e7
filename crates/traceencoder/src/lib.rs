//! Trace payload encoder for the Datadog agent's MessagePack trace intake.
//!
//! Finished traces are encoded into a fixed-capacity buffer as they arrive.
//! When the next write would overflow the payload limit, the traces completed
//! so far are sealed and handed to a [`Transport`], and the partially written
//! trace moves to a new payload. No trace is ever split across payloads.
//!
//! # Formats
//!
//! Two formats are supported, selected by the encoder type.
//!
//! [`V04Encoder`] writes `/v0.4/traces`: an `array 32` of traces, each an
//! array of span maps keyed by field name.
//!
//! | Key           | Encoding                    | Present              |
//! |---------------|-----------------------------|----------------------|
//! | `trace_id`    | uint 64 (low 64 bits)       | always               |
//! | `span_id`     | uint 64                     | always               |
//! | `parent_id`   | uint 64                     | if set               |
//! | `name`        | str                         | always               |
//! | `resource`    | str                         | always               |
//! | `service`     | str                         | always               |
//! | `type`        | str                         | if set               |
//! | `error`       | positive fixint 0 or 1      | always               |
//! | `meta`        | map str → str               | always               |
//! | `metrics`     | map str → float 64          | if set               |
//! | `start`       | int 64                      | always               |
//! | `duration`    | int 64                      | always               |
//! | `meta_struct` | map str → bin (MessagePack) | if set               |
//! | `span_events` | array of event maps         | if native and any    |
//!
//! Span events go under the `events` meta tag as JSON unless
//! [`EncoderConfig::native_span_events`] is set. See [`events`].
//!
//! [`V05Encoder`] writes `/v0.5/traces`: `[strings, traces]`, where every
//! string is an index into a per-payload string table and every span is a
//! 12-element tuple. See the `v05` module for the field order.
//!
//! # Usage
//!
//! ```no_run
//! use ddtrace_traceencoder::{EncoderConfig, Payload, TraceEncoder, Transport, V05Encoder};
//!
//! struct Agent;
//!
//! impl Transport for Agent {
//!     fn flush(&mut self, payload: Payload) {
//!         println!("PUT {} ({} bytes)", payload.format.path(), payload.len());
//!     }
//! }
//!
//! let config = EncoderConfig::from_env();
//! let mut encoder = V05Encoder::new(Agent, config.string_cache(), &config);
//! # let traces: Vec<ddtrace_traceencoder::Trace> = vec![];
//! let encoded = encoder.encode(&traces);
//! for (index, err) in &encoded.dropped {
//!     eprintln!("trace {index} dropped: {err}");
//! }
//! encoder.flush();
//! ```

pub mod cache;
pub mod config;
pub mod events;
pub mod raw;
pub mod reader;
mod state;
pub mod token;
pub mod types;
mod v04;
mod v05;
pub mod value;

#[cfg(test)]
mod testutil;

pub use cache::StringCache;
pub use config::EncoderConfig;
pub use events::SpanEvent;
pub use reader::{decode, Reader};
pub use state::{Transport, HEADER_SIZE};
pub use types::{Encoded, Error, Format, Payload, Result, Span, Trace};
pub use v04::V04Encoder;
pub use v05::{StringTable, V05Encoder};
pub use value::Value;

/// Common interface of the two payload encoders.
pub trait TraceEncoder {
    fn format(&self) -> Format;

    /// Appends one trace and returns its encoded size.
    ///
    /// May flush complete traces to the transport first. A trace that does
    /// not fit in an empty payload fails with [`Error::SizeExceeded`] and
    /// leaves nothing of itself behind.
    fn encode_trace(&mut self, trace: &[Span]) -> Result<usize>;

    /// Appends each trace in order. A trace that fails is dropped and
    /// reported in [`Encoded::dropped`]; the rest of the batch is still
    /// encoded.
    fn encode(&mut self, traces: &[Trace]) -> Encoded {
        let mut encoded = Encoded::default();
        for (index, trace) in traces.iter().enumerate() {
            match self.encode_trace(trace) {
                Ok(size) => encoded.bytes += size,
                Err(err) => {
                    log::warn!("dropping trace of {} spans: {}", trace.len(), err);
                    encoded.dropped.push((index, err));
                }
            }
        }
        encoded
    }

    /// Number of complete traces waiting in the current payload.
    fn count(&self) -> usize;

    /// Seals the buffered traces into a payload and starts a new one,
    /// without calling the transport.
    fn make_payload(&mut self) -> Payload;

    /// Sends the buffered traces to the transport. Returns false if there
    /// was nothing to send.
    fn flush(&mut self) -> bool;
}
