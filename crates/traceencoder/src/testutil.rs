//! Helpers shared by the encoder tests: a recording transport, a sample span,
//! decoders turning payloads back into spans, proptest strategies and log
//! capture.

use std::cell::RefCell;
use std::sync::Once;

use indexmap::IndexMap;
use proptest::prelude::*;

use crate::reader::decode;
use crate::state::Transport;
use crate::types::{Payload, Span, Trace};
use crate::value::Value;

/// Keeps every payload it is asked to ship.
#[derive(Debug, Default)]
pub struct Recorder {
    pub payloads: Vec<Payload>,
}

impl Transport for Recorder {
    fn flush(&mut self, payload: Payload) {
        self.payloads.push(payload);
    }
}

pub fn span(trace_id: u128) -> Span {
    let mut meta = IndexMap::new();
    meta.insert("bar".to_string(), "baz".to_string());
    let mut metrics = IndexMap::new();
    metrics.insert("example".to_string(), 1.0);

    Span {
        trace_id,
        span_id: 0x1234abcd1234abcd,
        parent_id: Some(0x1234abcd1234abcd),
        name: "test".into(),
        resource: "test-r".into(),
        service: "test-s".into(),
        span_type: Some("foo".into()),
        error: false,
        start: 123,
        duration: 456,
        meta,
        metrics: Some(metrics),
        meta_struct: None,
        span_events: Vec::new(),
    }
}

fn str_of(v: &Value) -> String {
    v.as_str().expect("string").to_string()
}

fn traces_of(v: &Value) -> &[Value] {
    v.as_array().expect("trace array")
}

/// Decodes a v0.4 payload into spans.
pub fn decode_v04(payload: &Payload) -> Vec<Trace> {
    let decoded = decode(&payload.data).expect("valid payload");
    let traces = traces_of(&decoded);
    assert_eq!(traces.len(), payload.trace_count);

    traces
        .iter()
        .map(|trace| {
            traces_of(trace)
                .iter()
                .map(|fields| {
                    let mut span = Span::default();
                    for (key, value) in fields.as_map().expect("span map") {
                        match key.as_str().expect("field name") {
                            "trace_id" => span.trace_id = value.as_u64().unwrap() as u128,
                            "span_id" => span.span_id = value.as_u64().unwrap(),
                            "parent_id" => span.parent_id = value.as_u64(),
                            "name" => span.name = str_of(value),
                            "resource" => span.resource = str_of(value),
                            "service" => span.service = str_of(value),
                            "type" => span.span_type = Some(str_of(value)),
                            "error" => span.error = value.as_u64().unwrap() != 0,
                            "start" => span.start = value.as_i64().unwrap(),
                            "duration" => span.duration = value.as_i64().unwrap(),
                            "meta" => {
                                span.meta = value
                                    .as_map()
                                    .unwrap()
                                    .iter()
                                    .map(|(k, v)| (str_of(k), str_of(v)))
                                    .collect()
                            }
                            "metrics" => {
                                span.metrics = Some(
                                    value
                                        .as_map()
                                        .unwrap()
                                        .iter()
                                        .map(|(k, v)| (str_of(k), v.as_f64().unwrap()))
                                        .collect(),
                                )
                            }
                            "meta_struct" => {
                                span.meta_struct = Some(
                                    value
                                        .as_map()
                                        .unwrap()
                                        .iter()
                                        .map(|(k, v)| {
                                            (str_of(k), decode(v.as_bin().unwrap()).unwrap())
                                        })
                                        .collect(),
                                )
                            }
                            // Asserted on the raw value where it matters.
                            "span_events" => {}
                            other => panic!("unexpected span field {other}"),
                        }
                    }
                    span
                })
                .collect()
        })
        .collect()
}

/// Decodes a v0.5 payload into spans, resolving string indices.
pub fn decode_v05(payload: &Payload) -> Vec<Trace> {
    let decoded = decode(&payload.data).expect("valid payload");
    let parts = decoded.as_array().expect("[strings, traces]");
    assert_eq!(parts.len(), 2);

    let strings: Vec<String> = parts[0].as_array().unwrap().iter().map(str_of).collect();
    let lookup = |v: &Value| strings[v.as_u64().expect("string index") as usize].clone();

    let traces = traces_of(&parts[1]);
    assert_eq!(traces.len(), payload.trace_count);

    traces
        .iter()
        .map(|trace| {
            traces_of(trace)
                .iter()
                .map(|tuple| {
                    let f = tuple.as_array().expect("span tuple");
                    assert_eq!(f.len(), 12);
                    let parent = f[5].as_u64().unwrap();
                    let span_type = lookup(&f[11]);
                    Span {
                        service: lookup(&f[0]),
                        name: lookup(&f[1]),
                        resource: lookup(&f[2]),
                        trace_id: f[3].as_u64().unwrap() as u128,
                        span_id: f[4].as_u64().unwrap(),
                        parent_id: (parent != 0).then_some(parent),
                        start: f[6].as_i64().unwrap(),
                        duration: f[7].as_i64().unwrap(),
                        error: f[8].as_u64().unwrap() != 0,
                        meta: f[9]
                            .as_map()
                            .unwrap()
                            .iter()
                            .map(|(k, v)| (lookup(k), lookup(v)))
                            .collect(),
                        metrics: Some(
                            f[10]
                                .as_map()
                                .unwrap()
                                .iter()
                                .map(|(k, v)| (lookup(k), v.as_f64().unwrap()))
                                .collect(),
                        ),
                        span_type: (!span_type.is_empty()).then_some(span_type),
                        meta_struct: None,
                        span_events: Vec::new(),
                    }
                })
                .collect()
        })
        .collect()
}

/// Random spans. With `v05` set, only spans the positional format can
/// represent exactly are produced: no zero parent, no empty type and always
/// some metrics.
pub fn arb_span(v05: bool) -> impl Strategy<Value = Span> {
    let text = "\\PC{0,16}";
    let meta = prop::collection::vec(("[a-z._]{0,12}", text), 0..5)
        .prop_map(|entries| entries.into_iter().collect::<IndexMap<_, _>>());
    let metric_map = prop::collection::vec(("[a-z._]{1,12}", -1e12f64..1e12), 0..4)
        .prop_map(|entries| entries.into_iter().collect::<IndexMap<_, _>>());

    let (parent, span_type, metrics) = if v05 {
        (
            prop::option::of(1..=u64::MAX).boxed(),
            prop::option::of("[a-z]{1,8}").boxed(),
            metric_map.prop_map(Some).boxed(),
        )
    } else {
        (
            prop::option::of(any::<u64>()).boxed(),
            prop::option::of("[a-z]{0,8}").boxed(),
            prop::option::of(metric_map).boxed(),
        )
    };

    (
        any::<u128>(),
        any::<u64>(),
        parent,
        (text, text, text),
        span_type,
        any::<bool>(),
        any::<i64>(),
        any::<i64>(),
        meta,
        metrics,
    )
        .prop_map(
            |(
                trace_id,
                span_id,
                parent_id,
                (name, resource, service),
                span_type,
                error,
                start,
                duration,
                meta,
                metrics,
            )| Span {
                trace_id,
                span_id,
                parent_id,
                name,
                resource,
                service,
                span_type,
                error,
                start,
                duration,
                meta,
                metrics,
                meta_struct: None,
                span_events: Vec::new(),
            },
        )
}

pub fn arb_trace(v05: bool) -> impl Strategy<Value = Trace> {
    prop::collection::vec(arb_span(v05), 1..4)
}

thread_local! {
    static CAPTURED: RefCell<Vec<String>> = RefCell::new(Vec::new());
}

/// Records messages on the thread that logged them, so tests running in
/// parallel only see their own.
struct Capture;

impl log::Log for Capture {
    fn enabled(&self, _: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if record.level() <= log::Level::Debug {
            CAPTURED.with(|c| c.borrow_mut().push(record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture;

/// Runs `f` and returns what it logged at debug level or above.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, Vec<String>) {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = log::set_logger(&CAPTURE);
        log::set_max_level(log::LevelFilter::Trace);
    });

    CAPTURED.with(|c| c.borrow_mut().clear());
    let result = f();
    (result, CAPTURED.with(|c| c.take()))
}
