use std::sync::Arc;
use std::thread;

use bytes::BytesMut;
use indexmap::IndexMap;

use ddtrace_traceencoder::{
    decode, EncoderConfig, Error, Format, Payload, Span, StringCache, Trace, TraceEncoder, Transport,
    V04Encoder, V05Encoder, Value,
};

#[derive(Default)]
struct Sink {
    payloads: Vec<Payload>,
    buffers: usize,
}

impl Transport for Sink {
    fn flush(&mut self, payload: Payload) {
        self.payloads.push(payload);
    }

    fn fresh_buffer(&mut self, limit: usize) -> BytesMut {
        self.buffers += 1;
        BytesMut::with_capacity(limit)
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn trace(id: u64, spans: u64) -> Trace {
    (0..spans)
        .map(|i| {
            let mut meta = IndexMap::new();
            meta.insert("http.method".to_string(), "GET".to_string());
            meta.insert("http.url".to_string(), format!("/items/{id}"));
            Span {
                trace_id: id as u128,
                span_id: id * 100 + i,
                parent_id: (i > 0).then_some(id * 100),
                name: "web.request".into(),
                resource: format!("GET /items/{id}"),
                service: "shop".into(),
                span_type: Some("web".into()),
                start: 1_700_000_000_000_000_000,
                duration: 25_000,
                meta,
                ..Default::default()
            }
        })
        .collect()
}

fn span_ids(payload: &Payload) -> Vec<u64> {
    let decoded = decode(&payload.data).unwrap();
    let traces = match payload.format {
        Format::V04 => decoded,
        Format::V05 => decoded.as_array().unwrap()[1].clone(),
    };
    let mut ids = Vec::new();
    for trace in traces.as_array().unwrap() {
        for span in trace.as_array().unwrap() {
            let id = match payload.format {
                Format::V04 => span.get("span_id").cloned(),
                Format::V05 => span.as_array().map(|f| f[4].clone()),
            };
            ids.push(id.and_then(|v| v.as_u64()).unwrap());
        }
    }
    ids
}

#[test]
fn both_formats_ship_every_span_once() {
    init_logger();
    let config = EncoderConfig {
        limit: 4096,
        debug_encoding: true,
        ..Default::default()
    };
    let cache = config.string_cache();
    let traces: Vec<Trace> = (1..=40).map(|id| trace(id, 3)).collect();
    let expected: Vec<u64> = traces.iter().flatten().map(|s| s.span_id).collect();

    let mut v04 = V04Encoder::new(Sink::default(), cache.clone(), &config);
    let mut v05 = V05Encoder::new(Sink::default(), cache, &config);
    v04.encode(&traces);
    v05.encode(&traces);
    assert!(v04.flush());
    assert!(v05.flush());

    for (format, sink) in [(Format::V04, v04.transport()), (Format::V05, v05.transport())] {
        assert!(sink.payloads.len() > 1, "{format:?} should need several payloads");
        let mut ids = Vec::new();
        for payload in &sink.payloads {
            assert_eq!(payload.format, format);
            assert!(payload.len() <= 4096);
            ids.extend(span_ids(payload));
        }
        assert_eq!(ids, expected);
        // One buffer up front, then one per shipped payload.
        assert_eq!(sink.buffers, sink.payloads.len() + 1);
    }
}

#[test]
fn v05_is_smaller_for_repetitive_traces() {
    let config = EncoderConfig::default();
    let traces: Vec<Trace> = (1..=10).map(|id| trace(id, 5)).collect();

    let mut v04 = V04Encoder::new(Sink::default(), config.string_cache(), &config);
    let mut v05 = V05Encoder::new(Sink::default(), config.string_cache(), &config);
    v04.encode(&traces);
    v05.encode(&traces);

    let a = v04.make_payload();
    let b = v05.make_payload();
    assert_eq!(a.trace_count, 10);
    assert_eq!(b.trace_count, 10);
    assert!(b.len() < a.len());
    assert_eq!(a.format.path(), "/v0.4/traces");
    assert_eq!(b.format.path(), "/v0.5/traces");
}

#[test]
fn borrowed_transport() {
    let config = EncoderConfig::default();
    let mut sink = Sink::default();
    {
        let mut encoder = V05Encoder::new(&mut sink, config.string_cache(), &config);
        encoder.encode_trace(&trace(7, 2)).unwrap();
        assert_eq!(encoder.count(), 1);
        assert!(encoder.flush());
        assert!(!encoder.flush());
    }
    assert_eq!(sink.payloads.len(), 1);
    assert_eq!(span_ids(&sink.payloads[0]), vec![700, 701]);
}

#[test]
fn encoders_share_a_cache_across_threads() {
    let cache = Arc::new(StringCache::new(64));
    let config = EncoderConfig {
        limit: 2048,
        ..Default::default()
    };

    let handles: Vec<_> = (0..4u64)
        .map(|n| {
            let cache = cache.clone();
            let config = config.clone();
            thread::spawn(move || {
                let mut encoder = V04Encoder::new(Sink::default(), cache, &config);
                let traces: Vec<Trace> = (0..50).map(|i| trace(n * 1000 + i, 2)).collect();
                encoder.encode(&traces);
                encoder.flush();
                encoder
                    .transport()
                    .payloads
                    .iter()
                    .map(|p| p.trace_count)
                    .sum::<usize>()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 50);
    }
    assert!(cache.len() <= 64);
    assert!(cache.contains("web.request"));
}

#[test]
fn rejected_trace_does_not_stop_later_ones() {
    let config = EncoderConfig {
        limit: 512,
        ..Default::default()
    };
    let mut encoder = V04Encoder::new(Sink::default(), config.string_cache(), &config);

    let mut big = trace(2, 1);
    big[0].meta.insert("blob".into(), "b".repeat(1024));

    let encoded = encoder.encode(&[trace(1, 1), big, trace(3, 1), trace(4, 1)]);
    let dropped: Vec<usize> = encoded.dropped.iter().map(|(index, _)| *index).collect();
    assert_eq!(dropped, vec![1]);
    assert!(matches!(encoded.dropped[0].1, Error::SizeExceeded { .. }));
    encoder.flush();

    let ids: Vec<u64> = encoder
        .transport()
        .payloads
        .iter()
        .flat_map(span_ids)
        .collect();
    assert_eq!(ids, vec![100, 300, 400]);

    let last = encoder.transport().payloads.last().unwrap();
    let decoded = decode(&last.data).unwrap();
    let span = &decoded.as_array().unwrap()[0].as_array().unwrap()[0];
    assert_eq!(span.get("service"), Some(&Value::from("shop")));
}
