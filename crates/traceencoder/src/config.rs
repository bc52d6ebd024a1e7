use std::env;
use std::sync::Arc;

use serde::Deserialize;

use crate::cache::{self, StringCache};

/// Default payload capacity: 8 MiB.
pub const DEFAULT_LIMIT: usize = 8 * 1024 * 1024;

/// Settings shared by both encoders.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Maximum size of one payload in bytes.
    pub limit: usize,

    /// Number of strings kept in the encoded string cache.
    pub cache_capacity: usize,

    /// Log every encoded trace as hex at debug level.
    pub debug_encoding: bool,

    /// Write span events as a top-level v0.4 field instead of a meta tag.
    pub native_span_events: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            cache_capacity: cache::DEFAULT_CAPACITY,
            debug_encoding: false,
            native_span_events: false,
        }
    }
}

impl EncoderConfig {
    /// The defaults, overridden by any of the following environment variables:
    /// - `DD_TRACE_ENCODER_LIMIT`
    /// - `DD_TRACE_ENCODER_CACHE_SIZE` (or the older `NOTEPACK_ENCODE_CACHE_MAX_SIZE`)
    /// - `DD_TRACE_ENCODING_DEBUG`
    /// - `DD_TRACE_NATIVE_SPAN_EVENTS`
    ///
    /// Values that fail to parse are ignored.
    pub fn from_env() -> Self {
        Self::default().overlay(|var| env::var(var).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn overlay<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(limit) = lookup("DD_TRACE_ENCODER_LIMIT").and_then(|v| v.parse().ok()) {
            self.limit = limit;
        }

        for var in &["DD_TRACE_ENCODER_CACHE_SIZE", "NOTEPACK_ENCODE_CACHE_MAX_SIZE"] {
            if let Some(size) = lookup(var).and_then(|v| v.parse().ok()) {
                self.cache_capacity = size;
                break;
            }
        }

        if let Some(debug) = lookup("DD_TRACE_ENCODING_DEBUG").and_then(|v| parse_bool(&v)) {
            self.debug_encoding = debug;
        }

        if let Some(native) = lookup("DD_TRACE_NATIVE_SPAN_EVENTS").and_then(|v| parse_bool(&v)) {
            self.native_span_events = native;
        }

        self
    }

    /// Builds a string cache sized for this configuration.
    pub fn string_cache(&self) -> Arc<StringCache> {
        Arc::new(StringCache::new(self.cache_capacity))
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" | "" => Some(false),
        _ => None,
    }
}
