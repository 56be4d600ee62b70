//! Extraction of normalized usage records from raw log lines.
//!
//! The upstream assistant's JSONL schema has drifted over time: token counts
//! may live under `message.usage`, a top-level `usage` object, or the record
//! root, under several alternative key spellings. The probes are encoded as
//! data and tried in a fixed precedence so extraction stays deterministic.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::warn;

use crate::models::{TokenVector, UsageRecord};

// ── Field probes ──────────────────────────────────────────────────────────────

const INPUT_KEYS: &[&str] = &["input_tokens", "inputTokens", "prompt_tokens"];
const OUTPUT_KEYS: &[&str] = &["output_tokens", "outputTokens", "completion_tokens"];
const CACHE_CREATE_KEYS: &[&str] = &[
    "cache_creation_tokens",
    "cache_creation_input_tokens",
    "cacheCreationInputTokens",
];
const CACHE_READ_KEYS: &[&str] = &[
    "cache_read_input_tokens",
    "cache_read_tokens",
    "cacheReadInputTokens",
];
const REQUEST_ID_KEYS: &[&str] = &["requestId", "request_id", "uuid"];

/// Outcome of probing one raw log line.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Not a usage-bearing line (wrong type, no usage object, or all token
    /// slots zero). Silently ignored.
    Skip,
    /// A usage-bearing line whose timestamp could not be parsed; the record
    /// is dropped and the caller counts the loss.
    InvalidTimestamp,
    /// A normalized usage record. `cost_usd` is left at zero; the loader
    /// attaches it from the pricing table.
    Record(UsageRecord),
}

/// Probe one parsed log line for a usage record.
///
/// A line qualifies iff `type == "assistant"` and either `message.usage` or a
/// top-level `usage` object exists. Token sources are then probed in order
/// (`message.usage`, `usage`, the record root); the first source whose input
/// or output probe yields a positive count wins and supplies all four slots.
/// When no source has input or output, a second pass accepts the first source
/// carrying cache tokens; a record that is zero everywhere is rejected.
pub fn extract_record(data: &Value) -> Extraction {
    let is_assistant = data
        .get("type")
        .and_then(|v| v.as_str())
        .map(|s| s == "assistant")
        .unwrap_or(false);
    if !is_assistant {
        return Extraction::Skip;
    }

    let message_usage = data.get("message").and_then(|m| m.get("usage"));
    let usage = data.get("usage");
    if message_usage.is_none() && usage.is_none() {
        return Extraction::Skip;
    }

    let sources = [message_usage, usage, Some(data)];
    let Some(tokens) = probe_sources(&sources) else {
        return Extraction::Skip;
    };

    let ts_value = data
        .get("timestamp")
        .or_else(|| data.get("message").and_then(|m| m.get("timestamp")));
    let timestamp = match ts_value.and_then(parse_timestamp) {
        Some(ts) => ts,
        None => {
            warn!("usage record dropped: unparseable timestamp {:?}", ts_value);
            return Extraction::InvalidTimestamp;
        }
    };

    let model = data
        .get("message")
        .and_then(|m| m.get("model"))
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .or_else(|| data.get("model").and_then(|v| v.as_str()).filter(|s| !s.is_empty()))
        .unwrap_or("unknown")
        .to_string();

    let message_id = data
        .get("message")
        .and_then(|m| m.get("id"))
        .and_then(|v| v.as_str())
        .map(str::to_string);
    let request_id = probe_str(data, REQUEST_ID_KEYS);

    Extraction::Record(UsageRecord {
        timestamp,
        model,
        tokens,
        cost_usd: 0.0,
        message_id,
        request_id,
    })
}

/// Probe the ordered candidate sources for a token vector.
fn probe_sources(sources: &[Option<&Value>]) -> Option<TokenVector> {
    // First pass: a source wins by having input or output tokens.
    for source in sources.iter().flatten() {
        let input = probe_u64(source, INPUT_KEYS);
        let output = probe_u64(source, OUTPUT_KEYS);
        if input > 0 || output > 0 {
            return Some(TokenVector {
                input,
                output,
                cache_creation: probe_u64(source, CACHE_CREATE_KEYS),
                cache_read: probe_u64(source, CACHE_READ_KEYS),
            });
        }
    }

    // Second pass: cache-only records are still usage.
    for source in sources.iter().flatten() {
        let cache_creation = probe_u64(source, CACHE_CREATE_KEYS);
        let cache_read = probe_u64(source, CACHE_READ_KEYS);
        if cache_creation > 0 || cache_read > 0 {
            return Some(TokenVector {
                input: 0,
                output: 0,
                cache_creation,
                cache_read,
            });
        }
    }

    None
}

/// First key in `keys` that resolves to a u64 in `obj`; zero otherwise.
fn probe_u64(obj: &Value, keys: &[&str]) -> u64 {
    for &key in keys {
        if let Some(v) = obj.get(key).and_then(|v| v.as_u64()) {
            return v;
        }
    }
    0
}

/// First key in `keys` that resolves to a non-empty string in `obj`.
fn probe_str(obj: &Value, keys: &[&str]) -> Option<String> {
    for &key in keys {
        if let Some(s) = obj.get(key).and_then(|v| v.as_str()) {
            if !s.is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

// ── Timestamp parsing ─────────────────────────────────────────────────────────

/// Epoch values above this threshold are interpreted as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Parse a JSON timestamp value into UTC.
///
/// Strings: RFC 3339 (a trailing `Z` is treated as `+00:00`) and common ISO
/// date-time shapes without an offset, interpreted as UTC. Numbers: integer
/// seconds since epoch up to 10^12, milliseconds above that; fractional
/// numbers are seconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_timestamp_str(s),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                if i.abs() > EPOCH_MILLIS_THRESHOLD {
                    DateTime::from_timestamp_millis(i)
                } else {
                    DateTime::from_timestamp(i, 0)
                }
            } else if let Some(f) = n.as_f64() {
                let secs = f.trunc() as i64;
                let nanos = (f.fract().abs() * 1_000_000_000.0).round() as u32;
                DateTime::from_timestamp(secs, nanos)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }

    let normalized = if let Some(stripped) = s.strip_suffix('Z') {
        format!("{}+00:00", stripped)
    } else {
        s.to_string()
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.with_timezone(&Utc));
    }

    // Offset-free ISO shapes are taken as UTC.
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];
    for fmt in FORMATS {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    None
}
