//! Rate-limit notification detection.
//!
//! The assistant embeds limit notices in the same JSONL stream as usage
//! records: system messages mentioning rate limits, and tool results carrying
//! a `limit reached|<unix-ts>` marker. Detected notices are attached to the
//! block whose window contains them so the consumer can explain anomalous
//! stretches.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use scope_core::extract::parse_timestamp;
use scope_core::models::{LimitNotice, SessionBlock};
use serde_json::Value;

/// Scan raw log lines and return all detected limit notices.
pub fn detect_limit_notices(raw_lines: &[Value]) -> Vec<LimitNotice> {
    raw_lines.iter().filter_map(detect_single).collect()
}

/// Attach each notice to every non-gap block whose window contains its
/// timestamp.
pub fn attach_notices(blocks: &mut [SessionBlock], notices: &[LimitNotice]) {
    for notice in notices {
        for block in blocks.iter_mut() {
            if block.is_gap {
                continue;
            }
            if block.start <= notice.timestamp && notice.timestamp <= block.end {
                block.limit_notices.push(notice.clone());
            }
        }
    }
}

fn detect_single(raw: &Value) -> Option<LimitNotice> {
    match raw.get("type").and_then(|v| v.as_str())? {
        "system" => detect_system_notice(raw),
        "user" => detect_tool_result_notice(raw),
        _ => None,
    }
}

fn detect_system_notice(raw: &Value) -> Option<LimitNotice> {
    let content = raw.get("content").and_then(|v| v.as_str())?;
    let lower = content.to_lowercase();
    if !lower.contains("limit") && !lower.contains("rate") {
        return None;
    }

    let timestamp = parse_timestamp(raw.get("timestamp")?)?;

    if is_opus_notice(&lower) {
        let resets_at = parse_wait_minutes(&lower).map(|m| timestamp + Duration::minutes(m));
        Some(LimitNotice {
            kind: "opus_limit".to_string(),
            timestamp,
            content: content.to_string(),
            resets_at,
        })
    } else {
        Some(LimitNotice {
            kind: "system_limit".to_string(),
            timestamp,
            content: content.to_string(),
            resets_at: None,
        })
    }
}

fn detect_tool_result_notice(raw: &Value) -> Option<LimitNotice> {
    let content_list = raw.get("message")?.get("content")?.as_array()?;

    for item in content_list {
        if item.get("type").and_then(|v| v.as_str()) != Some("tool_result") {
            continue;
        }
        let Some(tool_content) = item.get("content").and_then(|v| v.as_array()) else {
            continue;
        };
        for tool_item in tool_content {
            let Some(text) = tool_item.get("text").and_then(|v| v.as_str()) else {
                continue;
            };
            if !text.to_lowercase().contains("limit reached") {
                continue;
            }
            let timestamp = parse_timestamp(raw.get("timestamp")?)?;
            return Some(LimitNotice {
                kind: "general_limit".to_string(),
                timestamp,
                content: text.to_string(),
                resets_at: parse_reset_marker(text),
            });
        }
    }
    None
}

fn is_opus_notice(lower: &str) -> bool {
    lower.contains("opus") && lower.contains("limit")
}

/// Parse `"wait N minutes"` out of a lowercased notice.
fn parse_wait_minutes(lower: &str) -> Option<i64> {
    let re = Regex::new(r"wait\s+(\d+)\s+minutes?").expect("regex is valid");
    re.captures(lower)?.get(1)?.as_str().parse().ok()
}

/// Parse the unix timestamp out of a `limit reached|<unix-ts>` marker.
fn parse_reset_marker(text: &str) -> Option<DateTime<Utc>> {
    let re = Regex::new(r"limit reached\|(\d+)").expect("regex is valid");
    let secs: i64 = re
        .captures(&text.to_lowercase())?
        .get(1)?
        .as_str()
        .parse()
        .ok()?;
    DateTime::from_timestamp(secs, 0)
}
