use std::collections::{HashMap, HashSet};
use std::ops::{Add, AddAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token counts for one API call or an aggregate of calls, split by category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenVector {
    /// Input (prompt) tokens.
    #[serde(default)]
    pub input: u64,
    /// Output (completion) tokens.
    #[serde(default)]
    pub output: u64,
    /// Tokens written into the prompt cache.
    #[serde(default)]
    pub cache_creation: u64,
    /// Tokens read from the prompt cache.
    #[serde(default)]
    pub cache_read: u64,
}

impl TokenVector {
    /// Usage tokens: input + output only. This is the denominator used for
    /// per-model token percentages and the `token_usage` metric.
    pub fn usage(&self) -> u64 {
        self.input + self.output
    }

    /// Sum of all four token categories.
    pub fn total(&self) -> u64 {
        self.input + self.output + self.cache_creation + self.cache_read
    }

    /// `true` when every category is zero.
    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

impl Add for TokenVector {
    type Output = TokenVector;

    fn add(self, rhs: TokenVector) -> TokenVector {
        TokenVector {
            input: self.input + rhs.input,
            output: self.output + rhs.output,
            cache_creation: self.cache_creation + rhs.cache_creation,
            cache_read: self.cache_read + rhs.cache_read,
        }
    }
}

impl AddAssign for TokenVector {
    fn add_assign(&mut self, rhs: TokenVector) {
        *self = *self + rhs;
    }
}

/// A single normalized usage record extracted from one log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    /// UTC timestamp of the API call.
    pub timestamp: DateTime<Utc>,
    /// Raw model identifier as it appeared in the log.
    pub model: String,
    /// Token counts for this call.
    pub tokens: TokenVector,
    /// Cost in USD, computed from the pricing table by the loader.
    #[serde(default)]
    pub cost_usd: f64,
    /// Message identifier, when the log line carried one.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Request identifier, when the log line carried one.
    #[serde(default)]
    pub request_id: Option<String>,
}

impl UsageRecord {
    /// Global deduplication key `"{message_id}:{request_id}"`.
    ///
    /// Returns `None` unless both identifiers are present; records without a
    /// complete identity pair are never deduplicated.
    pub fn identity_key(&self) -> Option<String> {
        match (&self.message_id, &self.request_id) {
            (Some(mid), Some(rid)) => Some(format!("{}:{}", mid, rid)),
            _ => None,
        }
    }
}

/// Token and cost totals attributed to a single model inside a block.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    /// Tokens attributed to this model.
    #[serde(default)]
    pub tokens: TokenVector,
    /// Cost in USD attributed to this model.
    #[serde(default)]
    pub cost_usd: f64,
    /// Number of contributing usage records.
    #[serde(default)]
    pub entries: u32,
    /// Share of the aggregate's cost, in percent. Frozen at aggregation close.
    #[serde(default)]
    pub cost_share: Option<f64>,
    /// Share of the aggregate's usage tokens (input+output), in percent.
    #[serde(default)]
    pub token_share: Option<f64>,
}

impl ModelStats {
    /// Accumulate one record's tokens and cost.
    pub fn add_record(&mut self, record: &UsageRecord) {
        self.tokens += record.tokens;
        self.cost_usd += record.cost_usd;
        self.entries += 1;
    }

    /// Merge another stats value into this one. Shares are cleared; they only
    /// make sense relative to a fixed aggregate and must be recomputed.
    pub fn merge(&mut self, other: &ModelStats) {
        self.tokens += other.tokens;
        self.cost_usd += other.cost_usd;
        self.entries += other.entries;
        self.cost_share = None;
        self.token_share = None;
    }
}

/// A rate-limit notification attached to the block whose window contains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitNotice {
    /// Category of the limit (`"opus_limit"`, `"system_limit"`, `"general_limit"`).
    pub kind: String,
    /// When the limit was encountered (UTC).
    pub timestamp: DateTime<Utc>,
    /// Human-readable content of the notification.
    pub content: String,
    /// When the limit lifts, if the notification said so.
    #[serde(default)]
    pub resets_at: Option<DateTime<Utc>>,
}

/// Token consumption and cost flux over the trailing 60 minutes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurnRate {
    /// Tokens consumed per minute.
    pub tokens_per_minute: f64,
    /// US dollar cost per hour.
    pub cost_per_hour: f64,
    /// When this rate was computed (UTC).
    pub computed_at: DateTime<Utc>,
}

/// A five-hour usage window aligned to a UTC hour boundary, or a gap marker.
///
/// Gap blocks (`is_gap = true`) span the idle period between two real blocks
/// and carry no usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBlock {
    /// Unique identifier (the RFC 3339 start time, `gap-`-prefixed for gaps).
    pub id: String,
    /// Start of the window. Hour-aligned UTC for real blocks.
    pub start: DateTime<Utc>,
    /// Fixed end of the window (`start + 5h` for real blocks).
    pub end: DateTime<Utc>,
    /// Timestamp of the last record added, if any.
    #[serde(default)]
    pub actual_end: Option<DateTime<Utc>>,
    /// Aggregated token counts.
    #[serde(default)]
    pub tokens: TokenVector,
    /// Aggregated cost in USD.
    #[serde(default)]
    pub cost_usd: f64,
    /// Per-model breakdown keyed by normalized model name.
    #[serde(default)]
    pub per_model: HashMap<String, ModelStats>,
    /// Distinct message identifiers seen in this block.
    #[serde(default)]
    pub message_ids: HashSet<String>,
    /// Number of records added (including records without a message id).
    #[serde(default)]
    pub message_count: u32,
    /// Whether the block's window extends past the current time.
    #[serde(default)]
    pub is_active: bool,
    /// Whether this is a gap marker rather than a real block.
    #[serde(default)]
    pub is_gap: bool,
    /// Rate-limit notifications whose timestamps fall inside this window.
    #[serde(default)]
    pub limit_notices: Vec<LimitNotice>,
}

impl SessionBlock {
    /// Sum of all four token categories.
    pub fn total_tokens(&self) -> u64 {
        self.tokens.total()
    }

    /// Minutes from `start` to the last record (or the nominal end when the
    /// block holds no records). Not clamped; callers that need a minimum
    /// duration filter on the returned value.
    pub fn actual_duration_minutes(&self) -> f64 {
        let end = self.actual_end.unwrap_or(self.end);
        let ms = (end - self.start).num_milliseconds();
        ms.max(0) as f64 / 60_000.0
    }

    /// A block is completed when it is neither a gap nor still open.
    pub fn is_completed(&self) -> bool {
        !self.is_gap && !self.is_active
    }
}
