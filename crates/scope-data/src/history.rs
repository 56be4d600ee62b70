//! Historical aggregation of usage records by calendar period.

use std::collections::{BTreeMap, HashMap};

use scope_core::models::{ModelStats, TokenVector, UsageRecord};
use scope_core::pricing::normalize_model;

/// Usage accumulated over one calendar day or month.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PeriodStats {
    /// Period key: `"2024-09-11"` (daily) or `"2024-09"` (monthly).
    pub period: String,
    /// Combined token counts for the period.
    pub tokens: TokenVector,
    /// Combined cost (USD) for the period.
    pub cost_usd: f64,
    /// Number of contributing records.
    pub entries: u32,
    /// Per-model breakdown keyed by normalized model name.
    pub per_model: HashMap<String, ModelStats>,
}

impl PeriodStats {
    fn add_record(&mut self, record: &UsageRecord) {
        self.tokens += record.tokens;
        self.cost_usd += record.cost_usd;
        self.entries += 1;

        let model = if record.model.is_empty() {
            "unknown".to_string()
        } else {
            normalize_model(&record.model)
        };
        self.per_model.entry(model).or_default().add_record(record);
    }
}

/// Aggregate records by calendar day, ascending by key.
pub fn aggregate_daily(records: &[UsageRecord]) -> Vec<PeriodStats> {
    aggregate_by(records, |r| r.timestamp.format("%Y-%m-%d").to_string())
}

/// Aggregate records by calendar month, ascending by key.
pub fn aggregate_monthly(records: &[UsageRecord]) -> Vec<PeriodStats> {
    aggregate_by(records, |r| r.timestamp.format("%Y-%m").to_string())
}

fn aggregate_by(
    records: &[UsageRecord],
    key_fn: impl Fn(&UsageRecord) -> String,
) -> Vec<PeriodStats> {
    let mut periods: BTreeMap<String, PeriodStats> = BTreeMap::new();
    for record in records {
        let key = key_fn(record);
        let entry = periods.entry(key.clone()).or_insert_with(|| PeriodStats {
            period: key,
            ..PeriodStats::default()
        });
        entry.add_record(record);
    }
    periods.into_values().collect()
}
