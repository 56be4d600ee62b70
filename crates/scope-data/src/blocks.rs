//! Session block construction.
//!
//! Groups a time-ordered record stream into fixed five-hour windows aligned
//! to UTC hour boundaries, inserting gap markers for idle stretches of at
//! least one session length.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, DurationRound, Utc};
use scope_core::models::{SessionBlock, UsageRecord};
use scope_core::pricing::normalize_model;
use tracing::debug;

/// Builds the alternating sequence of real and gap blocks from sorted records.
pub struct SessionBuilder {
    session_duration: Duration,
}

impl SessionBuilder {
    pub fn new(session_duration: Duration) -> Self {
        Self { session_duration }
    }

    /// Transform records (pre-sorted ascending by timestamp) into blocks.
    ///
    /// A new block opens when a record lands at or past the current block's
    /// fixed end, or when the spacing since the previous record reaches one
    /// session length. When the spacing from the closed block's last record
    /// reaches a session length, a gap block spanning the idle stretch is
    /// inserted as well; at a spacing of exactly one session length both
    /// rules trigger and the gap block is kept.
    ///
    /// `now` determines which blocks are marked active (`end > now`).
    pub fn build(&self, records: &[UsageRecord], now: DateTime<Utc>) -> Vec<SessionBlock> {
        let mut blocks: Vec<SessionBlock> = Vec::new();
        let mut current: Option<SessionBlock> = None;

        for record in records {
            let needs_new = match &current {
                None => true,
                Some(block) => self.needs_new_block(block, record),
            };

            if needs_new {
                if let Some(mut closed) = current.take() {
                    Self::freeze_shares(&mut closed);
                    let gap = self.gap_after(&closed, record);
                    blocks.push(closed);
                    if let Some(gap) = gap {
                        blocks.push(gap);
                    }
                }
                current = Some(self.open_block(record.timestamp));
            }

            if let Some(block) = current.as_mut() {
                Self::add_record(block, record);
            }
        }

        if let Some(mut last) = current.take() {
            Self::freeze_shares(&mut last);
            blocks.push(last);
        }

        for block in blocks.iter_mut() {
            block.is_active = !block.is_gap && block.end > now;
        }

        debug!(
            blocks = blocks.len(),
            records = records.len(),
            "session blocks built"
        );
        blocks
    }

    fn needs_new_block(&self, block: &SessionBlock, record: &UsageRecord) -> bool {
        if record.timestamp >= block.end {
            return true;
        }
        match block.actual_end {
            Some(last) => record.timestamp - last >= self.session_duration,
            None => false,
        }
    }

    fn open_block(&self, first_record_at: DateTime<Utc>) -> SessionBlock {
        let start = first_record_at
            .duration_trunc(Duration::hours(1))
            .unwrap_or(first_record_at);
        SessionBlock {
            id: start.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            start,
            end: start + self.session_duration,
            actual_end: None,
            tokens: Default::default(),
            cost_usd: 0.0,
            per_model: HashMap::new(),
            message_ids: HashSet::new(),
            message_count: 0,
            is_active: false,
            is_gap: false,
            limit_notices: Vec::new(),
        }
    }

    fn add_record(block: &mut SessionBlock, record: &UsageRecord) {
        block.tokens += record.tokens;
        block.cost_usd += record.cost_usd;
        block.message_count += 1;
        if let Some(id) = &record.message_id {
            block.message_ids.insert(id.clone());
        }

        let model = if record.model.is_empty() {
            "unknown".to_string()
        } else {
            normalize_model(&record.model)
        };
        block.per_model.entry(model).or_default().add_record(record);

        block.actual_end = Some(record.timestamp);
    }

    /// Compute per-model share percentages against the block totals. Shares
    /// freeze here; later merges across blocks recompute them.
    fn freeze_shares(block: &mut SessionBlock) {
        let total_cost = block.cost_usd;
        let total_usage = block.tokens.usage();
        for stats in block.per_model.values_mut() {
            stats.cost_share = (total_cost > 0.0).then(|| stats.cost_usd / total_cost * 100.0);
            stats.token_share = (total_usage > 0)
                .then(|| stats.tokens.usage() as f64 / total_usage as f64 * 100.0);
        }
    }

    fn gap_after(&self, closed: &SessionBlock, next: &UsageRecord) -> Option<SessionBlock> {
        let idle_from = closed.actual_end?;
        if next.timestamp - idle_from < self.session_duration {
            return None;
        }
        Some(SessionBlock {
            id: format!("gap-{}", idle_from.format("%Y-%m-%dT%H:%M:%SZ")),
            start: idle_from,
            end: next.timestamp,
            actual_end: None,
            tokens: Default::default(),
            cost_usd: 0.0,
            per_model: HashMap::new(),
            message_ids: HashSet::new(),
            message_count: 0,
            is_active: false,
            is_gap: true,
            limit_notices: Vec::new(),
        })
    }
}
