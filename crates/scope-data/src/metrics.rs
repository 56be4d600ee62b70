//! The metrics facade.
//!
//! [`UsageEngine::compute`] runs the full pipeline for one `[start, end]`
//! window: load and deduplicate records, rebuild session blocks, estimate
//! adaptive limits, and derive the nine live metrics. The engine owns the
//! only process-wide mutable state (the cost memo and the P90 cache); the
//! caller guarantees no two computes run concurrently.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use scope_core::burn::hourly_burn_rate;
use scope_core::cancel::CancelFlag;
use scope_core::config::EngineConfig;
use scope_core::error::Result;
use scope_core::models::{BurnRate, ModelStats, SessionBlock, UsageRecord};
use scope_core::p90::{P90Estimate, P90Estimator};
use scope_core::predict::predict_exhaustion;
use scope_core::pricing::{CostCalculator, PricingTable};
use tracing::debug;

use crate::blocks::SessionBuilder;
use crate::limits::{attach_notices, detect_limit_notices};
use crate::loader::{load_window, LoadStats};

/// One immutable snapshot of the nine live metrics plus supporting data.
///
/// Every field is defined on success; `None` means "not applicable", never
/// "error".
#[derive(Debug, Clone)]
pub struct Metrics {
    /// When this snapshot was computed (UTC).
    pub computed_at: DateTime<Utc>,
    /// The analysis window this snapshot covers.
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,

    /// Cost across active blocks, rounded for display.
    pub cost_usage: f64,
    /// Usage tokens (input + output) across active blocks.
    pub token_usage: u64,
    /// Distinct message ids across active blocks.
    pub messages_usage: usize,
    /// Time until the current window resets, floored at zero.
    pub time_to_reset: Duration,
    /// Per-model stats merged across active blocks, shares recomputed.
    pub model_distribution: HashMap<String, ModelStats>,
    /// Burn rate over the trailing hour, when any tokens fall inside it.
    pub burn_rate: Option<BurnRate>,
    /// Hourly cost rate summed over active blocks.
    pub cost_rate: f64,
    /// Predicted exhaustion of the P90 cost ceiling, when it precedes reset.
    pub tokens_will_run_out: Option<DateTime<Utc>>,
    /// When the current window resets.
    pub limit_resets_at: DateTime<Utc>,
    /// Adaptive limits estimated from history.
    pub p90_token_limit: u64,
    pub p90_cost_limit: f64,
    pub p90_message_limit: u64,

    /// All session and gap blocks in the window.
    pub blocks: Vec<SessionBlock>,
    /// The filtered, deduplicated record list the blocks were built from.
    pub records: Vec<UsageRecord>,
    /// Skip counters from the load pass.
    pub load_stats: LoadStats,
}

struct CachedEstimate {
    estimate: P90Estimate,
    computed_at: Instant,
    /// Id of the last completed non-gap block the estimate was derived from.
    tail_id: Option<String>,
}

/// The pipeline facade. Owns the cost memo and the P90 TTL cache.
pub struct UsageEngine {
    config: EngineConfig,
    costs: CostCalculator,
    estimator: P90Estimator,
    p90_cache: Option<CachedEstimate>,
}

impl UsageEngine {
    pub fn new(config: EngineConfig) -> Self {
        let costs = CostCalculator::new(PricingTable::default(), config.strict_unknown_models);
        let estimator = P90Estimator::new(config.p90.clone());
        Self {
            config,
            costs,
            estimator,
            p90_cache: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compute a snapshot for the config's default window ending now.
    pub fn compute_default(&mut self) -> Result<Metrics> {
        let now = Utc::now();
        let (start, end) = self.config.default_window(now);
        self.compute_at(start, end, now, &CancelFlag::new())
    }

    /// Compute a snapshot for an explicit window.
    pub fn compute(&mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Metrics> {
        self.compute_at(start, end, Utc::now(), &CancelFlag::new())
    }

    /// Compute a snapshot, honouring a cancellation flag.
    pub fn compute_with_cancel(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> Result<Metrics> {
        self.compute_at(start, end, Utc::now(), cancel)
    }

    /// Deterministic entry point: the caller supplies the clock.
    pub fn compute_at(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
        cancel: &CancelFlag,
    ) -> Result<Metrics> {
        let outcome = load_window(&self.config, &mut self.costs, start, end, cancel)?;

        let builder = SessionBuilder::new(self.config.session_duration());
        let mut blocks = builder.build(&outcome.records, now);

        let notices = detect_limit_notices(&outcome.raw_lines);
        attach_notices(&mut blocks, &notices);

        let p90 = self.p90_estimate(&blocks);

        let active: Vec<&SessionBlock> = blocks
            .iter()
            .filter(|b| b.is_active && !b.is_gap)
            .collect();

        let cost_usage = self.round_display(active.iter().map(|b| b.cost_usd).sum());
        let token_usage = active.iter().map(|b| b.tokens.usage()).sum();
        let messages_usage = active
            .iter()
            .flat_map(|b| b.message_ids.iter())
            .collect::<HashSet<_>>()
            .len();
        let model_distribution = merge_model_stats(&active);
        let cost_rate = active
            .iter()
            .filter(|b| b.actual_duration_minutes() >= 1.0)
            .map(|b| b.cost_usd / b.actual_duration_minutes() * 60.0)
            .sum();

        let burn_rate = hourly_burn_rate(&blocks, now);
        let prediction = predict_exhaustion(
            &blocks,
            p90.cost_limit,
            self.config.session_duration(),
            now,
        );

        debug!(
            blocks = blocks.len(),
            active = active.len(),
            records = outcome.records.len(),
            "metrics snapshot computed"
        );

        Ok(Metrics {
            computed_at: now,
            window_start: start,
            window_end: end,
            cost_usage,
            token_usage,
            messages_usage,
            time_to_reset: prediction.time_to_reset,
            model_distribution,
            burn_rate,
            cost_rate,
            tokens_will_run_out: prediction.exhausted_at,
            limit_resets_at: prediction.resets_at,
            p90_token_limit: p90.token_limit,
            p90_cost_limit: p90.cost_limit,
            p90_message_limit: p90.message_limit,
            blocks,
            records: outcome.records,
            load_stats: outcome.stats,
        })
    }

    /// Return the cached P90 estimate when it is fresh and the completed
    /// block list has not grown past its prior tail; recompute otherwise.
    fn p90_estimate(&mut self, blocks: &[SessionBlock]) -> P90Estimate {
        let tail_id = blocks
            .iter()
            .rev()
            .find(|b| b.is_completed())
            .map(|b| b.id.clone());

        if let Some(cached) = &self.p90_cache {
            if cached.tail_id == tail_id && cached.computed_at.elapsed() < self.config.p90.cache_ttl
            {
                return cached.estimate;
            }
        }

        let estimate = self.estimator.estimate(blocks);
        self.p90_cache = Some(CachedEstimate {
            estimate,
            computed_at: Instant::now(),
            tail_id,
        });
        estimate
    }

    fn round_display(&self, value: f64) -> f64 {
        let factor = 10_f64.powi(self.config.display_decimals as i32);
        (value * factor).round() / factor
    }
}

/// Merge per-model stats across blocks and recompute share percentages
/// against the merged totals.
fn merge_model_stats(blocks: &[&SessionBlock]) -> HashMap<String, ModelStats> {
    let mut merged: HashMap<String, ModelStats> = HashMap::new();
    for block in blocks {
        for (model, stats) in &block.per_model {
            merged.entry(model.clone()).or_default().merge(stats);
        }
    }

    let total_cost: f64 = merged.values().map(|s| s.cost_usd).sum();
    let total_usage: u64 = merged.values().map(|s| s.tokens.usage()).sum();
    for stats in merged.values_mut() {
        stats.cost_share = (total_cost > 0.0).then(|| stats.cost_usd / total_cost * 100.0);
        stats.token_share =
            (total_usage > 0).then(|| stats.tokens.usage() as f64 / total_usage as f64 * 100.0);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use scope_core::error::EngineError;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_jsonl(dir: &Path, name: &str, lines: &[String]) {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
    }

    fn usage_line(ts: &str, input: u64, output: u64, cc: u64, cr: u64, msg: &str, req: &str) -> String {
        serde_json::json!({
            "type": "assistant",
            "timestamp": ts,
            "requestId": req,
            "message": {
                "id": msg,
                "model": "claude-3-5-sonnet",
                "usage": {
                    "input_tokens": input,
                    "output_tokens": output,
                    "cache_creation_input_tokens": cc,
                    "cache_read_input_tokens": cr,
                },
            },
        })
        .to_string()
    }

    fn engine_for(dir: &TempDir) -> UsageEngine {
        UsageEngine::new(EngineConfig {
            base_paths: vec![dir.path().to_path_buf()],
            ..EngineConfig::default()
        })
    }

    fn now() -> DateTime<Utc> {
        "2024-09-11T15:30:00Z".parse().unwrap()
    }

    fn compute(engine: &mut UsageEngine) -> Metrics {
        let (start, end) = engine.config().default_window(now());
        engine
            .compute_at(start, end, now(), &CancelFlag::new())
            .unwrap()
    }

    fn ts(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    // ── single-record snapshot ───────────────────────────────────────────────

    #[test]
    fn test_single_sonnet_record_snapshot() {
        let dir = TempDir::new().unwrap();
        write_jsonl(
            dir.path(),
            "usage.jsonl",
            &[usage_line(
                "2024-09-11T14:37:25Z",
                1_000,
                500,
                200,
                100,
                "m1",
                "r1",
            )],
        );
        let mut engine = engine_for(&dir);
        let m = compute(&mut engine);

        assert_eq!(m.blocks.len(), 1);
        let b = &m.blocks[0];
        assert_eq!(b.start, ts("2024-09-11T14:00:00Z"));
        assert_eq!(b.end, ts("2024-09-11T19:00:00Z"));
        assert!(b.is_active);
        assert_eq!(b.cost_usd, 0.011_280);

        assert_eq!(m.cost_usage, 0.01);
        assert_eq!(m.token_usage, 1_500);
        assert_eq!(m.messages_usage, 1);
        assert_eq!(m.p90_token_limit, 44_000);
        assert_eq!(m.p90_cost_limit, 5.0);
        assert_eq!(m.p90_message_limit, 100);
        assert_eq!(m.limit_resets_at, ts("2024-09-11T19:00:00Z"));
        assert_eq!(m.time_to_reset, Duration::minutes(210));
        assert_eq!(m.records.len(), 1);
        assert_eq!(m.load_stats.duplicates_skipped, 0);
    }

    // ── dedup ────────────────────────────────────────────────────────────────

    #[test]
    fn test_duplicate_identity_pair_dropped() {
        let dir = TempDir::new().unwrap();
        let line = usage_line("2024-09-11T14:37:25Z", 1_000, 500, 0, 0, "m1", "r1");
        write_jsonl(dir.path(), "usage.jsonl", &[line.clone(), line]);
        let mut engine = engine_for(&dir);
        let m = compute(&mut engine);

        assert_eq!(m.messages_usage, 1);
        assert_eq!(m.records.len(), 1);
        assert_eq!(m.load_stats.duplicates_skipped, 1);
    }

    // ── model distribution ───────────────────────────────────────────────────

    #[test]
    fn test_model_distribution_shares_recomputed() {
        let dir = TempDir::new().unwrap();
        let sonnet = usage_line("2024-09-11T14:10:00Z", 1_000, 0, 0, 0, "m1", "r1");
        let opus = serde_json::json!({
            "type": "assistant",
            "timestamp": "2024-09-11T14:20:00Z",
            "requestId": "r2",
            "message": {
                "id": "m2",
                "model": "claude-3-opus",
                "usage": {"input_tokens": 1_000u64, "output_tokens": 0u64},
            },
        })
        .to_string();
        write_jsonl(dir.path(), "usage.jsonl", &[sonnet, opus]);

        let mut engine = engine_for(&dir);
        let m = compute(&mut engine);

        assert_eq!(m.model_distribution.len(), 2);
        let s = &m.model_distribution["claude-3-5-sonnet"];
        let o = &m.model_distribution["claude-3-opus"];
        // Equal usage tokens: 50% each by tokens.
        assert!((s.token_share.unwrap() - 50.0).abs() < 1e-9);
        // Opus input is 5x sonnet's price: 0.003 vs 0.015.
        assert!((o.cost_share.unwrap() - 0.015 / 0.018 * 100.0).abs() < 1e-6);
    }

    // ── cost rate ────────────────────────────────────────────────────────────

    #[test]
    fn test_cost_rate_from_active_block() {
        let dir = TempDir::new().unwrap();
        write_jsonl(
            dir.path(),
            "usage.jsonl",
            &[
                usage_line("2024-09-11T14:00:00Z", 1_000, 0, 0, 0, "m1", "r1"),
                usage_line("2024-09-11T15:00:00Z", 1_000, 0, 0, 0, "m2", "r2"),
            ],
        );
        let mut engine = engine_for(&dir);
        let m = compute(&mut engine);

        // Active block: $0.006 over 60 lived minutes -> $0.006/h.
        assert!((m.cost_rate - 0.006).abs() < 1e-9, "cost_rate = {}", m.cost_rate);
        assert!(m.burn_rate.is_some());
    }

    // ── adaptive limits end-to-end ───────────────────────────────────────────

    #[test]
    fn test_p90_token_limit_from_history() {
        let dir = TempDir::new().unwrap();
        // Ten completed blocks in August, 6h apart, totals 10k..100k.
        let base = ts("2024-08-01T00:00:00Z");
        let lines: Vec<String> = (1..=10u64)
            .map(|i| {
                let at = base + Duration::hours(((i - 1) * 6) as i64);
                usage_line(
                    &at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
                    i * 10_000,
                    0,
                    0,
                    0,
                    &format!("m{i}"),
                    &format!("r{i}"),
                )
            })
            .collect();
        write_jsonl(dir.path(), "history.jsonl", &lines);

        let mut engine = UsageEngine::new(EngineConfig {
            base_paths: vec![dir.path().to_path_buf()],
            lookback_days: 60,
            ..EngineConfig::default()
        });
        let m = compute(&mut engine);

        // Limit-hit tier is {80k, 90k, 100k}; exclusive p90 clamps to the top.
        assert_eq!(m.p90_token_limit, 100_000);
    }

    #[test]
    fn test_p90_cache_invalidated_when_tail_advances() {
        let dir = TempDir::new().unwrap();
        write_jsonl(
            dir.path(),
            "a.jsonl",
            &[usage_line("2024-09-08T10:00:00Z", 1_000, 0, 0, 0, "m1", "r1")],
        );
        let mut engine = engine_for(&dir);
        let first = compute(&mut engine);

        // A later completed block appears: the tail advances and the cached
        // estimate must be recomputed despite the long TTL.
        write_jsonl(
            dir.path(),
            "b.jsonl",
            &[usage_line("2024-09-10T10:00:00Z", 200_000, 0, 0, 0, "m2", "r2")],
        );
        let second = compute(&mut engine);

        assert_eq!(first.p90_token_limit, 44_000);
        assert_eq!(second.p90_token_limit, 200_000);
    }

    // ── failure propagation ──────────────────────────────────────────────────

    #[test]
    fn test_strict_mode_fails_on_unknown_model() {
        let dir = TempDir::new().unwrap();
        let line = serde_json::json!({
            "type": "assistant",
            "timestamp": "2024-09-11T14:00:00Z",
            "message": {
                "model": "mystery-model-7",
                "usage": {"input_tokens": 10u64, "output_tokens": 1u64},
            },
        })
        .to_string();
        write_jsonl(dir.path(), "usage.jsonl", &[line]);

        let mut engine = UsageEngine::new(EngineConfig {
            base_paths: vec![dir.path().to_path_buf()],
            strict_unknown_models: true,
            ..EngineConfig::default()
        });
        let (start, end) = engine.config().default_window(now());
        let err = engine
            .compute_at(start, end, now(), &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownModel(_)));
    }

    #[test]
    fn test_empty_directory_snapshot_is_defined() {
        let dir = TempDir::new().unwrap();
        let mut engine = engine_for(&dir);
        let m = compute(&mut engine);

        assert!(m.blocks.is_empty());
        assert_eq!(m.cost_usage, 0.0);
        assert_eq!(m.token_usage, 0);
        assert_eq!(m.messages_usage, 0);
        assert!(m.burn_rate.is_none());
        assert!(m.tokens_will_run_out.is_none());
        // No history at all: reset synthesizes one session length out.
        assert_eq!(m.limit_resets_at, now() + Duration::hours(5));
        assert_eq!(m.time_to_reset, Duration::hours(5));
    }

    // ── limit notices ────────────────────────────────────────────────────────

    #[test]
    fn test_limit_notice_attached_to_block() {
        let dir = TempDir::new().unwrap();
        let usage = usage_line("2024-09-11T14:10:00Z", 1_000, 0, 0, 0, "m1", "r1");
        let notice = serde_json::json!({
            "type": "system",
            "timestamp": "2024-09-11T14:30:00Z",
            "content": "You have hit a rate limit. Please wait.",
        })
        .to_string();
        write_jsonl(dir.path(), "usage.jsonl", &[usage, notice]);

        let mut engine = engine_for(&dir);
        let m = compute(&mut engine);
        assert_eq!(m.blocks[0].limit_notices.len(), 1);
        assert_eq!(m.blocks[0].limit_notices[0].kind, "system_limit");
    }
}
