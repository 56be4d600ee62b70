//! Adaptive-limit estimation from historical session blocks.
//!
//! The engine has no access to the subscription tier behind the logs, so the
//! practical ceiling for a session is estimated as the 90th percentile of
//! completed blocks, with a bias towards blocks that plausibly ran into a
//! known limit.

use std::time::Duration;

use crate::error::{EngineError, Result};
use crate::models::SessionBlock;

/// Well-known session token limits, ascending, used to detect limit-hitting
/// blocks.
pub const COMMON_TOKEN_LIMITS: &[u64] = &[19_000, 88_000, 220_000, 880_000];

/// Fraction of a common limit at which a block counts as having hit it.
pub const LIMIT_HIT_THRESHOLD: f64 = 0.9;

/// Floor for the estimated token limit.
pub const DEFAULT_MIN_TOKEN_LIMIT: u64 = 44_000;

/// Cost ceiling reported when no completed blocks exist.
pub const DEFAULT_COST_LIMIT: f64 = 5.0;

/// Message ceiling reported when no completed blocks exist.
pub const DEFAULT_MESSAGE_LIMIT: u64 = 100;

/// Configuration for the P90 estimator.
#[derive(Debug, Clone)]
pub struct P90Config {
    /// Known token-limit steps used for the limit-hit subset.
    pub common_limits: Vec<u64>,
    /// Fraction of a limit at which a block is considered "at limit".
    pub limit_threshold: f64,
    /// Minimum token limit returned even when the percentile is lower.
    pub default_min_tokens: u64,
    /// Cost limit used when the sample is empty.
    pub default_cost_limit: f64,
    /// Message limit used when the sample is empty.
    pub default_message_limit: u64,
    /// How long a computed estimate stays valid in the facade's cache.
    pub cache_ttl: Duration,
}

impl Default for P90Config {
    fn default() -> Self {
        Self {
            common_limits: COMMON_TOKEN_LIMITS.to_vec(),
            limit_threshold: LIMIT_HIT_THRESHOLD,
            default_min_tokens: DEFAULT_MIN_TOKEN_LIMIT,
            default_cost_limit: DEFAULT_COST_LIMIT,
            default_message_limit: DEFAULT_MESSAGE_LIMIT,
            cache_ttl: Duration::from_secs(3_600),
        }
    }
}

/// The three adaptive ceilings derived from history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct P90Estimate {
    /// Estimated token limit per session block.
    pub token_limit: u64,
    /// Estimated cost limit (USD) per session block.
    pub cost_limit: f64,
    /// Estimated message limit per session block.
    pub message_limit: u64,
}

/// Percentile with linear interpolation on the exclusive definition:
/// position `p·(n+1) − 1`, clamped into `[0, n−1]`.
///
/// `sorted` must be ascending. Fails with [`EngineError::EmptySample`] on an
/// empty slice.
pub fn percentile_exclusive(sorted: &[f64], fraction: f64) -> Result<f64> {
    if sorted.is_empty() {
        return Err(EngineError::EmptySample);
    }
    let n = sorted.len();
    if n == 1 {
        return Ok(sorted[0]);
    }

    let position = (fraction * (n as f64 + 1.0) - 1.0).clamp(0.0, (n - 1) as f64);
    let lo = position.floor() as usize;
    let hi = position.ceil() as usize;
    if lo == hi {
        return Ok(sorted[lo]);
    }
    let frac = position - lo as f64;
    Ok(sorted[lo] + frac * (sorted[hi] - sorted[lo]))
}

/// Estimates P90 ceilings over completed, non-gap session blocks.
pub struct P90Estimator {
    config: P90Config,
}

impl P90Estimator {
    pub fn new(config: P90Config) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(P90Config::default())
    }

    /// Compute the estimate triple from a block list.
    ///
    /// Token limit selection is two-tier: blocks whose token total reaches
    /// `limit_threshold` of any common limit form the preferred sample; when
    /// none qualify, all completed blocks with a positive token total are
    /// used. The result is clamped to `default_min_tokens` from below. Cost
    /// and message ceilings are plain P90s over all completed blocks.
    pub fn estimate(&self, blocks: &[SessionBlock]) -> P90Estimate {
        let completed: Vec<&SessionBlock> = blocks.iter().filter(|b| b.is_completed()).collect();

        P90Estimate {
            token_limit: self.token_limit(&completed),
            cost_limit: self
                .p90_of(completed.iter().map(|b| b.cost_usd))
                .unwrap_or(self.config.default_cost_limit),
            message_limit: self
                .p90_of(completed.iter().map(|b| f64::from(b.message_count)))
                .map(|v| v.round() as u64)
                .unwrap_or(self.config.default_message_limit),
        }
    }

    fn token_limit(&self, completed: &[&SessionBlock]) -> u64 {
        let hits: Vec<f64> = completed
            .iter()
            .filter(|b| {
                let total = b.total_tokens() as f64;
                self.config
                    .common_limits
                    .iter()
                    .any(|&limit| total >= limit as f64 * self.config.limit_threshold)
            })
            .map(|b| b.total_tokens() as f64)
            .collect();

        let sample: Vec<f64> = if hits.is_empty() {
            completed
                .iter()
                .filter(|b| b.total_tokens() > 0)
                .map(|b| b.total_tokens() as f64)
                .collect()
        } else {
            hits
        };

        let p90 = self
            .p90_of(sample.into_iter())
            .map(|v| v.round() as u64)
            .unwrap_or(self.config.default_min_tokens);
        p90.max(self.config.default_min_tokens)
    }

    fn p90_of(&self, values: impl Iterator<Item = f64>) -> Option<f64> {
        let mut sample: Vec<f64> = values.collect();
        sample.sort_by(|a, b| a.partial_cmp(b).expect("samples are finite"));
        percentile_exclusive(&sample, 0.9).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::{HashMap, HashSet};

    fn block(total_tokens: u64, cost: f64, messages: u32, is_active: bool, is_gap: bool) -> SessionBlock {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        SessionBlock {
            id: format!("b-{total_tokens}"),
            start,
            end: start + chrono::Duration::hours(5),
            actual_end: None,
            tokens: crate::models::TokenVector {
                input: total_tokens,
                output: 0,
                cache_creation: 0,
                cache_read: 0,
            },
            cost_usd: cost,
            per_model: HashMap::new(),
            message_ids: HashSet::new(),
            message_count: messages,
            is_active,
            is_gap,
            limit_notices: Vec::new(),
        }
    }

    fn completed(total_tokens: u64) -> SessionBlock {
        block(total_tokens, total_tokens as f64 / 10_000.0, 10, false, false)
    }

    // ── percentile_exclusive ─────────────────────────────────────────────────

    #[test]
    fn test_percentile_empty_fails() {
        assert!(matches!(
            percentile_exclusive(&[], 0.9),
            Err(EngineError::EmptySample)
        ));
    }

    #[test]
    fn test_percentile_single_element() {
        assert_eq!(percentile_exclusive(&[42.0], 0.9).unwrap(), 42.0);
    }

    #[test]
    fn test_percentile_three_elements_clamps_high() {
        // position = 0.9 * 4 - 1 = 2.6, clamped to 2.
        let p = percentile_exclusive(&[80_000.0, 90_000.0, 100_000.0], 0.9).unwrap();
        assert_eq!(p, 100_000.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        // n=10: position = 0.9 * 11 - 1 = 8.9 -> 9000 + 0.9 * 1000.
        let sample: Vec<f64> = (1..=10).map(|i| i as f64 * 1_000.0).collect();
        let p = percentile_exclusive(&sample, 0.9).unwrap();
        assert!((p - 9_900.0).abs() < 1e-9, "p90 = {p}");
    }

    #[test]
    fn test_percentile_low_fraction_clamps_to_zero() {
        let sample = [10.0, 20.0, 30.0];
        assert_eq!(percentile_exclusive(&sample, 0.0).unwrap(), 10.0);
    }

    // ── token limit estimation ───────────────────────────────────────────────

    #[test]
    fn test_token_limit_prefers_limit_hitting_blocks() {
        // Totals 10k..100k: blocks at or above 0.9 * 88k = 79.2k qualify.
        let blocks: Vec<SessionBlock> = (1..=10).map(|i| completed(i * 10_000)).collect();
        let est = P90Estimator::with_defaults().estimate(&blocks);
        // Hit set {80k, 90k, 100k}: p90 clamps to the top element.
        assert_eq!(est.token_limit, 100_000);
    }

    #[test]
    fn test_token_limit_falls_back_to_all_completed() {
        let blocks: Vec<SessionBlock> = (1..=10).map(|i| completed(i * 1_000)).collect();
        let est = P90Estimator::with_defaults().estimate(&blocks);
        // p90 of 1k..10k = 9.9k, clamped up to the 44k floor.
        assert_eq!(est.token_limit, DEFAULT_MIN_TOKEN_LIMIT);
    }

    #[test]
    fn test_token_limit_empty_sample_uses_default() {
        let est = P90Estimator::with_defaults().estimate(&[]);
        assert_eq!(est.token_limit, DEFAULT_MIN_TOKEN_LIMIT);
        assert_eq!(est.cost_limit, DEFAULT_COST_LIMIT);
        assert_eq!(est.message_limit, DEFAULT_MESSAGE_LIMIT);
    }

    #[test]
    fn test_gap_and_active_blocks_excluded() {
        let blocks = vec![
            block(900_000, 90.0, 500, false, true), // gap: ignored
            block(850_000, 85.0, 400, true, false), // active: ignored
        ];
        let est = P90Estimator::with_defaults().estimate(&blocks);
        assert_eq!(est.token_limit, DEFAULT_MIN_TOKEN_LIMIT);
        assert_eq!(est.cost_limit, DEFAULT_COST_LIMIT);
    }

    #[test]
    fn test_zero_token_blocks_excluded_from_fallback_tier() {
        let blocks = vec![completed(0), completed(0), completed(200_000)];
        let est = P90Estimator::with_defaults().estimate(&blocks);
        // 200k hits the 220k * 0.9 = 198k threshold; single-element sample.
        assert_eq!(est.token_limit, 200_000);
    }

    // ── cost / message estimation ────────────────────────────────────────────

    #[test]
    fn test_cost_and_message_p90() {
        let blocks: Vec<SessionBlock> = (1..=10)
            .map(|i| block(1_000, i as f64, i * 10, false, false))
            .collect();
        let est = P90Estimator::with_defaults().estimate(&blocks);
        // p90 of 1..10 = 9.9; messages 10..100 -> 99.
        assert!((est.cost_limit - 9.9).abs() < 1e-9);
        assert_eq!(est.message_limit, 99);
    }

    // ── monotonicity ─────────────────────────────────────────────────────────

    #[test]
    fn test_p90_monotone_under_large_additions() {
        let mut blocks: Vec<SessionBlock> = (1..=10).map(|i| completed(i * 10_000)).collect();
        let estimator = P90Estimator::with_defaults();
        let before = estimator.estimate(&blocks).token_limit;

        // Add a sample no smaller than the current p90.
        blocks.push(completed(before));
        let after = estimator.estimate(&blocks).token_limit;
        assert!(after >= before, "p90 decreased: {before} -> {after}");
    }
}
