//! Rolling burn-rate computation over the trailing hour.
//!
//! Each block's tokens and cost are assumed to accrue evenly across the
//! block's lived interval, so the share allocated to the window is the
//! fraction of that interval which overlaps `[now - 1h, now]`.

use chrono::{DateTime, Duration, Utc};

use crate::models::{BurnRate, SessionBlock};

/// Compute the burn rate over the last 60 minutes.
///
/// For a non-gap block the lived interval runs from its start to `now` when
/// active, otherwise to its last record (or nominal end when it has none).
/// A block entirely outside the window contributes nothing. Returns `None`
/// when no tokens fall inside the window.
pub fn hourly_burn_rate(blocks: &[SessionBlock], now: DateTime<Utc>) -> Option<BurnRate> {
    let window_start = now - Duration::hours(1);

    let mut tokens_in_hour = 0.0f64;
    let mut cost_in_hour = 0.0f64;

    for block in blocks.iter().filter(|b| !b.is_gap) {
        let seg_end = if block.is_active {
            now
        } else {
            block.actual_end.unwrap_or(block.end)
        };

        if seg_end <= window_start || block.start >= now {
            continue;
        }

        let full_minutes = minutes_between(block.start, seg_end);
        if full_minutes <= 0.0 {
            continue;
        }

        let a = block.start.max(window_start);
        let b = seg_end.min(now);
        let overlap_minutes = minutes_between(a, b);

        let fraction = overlap_minutes / full_minutes;
        tokens_in_hour += block.total_tokens() as f64 * fraction;
        cost_in_hour += block.cost_usd * fraction;
    }

    if tokens_in_hour == 0.0 {
        return None;
    }

    Some(BurnRate {
        tokens_per_minute: tokens_in_hour / 60.0,
        cost_per_hour: cost_in_hour,
        computed_at: now,
    })
}

fn minutes_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    (b - a).num_milliseconds() as f64 / 60_000.0
}
