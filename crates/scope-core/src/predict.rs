//! Exhaustion prediction and reset timing for the active session block.

use chrono::{DateTime, Duration, Utc};

use crate::models::SessionBlock;

/// When an extrapolated exhaustion lands this far out, it is noise, not a
/// prediction.
const PREDICTION_HORIZON_HOURS: i64 = 24;

/// Result of the prediction pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// When the cost ceiling would be reached at the current spend rate.
    /// `None` when there is no active block, the rate is zero, or the
    /// extrapolation lands beyond the horizon or past the reset.
    pub exhausted_at: Option<DateTime<Utc>>,
    /// When the current window resets: the active block's fixed end, the
    /// most recent block's end otherwise, or one session length from now
    /// when there is no history at all.
    pub resets_at: DateTime<Utc>,
    /// Time remaining until the reset, floored at zero.
    pub time_to_reset: Duration,
}

/// Predict exhaustion of `cost_limit` from the active block's spend rate.
///
/// The spend rate is the active block's cost divided by its elapsed minutes
/// (last record time, falling back to `now`, minus the block start). A
/// prediction is only reported when it falls strictly before the reset.
pub fn predict_exhaustion(
    blocks: &[SessionBlock],
    cost_limit: f64,
    session_duration: Duration,
    now: DateTime<Utc>,
) -> Prediction {
    let active = blocks.iter().find(|b| b.is_active && !b.is_gap);

    let resets_at = match active {
        Some(a) => a.end,
        None => blocks
            .iter()
            .rev()
            .find(|b| !b.is_gap)
            .map(|b| b.end)
            .unwrap_or(now + session_duration),
    };

    let exhausted_at = active
        .and_then(|a| exhaustion_for(a, cost_limit, now))
        .filter(|&predicted| predicted < resets_at);

    Prediction {
        exhausted_at,
        resets_at,
        time_to_reset: (resets_at - now).max(Duration::zero()),
    }
}

fn exhaustion_for(
    active: &SessionBlock,
    cost_limit: f64,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let elapsed_end = active.actual_end.unwrap_or(now);
    let elapsed_minutes = (elapsed_end - active.start).num_milliseconds().max(0) as f64 / 60_000.0;
    if elapsed_minutes <= 0.0 {
        return None;
    }

    let cost_per_minute = active.cost_usd / elapsed_minutes;
    if cost_per_minute <= 0.0 {
        return None;
    }

    let remaining = cost_limit - active.cost_usd;
    if remaining <= 0.0 {
        return Some(now);
    }

    let minutes_left = (remaining / cost_per_minute).ceil() as i64;
    let predicted = now + Duration::minutes(minutes_left);
    if predicted - now > Duration::hours(PREDICTION_HORIZON_HOURS) {
        return None;
    }
    Some(predicted)
}
