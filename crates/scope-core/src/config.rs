use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::p90::P90Config;

/// Default refresh cadence for the periodic scheduler, in seconds.
pub const DEFAULT_REFRESH_SECS: u64 = 8;

/// Default look-back window, in days.
pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

/// Default session window width, in hours.
pub const DEFAULT_SESSION_HOURS: i64 = 5;

/// Full configuration surface of the usage engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directories scanned recursively for `.jsonl` log files.
    pub base_paths: Vec<PathBuf>,
    /// Width of the default `[now - N days, now]` analysis window.
    pub lookback_days: i64,
    /// Cadence of the periodic scheduler.
    pub refresh_interval: Duration,
    /// Width of a session block, in hours.
    pub session_duration_hours: i64,
    /// Decimal places for displayed USD values. Internal arithmetic always
    /// rounds at six.
    pub display_decimals: u32,
    /// When `true`, a model the pricing table cannot resolve fails the
    /// compute call instead of falling back to sonnet rates.
    pub strict_unknown_models: bool,
    /// Adaptive-limit estimator settings.
    pub p90: P90Config,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_paths: default_base_paths(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_SECS),
            session_duration_hours: DEFAULT_SESSION_HOURS,
            display_decimals: 2,
            strict_unknown_models: false,
            p90: P90Config::default(),
        }
    }
}

impl EngineConfig {
    /// The session width as a chrono duration.
    pub fn session_duration(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_duration_hours)
    }

    /// The default analysis window ending at `now`.
    pub fn default_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (now - chrono::Duration::days(self.lookback_days), now)
    }
}

/// The standard locations the assistant writes its conversation logs to.
pub fn default_base_paths() -> Vec<PathBuf> {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    vec![
        home.join(".claude").join("projects"),
        home.join(".config").join("claude").join("projects"),
    ]
}
