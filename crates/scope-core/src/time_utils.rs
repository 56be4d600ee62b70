use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// Detect the IANA timezone name of the running system.
///
/// Falls back to `"UTC"` if detection fails.
pub fn get_system_timezone() -> String {
    iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string())
}

/// Converts UTC pipeline timestamps into a display timezone.
///
/// The engine is UTC throughout; this only exists so the consumer can render
/// reset and prediction times in the user's local zone.
pub struct TimezoneHandler {
    tz: Tz,
}

impl TimezoneHandler {
    /// Create a handler for the given IANA timezone name. `"auto"` selects
    /// the system timezone; unrecognised names fall back to UTC with a
    /// warning.
    pub fn new(tz_name: &str) -> Self {
        let resolved = if tz_name == "auto" {
            get_system_timezone()
        } else {
            tz_name.to_string()
        };
        let tz = resolved.parse::<Tz>().unwrap_or_else(|_| {
            warn!("unrecognised timezone \"{}\", falling back to UTC", resolved);
            Tz::UTC
        });
        Self { tz }
    }

    /// Render a UTC timestamp as local wall-clock time, e.g. `"16:30"`.
    pub fn format_time(&self, dt: DateTime<Utc>) -> String {
        dt.with_timezone(&self.tz).format("%H:%M").to_string()
    }

    /// Render a UTC timestamp as a local date-time, e.g. `"2024-09-11 16:30"`.
    pub fn format_datetime(&self, dt: DateTime<Utc>) -> String {
        dt.with_timezone(&self.tz).format("%Y-%m-%d %H:%M").to_string()
    }
}
