use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use scope_core::config::EngineConfig;

/// Live usage metrics for the local AI coding assistant's conversation logs.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tokenscope",
    about = "Live usage metrics for local assistant conversation logs",
    version
)]
pub struct Settings {
    /// View mode
    #[arg(long, default_value = "live", value_parser = ["live", "daily", "monthly"])]
    pub view: String,

    /// Log directories to scan (defaults to the assistant's standard paths)
    #[arg(long = "data-path")]
    pub data_paths: Vec<PathBuf>,

    /// Days of history to analyse
    #[arg(long, default_value = "7", value_parser = clap::value_parser!(i64).range(1..=365))]
    pub days: i64,

    /// Refresh cadence in seconds (1-300)
    #[arg(long, default_value = "8", value_parser = clap::value_parser!(u64).range(1..=300))]
    pub refresh: u64,

    /// Timezone for displayed times (auto-detected if not specified)
    #[arg(long, default_value = "auto")]
    pub timezone: String,

    /// Fail on models missing from the pricing table instead of assuming
    /// sonnet rates
    #[arg(long)]
    pub strict: bool,

    /// Print a single snapshot and exit
    #[arg(long)]
    pub once: bool,

    /// Logging level
    #[arg(long, default_value = "info", value_parser = ["debug", "info", "warn", "error"])]
    pub log_level: String,
}

impl Settings {
    /// Map the CLI surface onto the engine configuration.
    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            lookback_days: self.days,
            refresh_interval: Duration::from_secs(self.refresh),
            strict_unknown_models: self.strict,
            ..EngineConfig::default()
        };
        if !self.data_paths.is_empty() {
            config.base_paths = self.data_paths.clone();
        }
        config
    }
}
