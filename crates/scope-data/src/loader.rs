//! JSONL discovery and streaming for the usage engine.
//!
//! The source files are append-only and may grow, appear or vanish between
//! calls; every load is a full re-read. All input-shape problems are
//! swallowed locally and surfaced as counters.

use std::collections::HashSet;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use scope_core::cancel::CancelFlag;
use scope_core::config::EngineConfig;
use scope_core::error::{EngineError, Result};
use scope_core::extract::{extract_record, Extraction};
use scope_core::models::UsageRecord;
use scope_core::pricing::CostCalculator;
use tracing::{debug, warn};

/// Observability counters accumulated during one load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Files successfully opened and streamed.
    pub files_scanned: usize,
    /// Files that could not be opened or read.
    pub files_skipped: usize,
    /// Lines dropped for parse or timestamp failures.
    pub lines_skipped: u64,
    /// Records dropped because their identity pair was already seen.
    pub duplicates_skipped: u64,
}

/// Everything one load pass produces.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// Deduplicated usage records inside the window, ascending by timestamp.
    pub records: Vec<UsageRecord>,
    /// Every line that parsed as JSON, kept for limit-notice detection.
    pub raw_lines: Vec<serde_json::Value>,
    pub stats: LoadStats,
}

/// Find all `.jsonl` files under `base`, recursively, sorted by path.
///
/// A missing directory is not an error; it yields no files.
pub fn discover_jsonl_files(base: &Path) -> Vec<PathBuf> {
    if !base.exists() {
        debug!("log directory absent: {}", base.display());
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(base)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry.file_type().is_file()
                && entry
                    .path()
                    .extension()
                    .map(|ext| ext == "jsonl")
                    .unwrap_or(false)
        })
        .map(|entry| entry.into_path())
        .collect();

    files.sort();
    files
}

/// Load every usage record in `[start, end)` from the configured base paths.
///
/// Records are deduplicated on the `message-id:request-id` identity pair
/// (records missing either id are never deduplicated), priced through
/// `costs`, and returned sorted ascending by timestamp; ties keep insertion
/// order. The dedup set lives and dies with this call.
///
/// Fails only on cancellation or, in strict mode, on an unknown model.
pub fn load_window(
    config: &EngineConfig,
    costs: &mut CostCalculator,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    cancel: &CancelFlag,
) -> Result<LoadOutcome> {
    let mut records: Vec<UsageRecord> = Vec::new();
    let mut raw_lines: Vec<serde_json::Value> = Vec::new();
    let mut stats = LoadStats::default();
    let mut seen_identities: HashSet<String> = HashSet::new();

    for base in &config.base_paths {
        for file_path in discover_jsonl_files(base) {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            stream_file(
                &file_path,
                costs,
                start,
                end,
                cancel,
                &mut seen_identities,
                &mut records,
                &mut raw_lines,
                &mut stats,
            )?;
        }
    }

    // Stable sort: equal timestamps keep their insertion order.
    records.sort_by_key(|r| r.timestamp);

    debug!(
        records = records.len(),
        files = stats.files_scanned,
        duplicates = stats.duplicates_skipped,
        "load pass complete"
    );

    Ok(LoadOutcome {
        records,
        raw_lines,
        stats,
    })
}

#[allow(clippy::too_many_arguments)]
fn stream_file(
    file_path: &Path,
    costs: &mut CostCalculator,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    cancel: &CancelFlag,
    seen_identities: &mut HashSet<String>,
    records: &mut Vec<UsageRecord>,
    raw_lines: &mut Vec<serde_json::Value>,
    stats: &mut LoadStats,
) -> Result<()> {
    let file = match std::fs::File::open(file_path) {
        Ok(f) => f,
        Err(e) => {
            warn!("skipping unreadable file {}: {}", file_path.display(), e);
            stats.files_skipped += 1;
            return Ok(());
        }
    };
    stats.files_scanned += 1;

    let reader = std::io::BufReader::new(file);
    for line_result in reader.lines() {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        // A torn final line shows up as an I/O or parse failure; both are
        // tolerated.
        let line = match line_result {
            Ok(l) => l,
            Err(_) => {
                stats.lines_skipped += 1;
                continue;
            }
        };
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let data: serde_json::Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                debug!("unparseable line in {}: {}", file_path.display(), e);
                stats.lines_skipped += 1;
                continue;
            }
        };

        let extraction = extract_record(&data);
        raw_lines.push(data);

        let mut record = match extraction {
            Extraction::Record(r) => r,
            Extraction::InvalidTimestamp => {
                stats.lines_skipped += 1;
                continue;
            }
            Extraction::Skip => continue,
        };

        // Window filter: inclusive start, exclusive end.
        if record.timestamp < start || record.timestamp >= end {
            continue;
        }

        if let Some(key) = record.identity_key() {
            if !seen_identities.insert(key) {
                stats.duplicates_skipped += 1;
                continue;
            }
        }

        record.cost_usd = costs.cost(&record.model, &record.tokens)?;
        records.push(record);
    }

    Ok(())
}
