use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the usage engine.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A file could not be opened or read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// A timestamp value did not match any recognised format.
    #[error("Invalid timestamp: {0}")]
    TimestampParse(String),

    /// A model identifier could not be resolved against the pricing table.
    ///
    /// Only raised in strict mode; otherwise unknown models fall back to
    /// sonnet-category rates.
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    /// A percentile was requested over an empty sample.
    #[error("Empty sample for percentile estimation")]
    EmptySample,

    /// The computation was cancelled before completing.
    #[error("Computation cancelled")]
    Cancelled,

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the tokenscope crates.
pub type Result<T> = std::result::Result<T, EngineError>;
