//! Ingestion and analytics layer for the tokenscope usage engine.
//!
//! Discovers and streams the assistant's JSONL conversation logs, rebuilds
//! the session/block model, and exposes the metrics facade that computes the
//! nine live metrics for a `[start, end]` window.

pub mod blocks;
pub mod history;
pub mod limits;
pub mod loader;
pub mod metrics;

pub use scope_core as core;
