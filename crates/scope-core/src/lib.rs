//! Core domain layer for the tokenscope usage engine.
//!
//! Pure data types and calculations: pricing and cost computation, usage
//! record extraction, percentile estimation, burn-rate math and exhaustion
//! prediction. No file I/O happens here; the ingestion layer lives in
//! `scope-data`.

pub mod burn;
pub mod cancel;
pub mod config;
pub mod error;
pub mod extract;
pub mod formatting;
pub mod models;
pub mod p90;
pub mod predict;
pub mod pricing;
pub mod time_utils;
