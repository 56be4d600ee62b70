use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialise the global `tracing` subscriber.
///
/// `log_level` maps to an [`EnvFilter`] directive; unrecognised names fall
/// back to `"info"`. All output goes to stderr so snapshot printing on
/// stdout stays clean.
pub fn setup_logging(log_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false);

    tracing_subscriber::registry().with(filter).with(layer).init();

    Ok(())
}
