//! Worker-thread dispatch and periodic refresh.
//!
//! Two operations, per the engine's concurrency contract: run one compute off
//! the calling context and await its snapshot, or refresh on a fixed cadence
//! with busy ticks dropped. The engine moves into the worker for the duration
//! of each compute, so no two computes ever run concurrently.

use chrono::Utc;
use scope_core::cancel::CancelFlag;
use scope_core::error::EngineError;
use scope_data::metrics::{Metrics, UsageEngine};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Run a single compute on a worker thread and hand the engine back.
pub async fn run_once(
    mut engine: UsageEngine,
    start: chrono::DateTime<Utc>,
    end: chrono::DateTime<Utc>,
) -> (UsageEngine, scope_core::error::Result<Metrics>) {
    tokio::task::spawn_blocking(move || {
        let result = engine.compute(start, end);
        (engine, result)
    })
    .await
    .expect("compute worker panicked")
}

/// Handle to a running refresh loop.
///
/// Dropping the handle leaves the loop running; call [`RefreshHandle::stop`]
/// to cancel any in-flight compute and end the loop.
pub struct RefreshHandle {
    handle: tokio::task::JoinHandle<()>,
    cancel: CancelFlag,
}

impl RefreshHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

/// Start the periodic refresh loop.
///
/// Computes a snapshot immediately, then on every tick of the engine's
/// configured refresh interval. A compute still in flight when a tick fires
/// swallows that tick (missed ticks are skipped, not queued). Snapshots are
/// delivered over the returned channel; the loop exits when the receiver is
/// dropped or the handle is stopped.
pub fn start_refresh(engine: UsageEngine) -> (mpsc::Receiver<Metrics>, RefreshHandle) {
    let (tx, rx) = mpsc::channel(16);
    let cancel = CancelFlag::new();

    let loop_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        refresh_loop(engine, tx, loop_cancel).await;
    });

    (rx, RefreshHandle { handle, cancel })
}

async fn refresh_loop(mut engine: UsageEngine, tx: mpsc::Sender<Metrics>, cancel: CancelFlag) {
    let refresh = engine.config().refresh_interval;
    let mut interval = tokio::time::interval(refresh);
    // Re-entrancy suppression: ticks that elapse during a slow compute are
    // dropped rather than queued.
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        if tx.is_closed() || cancel.is_cancelled() {
            debug!("refresh loop shutting down");
            break;
        }

        let flag = cancel.clone();
        let joined = tokio::task::spawn_blocking(move || {
            let now = Utc::now();
            let (start, end) = engine.config().default_window(now);
            let result = engine.compute_with_cancel(start, end, &flag);
            (engine, result)
        })
        .await;

        let (returned, outcome) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "compute worker panicked; refresh loop ending");
                break;
            }
        };
        engine = returned;

        match outcome {
            Ok(metrics) => {
                if tx.send(metrics).await.is_err() {
                    break;
                }
            }
            Err(EngineError::Cancelled) => break,
            Err(e) => warn!(error = %e, "compute failed; snapshot skipped"),
        }
    }
}
