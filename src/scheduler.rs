//! Periodic worker restarts.
//!
//! The worker's memory only grows, so the supervisor replaces it on a fixed
//! interval. The loop ends for good when the shutdown signal fires, its
//! sender is dropped, or the supervisor itself is gone.

use crate::error::OcrError;
use crate::supervisor::Shared;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

pub(crate) fn spawn(
    shared: Weak<Shared>,
    interval: Duration,
    shutdown: oneshot::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(run(shared, interval, shutdown))
}

async fn run(shared: Weak<Shared>, interval: Duration, mut shutdown: oneshot::Receiver<()>) {
    if interval.is_zero() {
        tracing::debug!("Scheduled OCR restarts disabled");
        let _ = shutdown.await;
        return;
    }

    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let Some(supervisor) = shared.upgrade() else {
                    break;
                };
                tracing::info!("Scheduled OCR process restart");
                // Other failures are logged by restart() and leave the fault set
                // until a later tick succeeds
                if let Err(OcrError::Closed) = supervisor.restart().await {
                    break;
                }
            }
        }
    }

    tracing::debug!("Restart scheduler stopped");
}
