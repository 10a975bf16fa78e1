//! Preload Worker Task
//!
//! Background task that turns queued cache hits into pending preload marks.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{Clock, EntryStore, PendingPreloads, PreloadJob, PreloadStrategy};

/// Spawns the worker that drains the preload queue.
///
/// For each [`PreloadJob::Hit`], the strategy's candidates that are neither
/// cached nor already pending are marked with the current time. The task exits once all
/// senders are dropped and the queue is empty, so dropping the sender drains
/// whatever was queued before shutdown.
///
/// # Arguments
/// * `jobs` - Receiving half of the bounded preload queue
/// * `strategy` - Predicts candidate keys from a hit
/// * `store` - Entry store consulted for already-cached candidates
/// * `pending` - Shared set receiving the marks
/// * `clock` - Source of the mark timestamps
pub fn spawn_preload_worker(
    mut jobs: mpsc::Receiver<PreloadJob>,
    strategy: Arc<dyn PreloadStrategy>,
    store: Arc<EntryStore>,
    pending: Arc<PendingPreloads>,
    clock: Arc<dyn Clock>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting preload worker");

        while let Some(job) = jobs.recv().await {
            match job {
                PreloadJob::Hit { key, category } => {
                    let candidates = strategy.candidates(&key, category);
                    let mut marked = 0usize;
                    for candidate in candidates {
                        if pending.is_pending(category, &candidate)
                            || store.contains(&candidate, category).await
                        {
                            continue;
                        }
                        if pending.mark(category, candidate, clock.now()) {
                            marked += 1;
                        }
                    }

                    if marked > 0 {
                        debug!(%category, key, marked, "preload candidates marked");
                    }
                }
                PreloadJob::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }

        info!("Preload worker stopped");
    })
}
