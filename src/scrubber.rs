//! Background scrubber — periodic classify/repair pass over every chunk.
//!
//! Drives the same classify/repair primitives the read path uses, instead
//! of a separate recovery codepath, on a plain timer thread rather than an
//! on-demand CLI invocation. Per spec §5 ("obtains the shared lock per
//! chunk, upgrading to exclusive only when actually repairing"), each chunk
//! is looked up and classified under its own brief shared lock, never a
//! clone of the whole table — a long-lived snapshot would let the scrubber
//! classify against state a concurrent delete has already superseded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, info};

use crate::chunk::{classify_replicas, repair_bad_replicas, ChunkId};
use crate::device::Device;
use crate::metadata::MetadataState;

/// Totals from one completed scrub pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScrubStats {
    pub chunks_examined: usize,
    pub corruptions_detected: usize,
    pub corruptions_repaired: usize,
    pub unrecoverable: usize,
}

/// Verdict for one chunk visited during a scrub pass.
enum ChunkOutcome {
    Clean,
    Repaired,
    Unrecoverable,
}

/// Look up and classify one chunk under a shared lock spanning the lookup
/// and device reads, then — only if repair is actually needed — briefly
/// upgrade to the exclusive lock for the repair write. Returns `None` if
/// the chunk was removed (e.g. by a concurrent delete) between the id
/// snapshot and this lookup; such a chunk is simply not this pass's to
/// scrub.
fn scrub_one(device: &dyn Device, data: &RwLock<MetadataState>, id: &ChunkId) -> Option<ChunkOutcome> {
    let (record, classify) = {
        let guard = data.read().unwrap();
        let record = guard.chunks.get(id).cloned()?;
        let classify = classify_replicas(device, &record);
        (record, classify)
    };

    let Some(authoritative) = classify.authoritative_stored_bytes else {
        return Some(ChunkOutcome::Unrecoverable);
    };
    if classify.bad_indices.is_empty() {
        return Some(ChunkOutcome::Clean);
    }

    let repaired = {
        let _guard = data.write().unwrap();
        repair_bad_replicas(device, &record, &authoritative, &classify.bad_indices)
    };
    Some(if repaired.is_empty() { ChunkOutcome::Clean } else { ChunkOutcome::Repaired })
}

/// Iterate every chunk behind `data`, classifying and repairing replicas.
///
/// With the `parallel` feature enabled, chunks are classified concurrently
/// across a Rayon pool, since each chunk only takes its own brief lock;
/// without it, the scan is a plain sequential loop. Either way the result
/// is identical.
pub fn run_scrub_pass(device: &dyn Device, data: &RwLock<MetadataState>) -> ScrubStats {
    let chunk_ids: Vec<ChunkId> = {
        let guard = data.read().unwrap();
        guard.chunks.chunks.keys().copied().collect()
    };

    #[cfg(feature = "parallel")]
    let outcomes: Vec<ChunkOutcome> = {
        use rayon::prelude::*;
        chunk_ids
            .par_iter()
            .filter_map(|id| scrub_one(device, data, id))
            .collect()
    };
    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<ChunkOutcome> = chunk_ids
        .iter()
        .filter_map(|id| scrub_one(device, data, id))
        .collect();

    let mut stats = ScrubStats {
        chunks_examined: chunk_ids.len(),
        ..Default::default()
    };
    for outcome in &outcomes {
        match outcome {
            ChunkOutcome::Clean => {}
            ChunkOutcome::Repaired => {
                stats.corruptions_detected += 1;
                stats.corruptions_repaired += 1;
            }
            ChunkOutcome::Unrecoverable => {
                stats.corruptions_detected += 1;
                stats.unrecoverable += 1;
            }
        }
    }

    debug!(
        chunks_examined = stats.chunks_examined,
        corruptions_detected = stats.corruptions_detected,
        corruptions_repaired = stats.corruptions_repaired,
        unrecoverable = stats.unrecoverable,
        "scrub pass complete"
    );
    stats
}

/// Handle to a running background scrubber thread.
pub struct ScrubberHandle {
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ScrubberHandle {
    /// Spawn a thread that calls `pass()` every `interval`, reporting each
    /// [`ScrubStats`] over `results`, until [`Self::stop`] is called or the
    /// handle is dropped.
    pub fn spawn<F>(interval: Duration, pass: F, results: mpsc::Sender<ScrubStats>) -> Self
    where
        F: Fn() -> ScrubStats + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_inner = Arc::clone(&stop);

        let join = std::thread::spawn(move || {
            info!(?interval, "scrubber started");
            while !stop_inner.load(Ordering::Relaxed) {
                std::thread::sleep(interval);
                if stop_inner.load(Ordering::Relaxed) {
                    break;
                }
                let stats = pass();
                if results.send(stats).is_err() {
                    break;
                }
            }
            info!("scrubber stopped");
        });

        Self {
            stop,
            join: Some(join),
        }
    }

    /// Signal the thread to stop and wait for it to exit.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ScrubberHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
