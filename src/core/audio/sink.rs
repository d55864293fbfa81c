//! Non-blocking playback through a dedicated worker.
//!
//! The inbound dispatch path must keep draining the socket promptly, so
//! [`AudioSink::write`] only enqueues. A blocking worker owns the playback
//! device and renders buffers strictly in submission order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::device::{AudioFormat, PlaybackDevice};
use crate::errors::{ClientError, ClientResult};

/// Consecutive write failures tolerated before playback gives up.
pub const MAX_PLAYBACK_FAILURES: u32 = 3;

/// Playback counters, readable while the worker runs.
#[derive(Debug, Default)]
pub struct PlaybackStats {
    /// Buffers handed to [`AudioSink::write`]
    pub buffers_submitted: AtomicU64,
    /// Bytes the device accepted
    pub bytes_played: AtomicU64,
    /// Device write failures
    pub write_failures: AtomicU64,
}

/// Handle to the playback worker.
pub struct AudioSink {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    worker: Option<JoinHandle<()>>,
    discard: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    stats: Arc<PlaybackStats>,
}

impl AudioSink {
    /// Open the playback device and start the worker.
    ///
    /// `fatal` is cancelled if the device keeps failing, which ends the
    /// session.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Device`] if the device cannot be opened.
    pub fn spawn(
        mut device: Box<dyn PlaybackDevice>,
        format: AudioFormat,
        fatal: CancellationToken,
    ) -> ClientResult<Self> {
        device.open(&format)?;
        info!(
            "audio playback started: {}Hz, {} channel(s)",
            format.sample_rate, format.channels
        );

        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        let discard = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));
        let stats = Arc::new(PlaybackStats::default());

        let worker = tokio::task::spawn_blocking({
            let discard = Arc::clone(&discard);
            let failed = Arc::clone(&failed);
            let stats = Arc::clone(&stats);
            move || playback_worker(device, rx, discard, failed, stats, fatal)
        });

        Ok(Self {
            tx: Some(tx),
            worker: Some(worker),
            discard,
            failed,
            stats,
        })
    }

    /// Queue a buffer for playback. Never blocks.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Device`] once the worker has stopped.
    pub fn write(&self, bytes: Bytes) -> ClientResult<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| ClientError::Device("playback is shut down".to_string()))?;
        tx.send(bytes)
            .map_err(|_| ClientError::Device("playback worker stopped".to_string()))?;
        self.stats.buffers_submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Whether the worker gave up after repeated device failures.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    /// Shared playback counters.
    pub fn stats(&self) -> Arc<PlaybackStats> {
        Arc::clone(&self.stats)
    }

    /// Stop accepting buffers, wait for the worker and release the device.
    ///
    /// With `drain` the queued audio is played out first; without it the
    /// queue is dropped.
    pub async fn shutdown(&mut self, drain: bool) {
        if !drain {
            self.discard.store(true, Ordering::SeqCst);
        }
        self.tx.take();
        if let Some(worker) = self.worker.take()
            && let Err(e) = worker.await
        {
            error!("playback worker panicked: {e}");
        }
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        // Without an explicit shutdown the worker still exits once the
        // channel closes, and closes the device itself.
        self.discard.store(true, Ordering::SeqCst);
        self.tx.take();
    }
}

fn playback_worker(
    mut device: Box<dyn PlaybackDevice>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    discard: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    stats: Arc<PlaybackStats>,
    fatal: CancellationToken,
) {
    let mut consecutive_failures = 0u32;

    while let Some(buffer) = rx.blocking_recv() {
        if discard.load(Ordering::SeqCst) {
            continue;
        }
        match device.write(&buffer) {
            Ok(()) => {
                consecutive_failures = 0;
                stats
                    .bytes_played
                    .fetch_add(buffer.len() as u64, Ordering::Relaxed);
            }
            Err(e) => {
                consecutive_failures += 1;
                stats.write_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "playback write failed ({consecutive_failures}/{MAX_PLAYBACK_FAILURES}): {e}"
                );
                if consecutive_failures >= MAX_PLAYBACK_FAILURES {
                    error!("playback device keeps failing, ending session");
                    failed.store(true, Ordering::SeqCst);
                    fatal.cancel();
                    break;
                }
            }
        }
    }

    rx.close();
    device.close();
    debug!("playback worker exited");
}
