//! Background TTL sweep: a dedicated thread that wakes every interval and
//! purges expired entries from all pools.
//!
//! The thread blocks on a crossbeam stop channel with a timeout, so dropping
//! the [`CacheSweeper`] wakes it immediately and joins it.

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use super::ResultCache;

/// Owns the sweep thread. Stops and joins it on drop.
#[derive(Debug)]
pub struct CacheSweeper {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl CacheSweeper {
    /// Start sweeping `cache` every `interval`.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to spawn the thread.
    pub fn spawn(cache: Arc<ResultCache>, interval: Duration) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let handle = thread::Builder::new()
            .name("quarry-cache-sweep".to_string())
            .spawn(move || run(&cache, &stop_rx, interval))?;

        Ok(Self {
            stop: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stop the sweep thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        // Dropping the sender disconnects the channel and wakes the thread.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("cache sweep thread panicked");
            }
        }
    }
}

impl Drop for CacheSweeper {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn run(cache: &ResultCache, stop: &Receiver<()>, interval: Duration) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => {
                let report = cache.purge_expired();
                if report.total() > 0 {
                    debug!(
                        query = report.query,
                        document = report.document,
                        embedding = report.embedding,
                        metadata = report.metadata,
                        "cache sweep purged expired entries"
                    );
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
