use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::errors::{Error, Result};
use crate::options::WriteConcern;
use crate::storage::disk::DiskStream;
use crate::storage::pager::PageManager;
use crate::storage::wal::Wal;

const DEFAULT_INTERVAL: Duration = Duration::from_millis(50);

struct FlushState {
    /// Highest batch number any caller has requested.
    queued: u64,
    /// Highest batch number the worker has made durable.
    done: u64,
    /// Batch number the last error applies to, with its message.
    error: Option<(u64, String)>,
    shutdown: bool,
}

struct FlushShared {
    state: Mutex<FlushState>,
    cond: Condvar,
    wal: Arc<Wal>,
}

/// Coalesces journal fsyncs: every caller that joins while a batch is queued
/// is released by the single fsync that covers its appends. `Synced` requests
/// run inline and include the data file.
pub struct FlushScheduler {
    shared: Arc<FlushShared>,
    pager: Arc<PageManager>,
    disk: Arc<DiskStream>,
    sync_lock: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FlushScheduler {
    pub fn start(
        wal: Arc<Wal>,
        pager: Arc<PageManager>,
        disk: Arc<DiskStream>,
        interval: Option<Duration>,
    ) -> Self {
        let shared = Arc::new(FlushShared {
            state: Mutex::new(FlushState { queued: 0, done: 0, error: None, shutdown: false }),
            cond: Condvar::new(),
            wal,
        });
        let worker_shared = Arc::clone(&shared);
        let interval = interval.unwrap_or(DEFAULT_INTERVAL);
        let handle = std::thread::Builder::new()
            .name("tinydb-flush".into())
            .spawn(move || Self::worker_loop(&worker_shared, interval))
            .expect("spawn flush worker");
        Self {
            shared,
            pager,
            disk,
            sync_lock: Mutex::new(()),
            worker: Mutex::new(Some(handle)),
        }
    }

    fn worker_loop(shared: &FlushShared, interval: Duration) {
        loop {
            let batch = {
                let mut state = shared.state.lock();
                while state.queued == state.done && !state.shutdown {
                    shared.cond.wait_for(&mut state, interval);
                    if state.shutdown {
                        break;
                    }
                }
                if state.shutdown && state.queued == state.done {
                    return;
                }
                state.queued
            };
            let outcome = shared.wal.flush();
            let mut state = shared.state.lock();
            if let Err(e) = outcome {
                log::error!("background journal fsync failed: {e}");
                state.error = Some((batch, e.to_string()));
            }
            state.done = batch;
            shared.cond.notify_all();
        }
    }

    /// Block until the WAL appends made before this call are durable.
    fn ensure_journaled(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(Error::Disposed);
        }
        state.queued += 1;
        let my_batch = state.queued;
        self.shared.cond.notify_all();
        while state.done < my_batch {
            if state.shutdown {
                return Err(Error::Disposed);
            }
            self.shared.cond.wait(&mut state);
        }
        if let Some((batch, msg)) = &state.error
            && *batch >= my_batch
        {
            let msg = msg.clone();
            state.error = None;
            return Err(Error::Io(std::io::Error::other(msg)));
        }
        Ok(())
    }

    /// Make prior writes durable per `concern`. The `Synced` path runs the
    /// full checkpoint sequence: journal fsync, dirty page flush, data-file
    /// fsync, journal truncate.
    pub fn ensure_durability(&self, concern: WriteConcern) -> Result<()> {
        match concern {
            WriteConcern::None => Ok(()),
            WriteConcern::Journaled => self.ensure_journaled(),
            WriteConcern::Synced => {
                let _guard = self.sync_lock.lock();
                self.shared.wal.flush()?;
                self.pager.flush_dirty()?;
                self.disk.flush(true)?;
                // Truncate only after the data file is durable.
                self.shared.wal.truncate()?;
                Ok(())
            }
        }
    }

    pub async fn ensure_durability_async(self: &Arc<Self>, concern: WriteConcern) -> Result<()> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || this.ensure_durability(concern))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))?
    }

    /// Stop the worker. Pending waiters are woken with `Disposed`.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.cond.notify_all();
        }
        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
