//! Pending-queue watcher: debounced filesystem events plus a periodic
//! rescan fallback, dispatching claimed jobs to a callback.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, Debouncer};

use crate::error::{StoreError, WatchError};
use crate::job::{Job, JobResult};
use crate::store::JobStore;

/// Default debounce window for filesystem events.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);
/// Default interval for the rescan fallback that catches events the
/// platform notifier missed.
pub const DEFAULT_RESCAN_INTERVAL: Duration = Duration::from_secs(5);

/// Set of job ids currently claimed by the watcher and not yet finished by
/// the worker. Shared between the watcher thread (insert) and the worker
/// thread (release), so a rescan never double-dispatches a job.
#[derive(Clone, Default)]
pub struct InFlight {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the id was already in flight.
    pub fn insert(&self, id: &str) -> bool {
        match self.inner.lock() {
            Ok(mut set) => set.insert(id.to_string()),
            Err(_) => false,
        }
    }

    pub fn release(&self, id: &str) {
        if let Ok(mut set) = self.inner.lock() {
            set.remove(id);
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .lock()
            .map(|set| set.contains(id))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|set| set.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Watches the store's pending directory and claims committed jobs.
///
/// Claim-before-dispatch plus the [`InFlight`] set make dispatch
/// exactly-once even though the same job becomes visible through both the
/// event path and the rescan fallback.
pub struct JobWatcher {
    store: Arc<JobStore>,
    in_flight: InFlight,
    shutdown: Arc<AtomicBool>,
    debounce: Duration,
    rescan_interval: Duration,
}

impl JobWatcher {
    pub fn new(store: Arc<JobStore>, in_flight: InFlight, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            store,
            in_flight,
            shutdown,
            debounce: DEFAULT_DEBOUNCE,
            rescan_interval: DEFAULT_RESCAN_INTERVAL,
        }
    }

    pub fn with_timing(mut self, debounce: Duration, rescan_interval: Duration) -> Self {
        self.debounce = debounce;
        self.rescan_interval = rescan_interval;
        self
    }

    /// Blocking watch loop. Scans once at startup (jobs enqueued while the
    /// daemon was down), then reacts to debounced events, with a periodic
    /// rescan as a safety net. Returns when the shutdown flag is set.
    pub fn watch<F>(&self, dispatch: F) -> Result<(), WatchError>
    where
        F: Fn(Job) + Send + 'static,
    {
        let pending_dir = self.store.pending_dir();

        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer: Debouncer<RecommendedWatcher> = new_debouncer(self.debounce, tx)
            .map_err(|e| WatchError::Init(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&pending_dir, RecursiveMode::Recursive)
            .map_err(|e| WatchError::Init(e.to_string()))?;

        info!("Watching pending queue: {}", pending_dir.display());

        // Jobs committed before the watcher started.
        self.scan_pending(&dispatch);
        let mut last_scan = Instant::now();

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                info!("Queue watcher shutting down...");
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    debug!("Received {} debounced event(s)", events.len());
                    self.scan_pending(&dispatch);
                    last_scan = Instant::now();
                }
                Ok(Err(e)) => {
                    warn!("Watch error: {}", e);
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    if last_scan.elapsed() >= self.rescan_interval {
                        self.scan_pending(&dispatch);
                        last_scan = Instant::now();
                    }
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    warn!("Watcher channel disconnected");
                    break;
                }
            }
        }

        Ok(())
    }

    /// One pass over the pending directory: claim every committed job that
    /// is not already in flight or completed, and hand it to `dispatch`.
    pub fn scan_pending<F>(&self, dispatch: &F)
    where
        F: Fn(Job),
    {
        let ids = self.store.list_pending_jobs();
        for id in ids {
            if self.in_flight.contains(&id) {
                continue;
            }
            if self.store.is_completed(&id) {
                // Leftover pending directory from an interrupted cleanup.
                debug!("Job '{}' already completed, removing leftovers", id);
                self.store.delete_pending_job(&id);
                continue;
            }

            match self.store.claim_job(&id) {
                Ok(job) => {
                    if !self.in_flight.insert(&id) {
                        continue;
                    }
                    info!("Claimed job '{}' ({} file(s))", id, job.files.len());
                    dispatch(job);
                }
                Err(StoreError::JobNotFound(_)) => {
                    // Raced with a concurrent cleanup; nothing to do.
                    debug!("Job '{}' vanished before claim", id);
                }
                Err(StoreError::InvalidManifest { id, reason }) => {
                    warn!("Rejecting job '{}': {}", id, reason);
                    let result = JobResult::failure(
                        &id,
                        format!("Invalid manifest: {}", reason),
                        0.0,
                        Default::default(),
                    );
                    if let Err(e) = self.store.write_result(&result) {
                        error!("Failed to record rejection for job '{}': {}", id, e);
                    }
                    self.store.delete_pending_job(&id);
                }
                Err(e) => {
                    warn!("Failed to claim job '{}': {}", id, e);
                }
            }
        }
    }
}

/// Handle to a watcher running on its own thread.
pub struct WatcherHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Spawns the watch loop on a dedicated thread.
    pub fn spawn<F>(watcher: JobWatcher, dispatch: F) -> Self
    where
        F: Fn(Job) + Send + 'static,
    {
        let shutdown = Arc::clone(&watcher.shutdown);
        let handle = thread::Builder::new()
            .name("queue-watcher".to_string())
            .spawn(move || {
                if let Err(e) = watcher.watch(dispatch) {
                    error!("Queue watcher failed: {}", e);
                }
            })
            .ok();

        Self {
            shutdown,
            handle,
        }
    }

    /// Signals shutdown and joins the watcher thread.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
