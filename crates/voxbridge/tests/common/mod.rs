//! Shared harness for the end-to-end queue tests: a real store and watcher
//! wired to a mock transcription backend.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tempfile::TempDir;

use voxbridge::controller::{AppController, JobRequest};
use voxbridge::engine::{LoadedModel, ModelBackend};
use voxbridge::error::EngineError;
use voxbridge::job::ModelKind;
use voxbridge::sink::{ClipboardSink, NotificationSink};
use voxbridge::store::JobStore;
use voxbridge::watcher::{InFlight, JobWatcher, WatcherHandle};

pub struct MockModel {
    kind: ModelKind,
    delay: Duration,
}

impl LoadedModel for MockModel {
    fn transcribe(
        &mut self,
        audio: &Path,
        _language: Option<&str>,
    ) -> Result<String, EngineError> {
        let name = audio
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.contains("corrupt") {
            return Err(EngineError::Transcription {
                file: name,
                reason: "unreadable stream".to_string(),
            });
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        Ok(format!("[{}] {}", self.kind, name))
    }
}

pub struct MockBackend {
    pub loads: Arc<AtomicUsize>,
    pub delay: Duration,
}

impl ModelBackend for MockBackend {
    fn load(&self, model: ModelKind) -> Result<Box<dyn LoadedModel>, EngineError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockModel {
            kind: model,
            delay: self.delay,
        }))
    }
}

#[derive(Clone, Default)]
pub struct FakeClipboard {
    pub contents: Arc<Mutex<Vec<String>>>,
}

impl ClipboardSink for FakeClipboard {
    fn set_text(&self, text: &str) -> bool {
        if let Ok(mut contents) = self.contents.lock() {
            contents.push(text.to_string());
        }
        true
    }
}

#[derive(Clone, Default)]
pub struct SilentNotifier;

impl NotificationSink for SilentNotifier {
    fn notify(&self, _title: &str, _body: &str, _is_error: bool) {}
}

/// A full consumer stack over a temp directory: store, watcher thread,
/// controller with a mock backend.
pub struct QueueHarness {
    pub dir: TempDir,
    pub store: Arc<JobStore>,
    pub controller: Arc<AppController>,
    pub clipboard: FakeClipboard,
    pub loads: Arc<AtomicUsize>,
    pub shutdown: Arc<AtomicBool>,
    watcher: Option<WatcherHandle>,
}

impl QueueHarness {
    pub fn start() -> Self {
        Self::start_with_delay(Duration::ZERO)
    }

    /// `delay` slows each mock transcription down, for tests that need to
    /// observe jobs queuing behind one another.
    pub fn start_with_delay(delay: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JobStore::open(dir.path()).unwrap());
        let clipboard = FakeClipboard::default();
        let loads = Arc::new(AtomicUsize::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));
        let in_flight = InFlight::new();

        let controller = Arc::new(AppController::new(
            Box::new(MockBackend {
                loads: Arc::clone(&loads),
                delay,
            }),
            Arc::clone(&store),
            in_flight.clone(),
            Box::new(clipboard.clone()),
            Box::new(SilentNotifier),
            None,
            None,
        ));

        let watcher = JobWatcher::new(Arc::clone(&store), in_flight, Arc::clone(&shutdown))
            .with_timing(Duration::from_millis(10), Duration::from_millis(200));
        let dispatch_store = Arc::clone(&store);
        let dispatch_controller = Arc::clone(&controller);
        let watcher = WatcherHandle::spawn(watcher, move |job| {
            let job_dir = dispatch_store.pending_job_dir(&job.id);
            let _ = dispatch_controller.submit(JobRequest::from_store(&job, &job_dir));
        });

        Self {
            dir,
            store,
            controller,
            clipboard,
            loads,
            shutdown,
            watcher: Some(watcher),
        }
    }

    /// Writes a fake audio file outside the queue, producer-side.
    pub fn audio_file(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, b"fake audio payload").unwrap();
        path
    }

    /// Blocks until the job has a result record.
    pub fn wait_for_result(&self, id: &str) -> voxbridge::job::JobResult {
        wait_until(|| self.store.read_result(id).ok())
    }

    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        self.controller.shutdown();
    }
}

/// Polls `probe` until it yields a value, with a 10s deadline.
pub fn wait_until<T>(probe: impl Fn() -> Option<T>) -> T {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(value) = probe() {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(10));
    }
}
