//! Application controller: a single worker thread draining a FIFO queue of
//! transcription requests.
//!
//! One worker by design. Model inference saturates the machine, so queued
//! jobs run strictly one at a time in submission order; the queue itself is
//! unbounded because producers are humans sharing files, not firehoses.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::{ModelBackend, TranscriptionEngine};
use crate::error::ControllerError;
use crate::events::{AppEvent, AppState, EventBroadcaster};
use crate::history::{HistoryManager, TranscriptionRecord};
use crate::job::{Job, JobOptions, JobResult};
use crate::sink::{self, ClipboardSink, NotificationSink};
use crate::store::JobStore;
use crate::watcher::InFlight;

/// Where a request came from, which decides the cleanup it needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOrigin {
    /// Submitted in-process (file picker, tests). No queue directory exists.
    Direct,
    /// Claimed from the filesystem queue; needs a result file, pending
    /// cleanup and an in-flight release when done.
    Store,
}

/// A unit of work for the worker thread.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub id: String,
    pub files: Vec<PathBuf>,
    pub file_names: Vec<String>,
    pub options: JobOptions,
    pub origin: JobOrigin,
}

impl JobRequest {
    /// Request for files already on local disk, outside the queue.
    pub fn direct(files: Vec<PathBuf>, options: JobOptions) -> Self {
        let file_names = files
            .iter()
            .map(|f| {
                f.file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| f.display().to_string())
            })
            .collect();
        Self {
            id: Uuid::new_v4().to_string(),
            files,
            file_names,
            options,
            origin: JobOrigin::Direct,
        }
    }

    /// Request for a claimed queue job, with paths resolved against its
    /// pending directory.
    pub fn from_store(job: &Job, job_dir: &Path) -> Self {
        Self {
            id: job.id.clone(),
            files: job.resolved_files(job_dir),
            file_names: job.file_names(),
            options: job.options.clone(),
            origin: JobOrigin::Store,
        }
    }
}

/// Everything the worker thread owns besides the engine.
struct WorkerContext {
    store: Arc<JobStore>,
    in_flight: InFlight,
    clipboard: Box<dyn ClipboardSink>,
    notifier: Box<dyn NotificationSink>,
    history: Option<HistoryManager>,
    default_language: Option<String>,
    state: Arc<Mutex<AppState>>,
    events: EventBroadcaster,
}

/// Owns the request queue and the worker thread.
pub struct AppController {
    sender: Sender<JobRequest>,
    worker: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    state: Arc<Mutex<AppState>>,
    events: EventBroadcaster,
}

impl AppController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Box<dyn ModelBackend>,
        store: Arc<JobStore>,
        in_flight: InFlight,
        clipboard: Box<dyn ClipboardSink>,
        notifier: Box<dyn NotificationSink>,
        history: Option<HistoryManager>,
        default_language: Option<String>,
    ) -> Self {
        let (sender, receiver) = unbounded::<JobRequest>();
        let shutdown = Arc::new(AtomicBool::new(false));
        let state = Arc::new(Mutex::new(AppState::Idle));
        let events = EventBroadcaster::default();

        let ctx = WorkerContext {
            store,
            in_flight,
            clipboard,
            notifier,
            history,
            default_language,
            state: Arc::clone(&state),
            events: events.clone(),
        };
        let shutdown_flag = Arc::clone(&shutdown);
        let worker = thread::Builder::new()
            .name("transcription-worker".to_string())
            .spawn(move || run_worker(backend, receiver, ctx, shutdown_flag))
            .ok();

        Self {
            sender,
            worker,
            shutdown,
            state,
            events,
        }
    }

    /// Enqueues a request. FIFO; returns immediately.
    pub fn submit(&self, request: JobRequest) -> Result<(), ControllerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(ControllerError::QueueClosed);
        }
        self.sender
            .send(request)
            .map_err(|_| ControllerError::QueueClosed)
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> AppState {
        self.state
            .lock()
            .map(|s| s.clone())
            .unwrap_or(AppState::Idle)
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<AppEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> EventBroadcaster {
        self.events.clone()
    }

    /// Signals the worker to stop after the job it is currently running.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Stops the worker and joins it. Queued but unstarted requests are
    /// dropped; their pending directories survive for the next run.
    pub fn wait(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for AppController {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn run_worker(
    backend: Box<dyn ModelBackend>,
    receiver: Receiver<JobRequest>,
    mut ctx: WorkerContext,
    shutdown: Arc<AtomicBool>,
) {
    // The engine (and the model cache inside it) lives and dies with this
    // thread; no other context ever touches it.
    let mut engine = TranscriptionEngine::new(backend);
    info!("Transcription worker started");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Transcription worker shutting down...");
            break;
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(request) => {
                process_job(&mut engine, &mut ctx, &request);
                if receiver.is_empty() {
                    set_state(&ctx, AppState::Idle);
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                info!("Request queue closed, worker exiting");
                break;
            }
        }
    }
}

fn set_state(ctx: &WorkerContext, new_state: AppState) {
    if let Ok(mut state) = ctx.state.lock() {
        if *state == new_state {
            return;
        }
        *state = new_state.clone();
    }
    ctx.events.send(AppEvent::StateChanged { state: new_state });
}

fn process_job(engine: &mut TranscriptionEngine, ctx: &mut WorkerContext, request: &JobRequest) {
    let total = request.files.len();
    info!(
        "Processing job '{}' ({} file(s), model '{}')",
        request.id, total, request.options.model
    );

    set_state(
        ctx,
        AppState::Transcribing {
            job_id: request.id.clone(),
            completed: 0,
            total,
        },
    );
    ctx.events.send(AppEvent::JobStarted {
        job_id: request.id.clone(),
        files: request.file_names.clone(),
    });

    let language = request
        .options
        .language
        .clone()
        .or_else(|| ctx.default_language.clone());

    let started = Instant::now();
    let outcome = engine.transcribe_batch(
        &request.files,
        request.options.model,
        language.as_deref(),
        |completed, total| {
            if let Ok(mut state) = ctx.state.lock() {
                *state = AppState::Transcribing {
                    job_id: request.id.clone(),
                    completed,
                    total,
                };
            }
            ctx.events.send(AppEvent::Progress {
                job_id: request.id.clone(),
                completed,
                total,
            });
        },
    );
    let duration = started.elapsed().as_secs_f64();

    let title = sink::batch_title(&request.file_names);

    let result = match outcome {
        Ok(batch) => {
            // Clipboard only gets non-empty text; silent audio must not
            // clobber whatever the user has there.
            if batch.text.is_empty() {
                debug!("Job '{}' produced no text, leaving clipboard untouched", request.id);
            } else if !ctx.clipboard.set_text(&batch.text) {
                warn!("Transcription for job '{}' did not reach the clipboard", request.id);
            }

            if let Some(summary) = batch.failure_summary() {
                ctx.notifier.notify(&title, &sink::partial_message(&summary), false);
                JobResult::success(&request.id, batch.text.clone(), duration, request.options.model)
                    .with_partial_failures(summary)
            } else {
                ctx.notifier
                    .notify(&title, &sink::success_message(batch.total), false);
                JobResult::success(&request.id, batch.text.clone(), duration, request.options.model)
            }
        }
        Err(e) => {
            warn!("Job '{}' failed: {}", request.id, e);
            ctx.notifier
                .notify(&title, &sink::error_message(&e.to_string()), true);
            JobResult::failure(&request.id, e.to_string(), duration, request.options.model)
        }
    };

    if result.success {
        if let (Some(history), Some(text)) = (ctx.history.as_mut(), result.transcription.as_ref()) {
            let record = TranscriptionRecord::create(
                &request.id,
                text,
                request.file_names.clone(),
                request.options.model,
            );
            if let Err(e) = history.record(record) {
                warn!("Failed to record history for job '{}': {}", request.id, e);
            }
        }
    }

    ctx.events.send(AppEvent::JobFinished {
        job_id: request.id.clone(),
        success: result.success,
        partial: result.success && result.error.is_some(),
        error: result.error.clone(),
    });

    if request.origin == JobOrigin::Store {
        // Result first, cleanup second: a crash in between leaves a
        // completed job with a stale pending directory, which the watcher
        // sweeps up on the next scan.
        if let Err(e) = ctx.store.write_result(&result) {
            error!("Failed to write result for job '{}': {}", request.id, e);
        }
        ctx.store.delete_pending_job(&request.id);
        ctx.in_flight.release(&request.id);
    }

    debug!(
        "Job '{}' done in {:.2}s (success: {})",
        request.id, duration, result.success
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{LoadedModel, ModelBackend};
    use crate::error::EngineError;
    use crate::job::ModelKind;
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    struct EchoModel;

    impl LoadedModel for EchoModel {
        fn transcribe(
            &mut self,
            audio: &Path,
            _language: Option<&str>,
        ) -> Result<String, EngineError> {
            let name = audio.file_name().unwrap().to_string_lossy().to_string();
            if name.contains("corrupt") {
                return Err(EngineError::Transcription {
                    file: name,
                    reason: "bad stream".to_string(),
                });
            }
            if name.contains("silent") {
                return Ok(String::new());
            }
            Ok(format!("text of {}", name))
        }
    }

    struct EchoBackend {
        loads: Arc<AtomicUsize>,
    }

    impl ModelBackend for EchoBackend {
        fn load(
            &self,
            _model: ModelKind,
        ) -> Result<Box<dyn LoadedModel>, EngineError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoModel))
        }
    }

    #[derive(Clone, Default)]
    struct FakeClipboard {
        contents: Arc<Mutex<Vec<String>>>,
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
    struct RecordingNotifier {
        calls: Arc<Mutex<Vec<(String, bool)>>>,
    }

    impl NotificationSink for RecordingNotifier {
        fn notify(&self, _title: &str, body: &str, is_error: bool) {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((body.to_string(), is_error));
            }
        }
    }

    struct Harness {
        _dir: TempDir,
        store: Arc<JobStore>,
        controller: AppController,
        clipboard: FakeClipboard,
        notifier: RecordingNotifier,
        loads: Arc<AtomicUsize>,
    }

    fn harness() -> Harness {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JobStore::open(dir.path()).unwrap());
        let clipboard = FakeClipboard::default();
        let notifier = RecordingNotifier::default();
        let loads = Arc::new(AtomicUsize::new(0));

        let controller = AppController::new(
            Box::new(EchoBackend {
                loads: Arc::clone(&loads),
            }),
            Arc::clone(&store),
            InFlight::new(),
            Box::new(clipboard.clone()),
            Box::new(notifier.clone()),
            None,
            None,
        );

        Harness {
            _dir: dir,
            store,
            controller,
            clipboard,
            notifier,
            loads,
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out waiting for condition");
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn audio_file(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"fake audio").unwrap();
        path
    }

    #[test]
    fn test_direct_job_copies_to_clipboard_and_notifies() {
        let h = harness();
        let file = audio_file(h._dir.path(), "voice.wav");

        let request = JobRequest::direct(vec![file], JobOptions::default());
        h.controller.submit(request).unwrap();

        let notifier = h.notifier.clone();
        wait_for(|| !notifier.calls.lock().unwrap().is_empty());
        assert_eq!(
            h.clipboard.contents.lock().unwrap()[0],
            "text of voice.wav"
        );

        let calls = h.notifier.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].0.contains("Transcription complete"));
        assert!(!calls[0].1);
    }

    #[test]
    fn test_store_job_writes_result_and_cleans_pending() {
        let h = harness();
        let file = audio_file(h._dir.path(), "note.m4a");
        let id = h
            .store
            .create_pending_job(&[file], JobOptions::default(), "test")
            .unwrap();

        let job = h.store.claim_job(&id).unwrap();
        let request = JobRequest::from_store(&job, &h.store.pending_job_dir(&id));
        h.controller.submit(request).unwrap();

        let store = Arc::clone(&h.store);
        let id2 = id.clone();
        wait_for(move || store.read_result(&id2).is_ok());

        let result = h.store.read_result(&id).unwrap();
        assert!(result.success);
        assert_eq!(result.transcription.as_deref(), Some("text of note.m4a"));
        wait_for(|| !h.store.pending_job_dir(&id).exists());
    }

    #[test]
    fn test_empty_transcription_leaves_clipboard_untouched() {
        let h = harness();
        let file = audio_file(h._dir.path(), "silent.wav");

        h.controller
            .submit(JobRequest::direct(vec![file], JobOptions::default()))
            .unwrap();

        let notifier = h.notifier.clone();
        wait_for(|| !notifier.calls.lock().unwrap().is_empty());
        let calls = h.notifier.calls.lock().unwrap();
        assert!(!calls[0].1);
        assert!(h.clipboard.contents.lock().unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_batch_fails_with_error_notice() {
        let h = harness();
        let file = audio_file(h._dir.path(), "notes.txt");

        h.controller
            .submit(JobRequest::direct(vec![file], JobOptions::default()))
            .unwrap();

        let notifier = h.notifier.clone();
        wait_for(|| !notifier.calls.lock().unwrap().is_empty());
        let calls = h.notifier.calls.lock().unwrap();
        assert!(calls[0].0.starts_with("Error:"));
        assert!(calls[0].1);
        assert!(h.clipboard.contents.lock().unwrap().is_empty());
    }

    #[test]
    fn test_partial_failure_still_copies_and_flags_notice() {
        let h = harness();
        let good = audio_file(h._dir.path(), "good.wav");
        let bad = audio_file(h._dir.path(), "corrupt.wav");

        h.controller
            .submit(JobRequest::direct(vec![good, bad], JobOptions::default()))
            .unwrap();

        let clipboard = h.clipboard.clone();
        wait_for(|| !clipboard.contents.lock().unwrap().is_empty());
        let copied = h.clipboard.contents.lock().unwrap()[0].clone();
        assert!(copied.contains("text of good.wav"));

        let notifier = h.notifier.clone();
        wait_for(|| !notifier.calls.lock().unwrap().is_empty());
        let calls = h.notifier.calls.lock().unwrap();
        assert!(calls[0].0.contains("1 of 2 files failed"));
        assert!(!calls[0].1);
    }

    #[test]
    fn test_jobs_run_fifo_with_one_model_load() {
        let h = harness();
        let mut rx = h.controller.subscribe();

        for name in ["a.wav", "b.wav", "c.wav"] {
            let file = audio_file(h._dir.path(), name);
            h.controller
                .submit(JobRequest::direct(vec![file], JobOptions::default()))
                .unwrap();
        }

        let clipboard = h.clipboard.clone();
        wait_for(|| clipboard.contents.lock().unwrap().len() == 3);
        assert_eq!(
            *h.clipboard.contents.lock().unwrap(),
            vec![
                "text of a.wav".to_string(),
                "text of b.wav".to_string(),
                "text of c.wav".to_string()
            ]
        );
        assert_eq!(h.loads.load(Ordering::SeqCst), 1);

        // Jobs never overlap: every start is preceded by the previous finish.
        let mut open_jobs = 0usize;
        while let Ok(event) = rx.try_recv() {
            match event {
                AppEvent::JobStarted { .. } => {
                    open_jobs += 1;
                    assert_eq!(open_jobs, 1);
                }
                AppEvent::JobFinished { .. } => {
                    open_jobs -= 1;
                }
                _ => {}
            }
        }
    }

    #[test]
    fn test_state_returns_to_idle_when_queue_drains() {
        let h = harness();
        let file = audio_file(h._dir.path(), "only.wav");
        h.controller
            .submit(JobRequest::direct(vec![file], JobOptions::default()))
            .unwrap();

        let controller = &h.controller;
        wait_for(|| controller.state() == AppState::Idle && !h.clipboard.contents.lock().unwrap().is_empty());
    }

    #[test]
    fn test_submit_after_shutdown_is_rejected() {
        let h = harness();
        h.controller.shutdown();
        let file = audio_file(h._dir.path(), "late.wav");
        let err = h
            .controller
            .submit(JobRequest::direct(vec![file], JobOptions::default()))
            .unwrap_err();
        assert!(matches!(err, ControllerError::QueueClosed));
    }

    #[test]
    fn test_history_records_successful_jobs() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(JobStore::open(dir.path()).unwrap());
        let clipboard = FakeClipboard::default();
        let history_dir = dir.path().join("history");
        let history = HistoryManager::open(&history_dir, 10).unwrap();

        let controller = AppController::new(
            Box::new(EchoBackend {
                loads: Arc::new(AtomicUsize::new(0)),
            }),
            store,
            InFlight::new(),
            Box::new(clipboard.clone()),
            Box::new(RecordingNotifier::default()),
            Some(history),
            None,
        );

        let file = audio_file(dir.path(), "kept.wav");
        controller
            .submit(JobRequest::direct(vec![file], JobOptions::default()))
            .unwrap();
        wait_for(|| !clipboard.contents.lock().unwrap().is_empty());
        controller.wait();

        let history = HistoryManager::open(&history_dir, 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.get_all()[0].text, "text of kept.wav");
        assert_eq!(history.get_all()[0].preview, "text of kept.wav");
    }
}
