//! voxbridged - the transcription daemon.
//!
//! Opens the job store, starts the single transcription worker and the
//! pending-queue watcher, then idles until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use voxbridge::controller::{AppController, JobRequest};
use voxbridge::engine::ModelBackend;
use voxbridge::history::HistoryManager;
use voxbridge::sink::{platform_notifier, SystemClipboard};
use voxbridge::store::JobStore;
use voxbridge::watcher::{InFlight, JobWatcher, WatcherHandle};
use voxbridge::{Config, Result};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    if let Err(e) = run() {
        error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = load_configuration()?;
    info!(
        "Starting voxbridged (model '{}', queue at {})",
        config.model,
        config.resolved_queue_root().display()
    );

    let store = Arc::new(JobStore::open(&config.resolved_queue_root())?);

    let history = match HistoryManager::open(&config.resolved_history_dir(), config.history_entries)
    {
        Ok(history) => Some(history),
        Err(e) => {
            warn!("History disabled: {}", e);
            None
        }
    };

    let shutdown = Arc::new(AtomicBool::new(false));
    let in_flight = InFlight::new();

    let controller = Arc::new(AppController::new(
        make_backend(&config),
        Arc::clone(&store),
        in_flight.clone(),
        Box::new(SystemClipboard),
        platform_notifier(),
        history,
        config.language.clone(),
    ));

    let watcher = JobWatcher::new(Arc::clone(&store), in_flight, Arc::clone(&shutdown))
        .with_timing(
            Duration::from_millis(config.debounce_ms),
            Duration::from_secs(config.rescan_secs),
        );

    let dispatch_store = Arc::clone(&store);
    let dispatch_controller = Arc::clone(&controller);
    let watcher_handle = WatcherHandle::spawn(watcher, move |job| {
        let job_dir = dispatch_store.pending_job_dir(&job.id);
        let request = JobRequest::from_store(&job, &job_dir);
        if let Err(e) = dispatch_controller.submit(request) {
            error!("Failed to enqueue job '{}': {}", job.id, e);
        }
    });

    let signal_flag = Arc::clone(&shutdown);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Shutdown signal received");
        signal_flag.store(true, Ordering::Relaxed);
    }) {
        warn!("Failed to install signal handler: {}", e);
    }

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }

    watcher_handle.stop();
    controller.shutdown();
    if let Ok(controller) = Arc::try_unwrap(controller) {
        controller.wait();
    }
    info!("voxbridged stopped");
    Ok(())
}

fn load_configuration() -> Result<Config> {
    let path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(voxbridge::default_config_path);

    let config = match path {
        Some(path) => voxbridge::load_config(&path)?,
        None => Config::default(),
    };
    Ok(config)
}

#[cfg(feature = "whisper")]
fn make_backend(config: &Config) -> Box<dyn ModelBackend> {
    Box::new(voxbridge::WhisperBackend::new(config.resolved_model_dir()))
}

/// Placeholder backend for builds without the `whisper` feature: every job
/// fails with a clear message instead of the daemon refusing to start, so
/// the queue plumbing stays usable end to end.
#[cfg(not(feature = "whisper"))]
fn make_backend(_config: &Config) -> Box<dyn ModelBackend> {
    use voxbridge::error::EngineError;
    use voxbridge::job::ModelKind;

    struct DisabledBackend;

    impl ModelBackend for DisabledBackend {
        fn load(
            &self,
            model: ModelKind,
        ) -> std::result::Result<Box<dyn voxbridge::engine::LoadedModel>, EngineError> {
            Err(EngineError::ModelLoad {
                model: model.to_string(),
                reason: "transcription support not compiled in (enable the 'whisper' feature)"
                    .to_string(),
            })
        }
    }

    warn!("Built without the 'whisper' feature; jobs will be rejected");
    Box::new(DisabledBackend)
}
