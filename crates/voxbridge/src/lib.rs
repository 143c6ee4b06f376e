//! voxbridge - background audio transcription with a filesystem job queue.
//!
//! Producers (a share extension, a file picker, anything that can write
//! files) enqueue batches of audio under a spool directory; a long-running
//! daemon claims committed jobs, transcribes them with a cached Whisper
//! model, writes a durable result record, and fans the text out to the
//! clipboard and a notification.
//!
//! The queue protocol is plain files: a job directory under `pending/` with
//! its audio payloads, committed by writing `manifest.json` last; the
//! matching `completed/<id>/result.json` is the job's terminal record.

pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod job;
pub mod sink;
pub mod store;
pub mod watcher;

pub use config::{default_config_path, load_config, Config};
pub use controller::{AppController, JobOrigin, JobRequest};
pub use engine::{
    is_supported_format, BatchTranscription, LoadedModel, ModelBackend, TranscriptionEngine,
    SUPPORTED_EXTENSIONS,
};
pub use error::{
    ConfigError, ControllerError, EngineError, HistoryError, Result, StoreError, VoxbridgeError,
    WatchError,
};
pub use events::{AppEvent, AppState, EventBroadcaster};
pub use history::{HistoryManager, TranscriptionRecord};
pub use job::{Job, JobFile, JobOptions, JobResult, ModelKind};
pub use sink::{ClipboardSink, NotificationSink};
pub use store::JobStore;
pub use watcher::{InFlight, JobWatcher, WatcherHandle};

#[cfg(feature = "whisper")]
pub use engine::WhisperBackend;
