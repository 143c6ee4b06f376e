use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VoxbridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Controller error: {0}")]
    Controller(#[from] ControllerError),

    #[error("History error: {0}")]
    History(#[from] HistoryError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to copy '{from}' into job directory: {source}")]
    CopyPayload {
        from: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Job '{0}' not found in pending area")]
    JobNotFound(String),

    #[error("Invalid manifest for job '{id}': {reason}")]
    InvalidManifest { id: String, reason: String },
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("Failed to load model '{model}': {reason}")]
    ModelLoad { model: String, reason: String },

    #[error("Transcription failed for '{file}': {reason}")]
    Transcription { file: String, reason: String },

    #[error("No transcribable audio files in batch")]
    NoTranscribableFiles,
}

#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {0}")]
    Init(String),

    #[error("Watch error: {0}")]
    Watch(String),
}

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Job queue is closed")]
    QueueClosed,
}

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("Failed to create history directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write history file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize history: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, VoxbridgeError>;
