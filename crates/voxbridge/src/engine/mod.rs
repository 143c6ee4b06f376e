//! Transcription engine: format validation, model cache, batch execution.
//!
//! The model itself is behind the [`ModelBackend`] seam. The real backend
//! (whisper.cpp via `whisper-rs`) is compiled in with the `whisper` feature;
//! without it the engine still builds and every load reports a model failure,
//! which keeps the orchestration fully testable with mock backends.

#[cfg(feature = "whisper")]
mod whisper;

#[cfg(feature = "whisper")]
pub use whisper::WhisperBackend;

use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::EngineError;
use crate::job::ModelKind;

/// Fixed allow-list of recognized audio extensions: compressed voice
/// messages, compressed general audio, Apple container audio, uncompressed.
pub const SUPPORTED_EXTENSIONS: [&str; 4] = ["opus", "mp3", "m4a", "wav"];

/// Extension check against the allow-list, case-insensitive.
pub fn is_supported_format(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            SUPPORTED_EXTENSIONS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

/// A loaded, reusable model instance for one model size.
pub trait LoadedModel: Send {
    /// Transcribes a single audio file. `language` is a code like "pt",
    /// `None` for auto-detect.
    fn transcribe(&mut self, audio: &Path, language: Option<&str>)
        -> Result<String, EngineError>;
}

/// Loads models by size. Loading is expensive (seconds), which is why the
/// engine caches the result.
pub trait ModelBackend: Send {
    fn load(&self, model: ModelKind) -> Result<Box<dyn LoadedModel>, EngineError>;
}

/// Outcome of one batch. Per-file failures do not abort the batch; they are
/// aggregated here so the caller can surface a partial-failure summary.
#[derive(Debug)]
pub struct BatchTranscription {
    /// Concatenated text of the successful files, manifest order. When the
    /// batch has more than one file each piece is prefixed with its source
    /// filename.
    pub text: String,
    pub total: usize,
    pub failed: usize,
    /// `(file name, reason)` per failed file, batch order.
    pub failures: Vec<(String, String)>,
}

impl BatchTranscription {
    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }

    /// Human-readable summary of the per-file failures, used in result
    /// records and notifications.
    pub fn failure_summary(&self) -> Option<String> {
        if self.failures.is_empty() {
            return None;
        }
        let details: Vec<String> = self
            .failures
            .iter()
            .map(|(file, reason)| format!("{}: {}", file, reason))
            .collect();
        Some(format!(
            "{} of {} files failed ({})",
            self.failed,
            self.total,
            details.join("; ")
        ))
    }
}

struct CachedModel {
    kind: ModelKind,
    model: Box<dyn LoadedModel>,
}

/// Owns the model cache and executes batches. Lives entirely inside the
/// worker thread; exactly one context ever touches the cache, so it needs no
/// synchronization.
pub struct TranscriptionEngine {
    backend: Box<dyn ModelBackend>,
    cache: Option<CachedModel>,
}

impl TranscriptionEngine {
    pub fn new(backend: Box<dyn ModelBackend>) -> Self {
        Self {
            backend,
            cache: None,
        }
    }

    /// The model currently resident in the cache, if any.
    pub fn cached_model(&self) -> Option<ModelKind> {
        self.cache.as_ref().map(|c| c.kind)
    }

    /// Drops the resident model. Memory-pressure hook; only ever called
    /// between batches, never while a handle is in use.
    pub fn evict(&mut self) {
        if let Some(cached) = self.cache.take() {
            info!("Evicted model '{}' from cache", cached.kind);
        }
    }

    /// Returns the cached handle for `kind`, loading it first if a different
    /// model (or none) is resident. The previous handle is dropped only
    /// after the new one loaded successfully, so a failed switch leaves the
    /// old model usable.
    fn model_for(&mut self, kind: ModelKind) -> Result<&mut dyn LoadedModel, EngineError> {
        let hit = self.cache.as_ref().is_some_and(|c| c.kind == kind);
        if !hit {
            info!("Loading model '{}'", kind);
            let model = self.backend.load(kind)?;
            if let Some(old) = self.cache.replace(CachedModel { kind, model }) {
                debug!("Replaced cached model '{}'", old.kind);
            }
        } else {
            debug!("Reusing cached model '{}'", kind);
        }
        match self.cache.as_mut() {
            Some(cached) => Ok(cached.model.as_mut()),
            None => Err(EngineError::ModelLoad {
                model: kind.to_string(),
                reason: "model cache empty after load".to_string(),
            }),
        }
    }

    /// Transcribes `files` in order with one model load at most.
    ///
    /// Per-file failures (unsupported extension, corrupt audio) are recorded
    /// and skipped; the batch fails as a whole only when the model cannot be
    /// loaded or no file produced any text. `on_progress(completed, total)`
    /// fires synchronously at every file boundary — before file `i` starts
    /// with `(i, total)` and after it finishes with `(i + 1, total)` — so
    /// callers must not block inside it.
    pub fn transcribe_batch(
        &mut self,
        files: &[PathBuf],
        model: ModelKind,
        language: Option<&str>,
        mut on_progress: impl FnMut(usize, usize),
    ) -> Result<BatchTranscription, EngineError> {
        if !files.iter().any(|f| is_supported_format(f)) {
            return Err(EngineError::NoTranscribableFiles);
        }

        let handle = self.model_for(model)?;

        let total = files.len();
        let mut pieces: Vec<String> = Vec::new();
        let mut failures: Vec<(String, String)> = Vec::new();

        for (index, file) in files.iter().enumerate() {
            on_progress(index, total);

            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file.display().to_string());

            // Fail fast on unrecognized extensions, before spending model time.
            if !is_supported_format(file) {
                warn!("Skipping unsupported file '{}'", name);
                failures.push((
                    name,
                    EngineError::UnsupportedFormat(file.clone()).to_string(),
                ));
                on_progress(index + 1, total);
                continue;
            }

            match handle.transcribe(file, language) {
                Ok(text) => {
                    let text = text.trim().to_string();
                    if total > 1 {
                        pieces.push(format!("{}:\n{}", name, text));
                    } else {
                        pieces.push(text);
                    }
                }
                Err(e) => {
                    warn!("Transcription failed for '{}': {}", name, e);
                    failures.push((name, e.to_string()));
                }
            }

            on_progress(index + 1, total);
        }

        if pieces.is_empty() {
            return Err(EngineError::NoTranscribableFiles);
        }

        Ok(BatchTranscription {
            text: pieces.join("\n\n"),
            total,
            failed: failures.len(),
            failures,
        })
    }
}
