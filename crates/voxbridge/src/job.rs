//! Job and result data model shared between producer and consumer.
//!
//! The wire format is fixed: `manifest.json` commits a pending job,
//! `result.json` records its terminal outcome. Field names here are the
//! protocol — renaming a field breaks every producer.

use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Name of the commit-marker file inside a pending job directory.
pub const MANIFEST_FILE: &str = "manifest.json";
/// Name of the outcome record inside a completed job directory.
pub const RESULT_FILE: &str = "result.json";
/// Subdirectory of a pending job holding the audio payloads.
pub const AUDIO_DIR: &str = "audio";

/// Whisper model size selector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Tiny,
    #[default]
    Base,
    Small,
    Medium,
    Large,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::Tiny,
        ModelKind::Base,
        ModelKind::Small,
        ModelKind::Medium,
        ModelKind::Large,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Tiny => "tiny",
            ModelKind::Base => "base",
            ModelKind::Small => "small",
            ModelKind::Medium => "medium",
            ModelKind::Large => "large",
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown model '{0}', expected one of: tiny, base, small, medium, large")]
pub struct UnknownModel(String);

impl FromStr for ModelKind {
    type Err = UnknownModel;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "tiny" => Ok(ModelKind::Tiny),
            "base" => Ok(ModelKind::Base),
            "small" => Ok(ModelKind::Small),
            "medium" => Ok(ModelKind::Medium),
            "large" => Ok(ModelKind::Large),
            other => Err(UnknownModel(other.to_string())),
        }
    }
}

/// One audio payload inside a job. `path` is relative to the job's own
/// directory; anything escaping it is rejected at claim time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFile {
    pub name: String,
    pub path: String,
    pub size: u64,
}

/// Transcription options carried in the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default)]
    pub model: ModelKind,
    /// Language code, `None` for auto-detect.
    #[serde(default)]
    pub language: Option<String>,
}

/// A producer-submitted unit of transcription work. This struct *is* the
/// manifest: serializing it yields `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub source_app: String,
    pub files: Vec<JobFile>,
    pub options: JobOptions,
}

impl Job {
    /// Structural validation applied when a manifest is claimed. Returns the
    /// reason a manifest is unacceptable; `source_app` is advisory only and
    /// deliberately not checked.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.id.is_empty() {
            return Err("empty job id".to_string());
        }
        if self.files.is_empty() {
            return Err("no files listed".to_string());
        }
        for file in &self.files {
            if file.path.is_empty() {
                return Err(format!("file '{}' has an empty path", file.name));
            }
            let path = Path::new(&file.path);
            if path.is_absolute() {
                return Err(format!("file path '{}' is absolute", file.path));
            }
            let escapes = path
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::RootDir));
            if escapes {
                return Err(format!("file path '{}' escapes the job directory", file.path));
            }
        }
        Ok(())
    }

    /// Resolves the payload paths against the job's pending directory,
    /// preserving manifest order.
    pub fn resolved_files(&self, job_dir: &Path) -> Vec<PathBuf> {
        self.files.iter().map(|f| job_dir.join(&f.path)).collect()
    }

    /// Display names of the payloads, in manifest order.
    pub fn file_names(&self) -> Vec<String> {
        self.files.iter().map(|f| f.name.clone()).collect()
    }
}

/// Terminal outcome of a job. Exactly one exists per job id; failed jobs get
/// a record too, so pending directories are never silently dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub id: String,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    pub transcription: Option<String>,
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub model_used: ModelKind,
}

impl JobResult {
    pub fn success(
        id: &str,
        transcription: String,
        duration_seconds: f64,
        model_used: ModelKind,
    ) -> Self {
        Self {
            id: id.to_string(),
            completed_at: Utc::now(),
            success: true,
            transcription: Some(transcription),
            error: None,
            duration_seconds,
            model_used,
        }
    }

    pub fn failure(id: &str, error: String, duration_seconds: f64, model_used: ModelKind) -> Self {
        Self {
            id: id.to_string(),
            completed_at: Utc::now(),
            success: false,
            transcription: None,
            error: Some(error),
            duration_seconds,
            model_used,
        }
    }

    /// Marks a successful result as partially failed. `success` stays true;
    /// the error field carries the per-file summary.
    pub fn with_partial_failures(mut self, summary: String) -> Self {
        self.error = Some(summary);
        self
    }
}
