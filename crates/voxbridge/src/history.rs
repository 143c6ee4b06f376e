//! Persistent record of recent transcriptions.
//!
//! Newest-first, capped, persisted as a single JSON file with atomic
//! replace. A corrupt or missing file yields an empty history instead of an
//! error; history is a convenience, never a gatekeeper.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::HistoryError;
use crate::job::ModelKind;

pub const DEFAULT_MAX_ENTRIES: usize = 10;
const HISTORY_FILE: &str = "history.json";
const PREVIEW_LEN: usize = 50;

/// One finished transcription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionRecord {
    pub id: String,
    pub text: String,
    pub preview: String,
    pub file_names: Vec<String>,
    pub file_count: usize,
    pub model: ModelKind,
    pub timestamp: DateTime<Utc>,
}

impl TranscriptionRecord {
    pub fn create(id: &str, text: &str, file_names: Vec<String>, model: ModelKind) -> Self {
        let file_count = file_names.len();
        Self {
            id: id.to_string(),
            text: text.to_string(),
            preview: make_preview(text),
            file_names,
            file_count,
            model,
            timestamp: Utc::now(),
        }
    }

    /// Relative age like "just now", "5m ago", "2h ago", "3d ago".
    pub fn time_ago(&self) -> String {
        self.time_ago_at(Utc::now())
    }

    fn time_ago_at(&self, now: DateTime<Utc>) -> String {
        let seconds = (now - self.timestamp).num_seconds().max(0);
        if seconds < 60 {
            "just now".to_string()
        } else if seconds < 3600 {
            format!("{}m ago", seconds / 60)
        } else if seconds < 86400 {
            format!("{}h ago", seconds / 3600)
        } else {
            format!("{}d ago", seconds / 86400)
        }
    }
}

/// Single-line preview, truncated on a character boundary.
fn make_preview(text: &str) -> String {
    let flat: String = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if flat.chars().count() <= PREVIEW_LEN {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_LEN).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Capped, newest-first history backed by one JSON file.
pub struct HistoryManager {
    max_entries: usize,
    storage_file: PathBuf,
    entries: Vec<TranscriptionRecord>,
}

impl HistoryManager {
    /// Opens (or starts) the history stored under `dir`.
    pub fn open(dir: &Path, max_entries: usize) -> Result<Self, HistoryError> {
        fs::create_dir_all(dir).map_err(|e| HistoryError::CreateDirectory {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let storage_file = dir.join(HISTORY_FILE);
        let entries = match fs::read_to_string(&storage_file) {
            Ok(contents) => match serde_json::from_str::<Vec<TranscriptionRecord>>(&contents) {
                Ok(mut entries) => {
                    entries.truncate(max_entries);
                    entries
                }
                Err(e) => {
                    warn!("History file is corrupt, starting fresh: {}", e);
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                warn!("Failed to read history file: {}", e);
                Vec::new()
            }
        };

        debug!("Loaded {} history entries", entries.len());
        Ok(Self {
            max_entries,
            storage_file,
            entries,
        })
    }

    /// Inserts a record at the front, trims to capacity, persists.
    pub fn record(&mut self, record: TranscriptionRecord) -> Result<(), HistoryError> {
        self.entries.insert(0, record);
        self.entries.truncate(self.max_entries);
        self.save()
    }

    pub fn get_all(&self) -> &[TranscriptionRecord] {
        &self.entries
    }

    pub fn get_by_id(&self, id: &str) -> Option<&TranscriptionRecord> {
        self.entries.iter().find(|r| r.id == id)
    }

    /// Removes the record with `id`. Returns whether anything was removed.
    pub fn delete(&mut self, id: &str) -> Result<bool, HistoryError> {
        let before = self.entries.len();
        self.entries.retain(|r| r.id != id);
        if self.entries.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<(), HistoryError> {
        self.entries.clear();
        self.save()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn save(&self) -> Result<(), HistoryError> {
        let json = serde_json::to_vec_pretty(&self.entries)?;
        let tmp = self.storage_file.with_extension("json.tmp");

        let write = |path: &Path| -> std::io::Result<()> {
            let mut file = fs::File::create(path)?;
            file.write_all(&json)?;
            file.sync_all()
        };
        write(&tmp).map_err(|e| HistoryError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, &self.storage_file).map_err(|e| HistoryError::WriteFile {
            path: self.storage_file.clone(),
            source: e,
        })?;
        Ok(())
    }
}
