//! Filesystem-backed job queue shared between producer and consumer.
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/pending/<jobId>/manifest.json   (written last by the producer)
//! <root>/pending/<jobId>/audio/<file>
//! <root>/completed/<jobId>/result.json
//! ```
//!
//! The only concurrency contract between the two sides is write ordering:
//! payloads first, manifest last. A directory without a readable manifest is
//! not a job yet and must never be acted on.

use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::StoreError;
use crate::job::{Job, JobOptions, JobResult, AUDIO_DIR, MANIFEST_FILE, RESULT_FILE};

pub struct JobStore {
    root: PathBuf,
}

impl JobStore {
    /// Opens (and creates if needed) the pending and completed areas under
    /// `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let store = Self {
            root: root.as_ref().to_path_buf(),
        };
        ensure_directory(&store.pending_dir())?;
        ensure_directory(&store.completed_dir())?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pending_dir(&self) -> PathBuf {
        self.root.join("pending")
    }

    pub fn completed_dir(&self) -> PathBuf {
        self.root.join("completed")
    }

    pub fn pending_job_dir(&self, id: &str) -> PathBuf {
        self.pending_dir().join(id)
    }

    pub fn completed_job_dir(&self, id: &str) -> PathBuf {
        self.completed_dir().join(id)
    }

    /// Producer-side entry point: stages the payload files into a fresh
    /// pending directory and writes the manifest last, so a reader can never
    /// observe a half-written job.
    pub fn create_pending_job(
        &self,
        files: &[PathBuf],
        options: JobOptions,
        source_app: &str,
    ) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let job_dir = self.pending_job_dir(&id);
        let audio_dir = job_dir.join(AUDIO_DIR);
        ensure_directory(&audio_dir)?;

        let mut manifest_files = Vec::with_capacity(files.len());
        for source in files {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "audio".to_string());
            let dest = audio_dir.join(&name);
            std::fs::copy(source, &dest).map_err(|e| StoreError::CopyPayload {
                from: source.clone(),
                source: e,
            })?;
            let size = std::fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);
            manifest_files.push(crate::job::JobFile {
                name: name.clone(),
                path: format!("{}/{}", AUDIO_DIR, name),
                size,
            });
        }

        let job = Job {
            id: id.clone(),
            created_at: chrono::Utc::now(),
            source_app: source_app.to_string(),
            files: manifest_files,
            options,
        };

        // Commit marker: once the manifest lands the job is visible.
        write_json_atomic(&job_dir.join(MANIFEST_FILE), &job)?;
        debug!("Created pending job {} ({} files)", id, job.files.len());
        Ok(id)
    }

    /// Lists pending job ids. Only directories containing a readable manifest
    /// count; half-written jobs (payloads staged, manifest not yet committed)
    /// are invisible.
    pub fn list_pending_jobs(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for entry in WalkDir::new(self.pending_dir())
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_dir() {
                continue;
            }
            if !entry.path().join(MANIFEST_FILE).is_file() {
                continue;
            }
            ids.push(entry.file_name().to_string_lossy().to_string());
        }
        ids.sort();
        ids
    }

    /// Parses and validates the manifest of a pending job.
    ///
    /// `JobNotFound` means the directory or manifest vanished under us —
    /// a race with another consumer or an external cleanup, recovered
    /// silently by the caller. `InvalidManifest` means the producer wrote
    /// garbage and the job must be rejected wholesale.
    pub fn claim_job(&self, id: &str) -> Result<Job, StoreError> {
        let manifest_path = self.pending_job_dir(id).join(MANIFEST_FILE);
        let content = match std::fs::read_to_string(&manifest_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::JobNotFound(id.to_string()));
            }
            Err(e) => {
                return Err(StoreError::ReadFile {
                    path: manifest_path,
                    source: e,
                });
            }
        };

        let job: Job = serde_json::from_str(&content).map_err(|e| StoreError::InvalidManifest {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        if job.id != id {
            return Err(StoreError::InvalidManifest {
                id: id.to_string(),
                reason: format!("manifest id '{}' does not match directory name", job.id),
            });
        }
        job.validate().map_err(|reason| StoreError::InvalidManifest {
            id: id.to_string(),
            reason,
        })?;
        Ok(job)
    }

    /// Whether a result record already exists for this id. Checked before
    /// dispatch: a completed job is never re-processed even if its pending
    /// directory is somehow still around.
    pub fn is_completed(&self, id: &str) -> bool {
        self.completed_job_dir(id).join(RESULT_FILE).is_file()
    }

    /// Writes the result record atomically (temp file then rename), so a
    /// reader never observes a partial record.
    pub fn write_result(&self, result: &JobResult) -> Result<PathBuf, StoreError> {
        let dir = self.completed_job_dir(&result.id);
        ensure_directory(&dir)?;
        let path = dir.join(RESULT_FILE);
        write_json_atomic(&path, result)?;
        Ok(path)
    }

    pub fn read_result(&self, id: &str) -> Result<JobResult, StoreError> {
        let path = self.completed_job_dir(id).join(RESULT_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| StoreError::ReadFile {
            path: path.clone(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| StoreError::InvalidManifest {
            id: id.to_string(),
            reason: format!("unparseable result record: {}", e),
        })
    }

    /// Best-effort removal of a pending job directory. Idempotent; failure is
    /// logged, never fatal — an orphaned directory is an acceptable degraded
    /// state, a crash is not.
    pub fn delete_pending_job(&self, id: &str) {
        let dir = self.pending_job_dir(id);
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => debug!("Removed pending job {}", id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove pending job {}: {}", id, e),
        }
    }
}

fn ensure_directory(path: &Path) -> Result<(), StoreError> {
    std::fs::create_dir_all(path).map_err(|e| StoreError::CreateDirectory {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Serializes `value` to a sibling temp file, then renames it into place.
/// Rename is atomic on the same filesystem, which both files are by
/// construction.
fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value).map_err(|e| StoreError::WriteFile {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;

    let tmp = path.with_extension("json.tmp");
    let mut file = std::fs::File::create(&tmp).map_err(|e| StoreError::WriteFile {
        path: tmp.clone(),
        source: e,
    })?;
    file.write_all(&json).map_err(|e| StoreError::WriteFile {
        path: tmp.clone(),
        source: e,
    })?;
    file.sync_all().map_err(|e| StoreError::WriteFile {
        path: tmp.clone(),
        source: e,
    })?;
    drop(file);

    std::fs::rename(&tmp, path).map_err(|e| StoreError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ModelKind;
    use tempfile::TempDir;

    fn store() -> (TempDir, JobStore) {
        let temp = TempDir::new().unwrap();
        let store = JobStore::open(temp.path()).unwrap();
        (temp, store)
    }

    fn write_audio(temp: &TempDir, name: &str) -> PathBuf {
        let path = temp.path().join(name);
        std::fs::write(&path, b"RIFF fake audio").unwrap();
        path
    }

    #[test]
    fn test_open_creates_areas() {
        let (_temp, store) = store();
        assert!(store.pending_dir().is_dir());
        assert!(store.completed_dir().is_dir());
    }

    #[test]
    fn test_create_and_claim_round_trip() {
        let (temp, store) = store();
        let a = write_audio(&temp, "a.wav");
        let b = write_audio(&temp, "b.opus");

        let options = JobOptions {
            model: ModelKind::Small,
            language: Some("pt".to_string()),
        };
        let id = store
            .create_pending_job(&[a, b], options.clone(), "test-harness")
            .unwrap();

        let job = store.claim_job(&id).unwrap();
        assert_eq!(job.id, id);
        assert_eq!(job.source_app, "test-harness");
        assert_eq!(job.options, options);
        assert_eq!(
            job.files.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            vec!["a.wav", "b.opus"]
        );
        for file in &job.files {
            assert!(store.pending_job_dir(&id).join(&file.path).is_file());
            assert_eq!(file.size, 15);
        }
    }

    #[test]
    fn test_manifest_less_directory_is_invisible() {
        let (_temp, store) = store();

        // Simulate a partial producer write: payloads staged, no manifest.
        let job_dir = store.pending_job_dir("half-written");
        std::fs::create_dir_all(job_dir.join(AUDIO_DIR)).unwrap();
        std::fs::write(job_dir.join(AUDIO_DIR).join("voice.opus"), b"data").unwrap();

        assert!(store.list_pending_jobs().is_empty());

        // Manifest lands: the job becomes visible.
        let job = Job {
            id: "half-written".to_string(),
            created_at: chrono::Utc::now(),
            source_app: "ext".to_string(),
            files: vec![crate::job::JobFile {
                name: "voice.opus".to_string(),
                path: "audio/voice.opus".to_string(),
                size: 4,
            }],
            options: JobOptions::default(),
        };
        write_json_atomic(&job_dir.join(MANIFEST_FILE), &job).unwrap();

        assert_eq!(store.list_pending_jobs(), vec!["half-written".to_string()]);
    }

    #[test]
    fn test_claim_vanished_job_is_not_found() {
        let (_temp, store) = store();
        match store.claim_job("gone") {
            Err(StoreError::JobNotFound(id)) => assert_eq!(id, "gone"),
            other => panic!("Expected JobNotFound, got {:?}", other.map(|j| j.id)),
        }
    }

    #[test]
    fn test_claim_unparseable_manifest_is_invalid() {
        let (_temp, store) = store();
        let job_dir = store.pending_job_dir("garbage");
        std::fs::create_dir_all(&job_dir).unwrap();
        std::fs::write(job_dir.join(MANIFEST_FILE), b"{not json").unwrap();

        assert!(matches!(
            store.claim_job("garbage"),
            Err(StoreError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn test_claim_rejects_mismatched_id() {
        let (_temp, store) = store();
        let job_dir = store.pending_job_dir("dir-name");
        std::fs::create_dir_all(&job_dir).unwrap();
        let job = Job {
            id: "other-name".to_string(),
            created_at: chrono::Utc::now(),
            source_app: "ext".to_string(),
            files: vec![crate::job::JobFile {
                name: "a.wav".to_string(),
                path: "audio/a.wav".to_string(),
                size: 1,
            }],
            options: JobOptions::default(),
        };
        write_json_atomic(&job_dir.join(MANIFEST_FILE), &job).unwrap();

        assert!(matches!(
            store.claim_job("dir-name"),
            Err(StoreError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn test_claim_rejects_traversal_paths() {
        let (_temp, store) = store();
        let job_dir = store.pending_job_dir("sneaky");
        std::fs::create_dir_all(&job_dir).unwrap();
        let job = Job {
            id: "sneaky".to_string(),
            created_at: chrono::Utc::now(),
            source_app: "ext".to_string(),
            files: vec![crate::job::JobFile {
                name: "a.wav".to_string(),
                path: "../../etc/passwd".to_string(),
                size: 1,
            }],
            options: JobOptions::default(),
        };
        write_json_atomic(&job_dir.join(MANIFEST_FILE), &job).unwrap();

        assert!(matches!(
            store.claim_job("sneaky"),
            Err(StoreError::InvalidManifest { .. })
        ));
    }

    #[test]
    fn test_result_round_trip() {
        let (_temp, store) = store();
        let result = JobResult::success("job-9", "some text".to_string(), 3.2, ModelKind::Base);
        let path = store.write_result(&result).unwrap();
        assert!(path.ends_with("completed/job-9/result.json"));

        let read_back = store.read_result("job-9").unwrap();
        assert_eq!(read_back, result);
        assert!(store.is_completed("job-9"));
        assert!(!store.is_completed("job-10"));
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let (_temp, store) = store();
        let result = JobResult::failure("job-t", "boom".to_string(), 0.0, ModelKind::Tiny);
        store.write_result(&result).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(store.completed_job_dir("job-t"))
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers, vec![RESULT_FILE.to_string()]);
    }

    #[test]
    fn test_delete_pending_job_is_idempotent() {
        let (temp, store) = store();
        let a = write_audio(&temp, "a.wav");
        let id = store
            .create_pending_job(&[a], JobOptions::default(), "test")
            .unwrap();

        store.delete_pending_job(&id);
        assert!(!store.pending_job_dir(&id).exists());

        // Second delete of an already-removed directory must not blow up.
        store.delete_pending_job(&id);
        store.delete_pending_job("never-existed");
    }

    #[test]
    fn test_list_is_sorted_and_complete() {
        let (temp, store) = store();
        let a = write_audio(&temp, "a.wav");
        let mut ids: Vec<String> = (0..3)
            .map(|_| {
                store
                    .create_pending_job(std::slice::from_ref(&a), JobOptions::default(), "t")
                    .unwrap()
            })
            .collect();
        ids.sort();
        assert_eq!(store.list_pending_jobs(), ids);
    }
}
